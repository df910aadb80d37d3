//! Errors raised while delivering a batch. They never leave the sink: the
//! writer logs them and drops the batch once retries are exhausted.

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("invalid request: {0}")]
    Http(#[from] hyper::http::Error),

    #[error("response body unreadable: {0}")]
    Body(#[from] hyper::Error),

    #[error("destination returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected reply: {0}")]
    Protocol(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("no destination hosts configured")]
    NoHosts,
}
