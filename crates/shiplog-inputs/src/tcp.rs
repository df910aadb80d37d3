//! `tcp` input: a newline-framed listener.
//!
//! The socket is bound when the source is built, so an unavailable port is a
//! construction failure rather than a runtime warning. Each accepted
//! connection runs on its own task and is counted in the process connection
//! counter for as long as it stays open. Lines that parse as JSON objects are
//! merged into the record; anything else becomes `message`.

use std::net::SocketAddr;

use shiplog_core::config::TcpInput;
use shiplog_core::{
    ComponentId, InputDeclaration, PipelineError, RecordStream, Source, SourceContext, SourceError,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::json::apply_json;
use crate::lines::LineReader;
use crate::runner::{spawn_source, Emitter, SourceHandle};

#[derive(Debug)]
pub struct TcpSource {
    handle: SourceHandle,
    local_addr: SocketAddr,
}

impl TcpSource {
    pub fn bind(
        id: ComponentId,
        decl: &InputDeclaration,
        input: &TcpInput,
        ctx: &SourceContext,
    ) -> Result<Self, PipelineError> {
        let addr = format!("{}:{}", input.bind, input.port);
        let listener = std::net::TcpListener::bind(&addr)
            .and_then(|listener| {
                listener.set_nonblocking(true)?;
                TcpListener::from_std(listener)
            })
            .map_err(|e| PipelineError::construction(id.to_string(), e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| PipelineError::construction(id.to_string(), e))?;
        debug!(source = %id, %local_addr, "tcp listener bound");

        let handle = spawn_source(id, decl, ctx, move |emitter, stop| {
            accept_loop(listener, emitter, stop)
        });
        Ok(Self { handle, local_addr })
    }

    /// The bound address; differs from the declared one when port 0 was used.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Source for TcpSource {
    fn id(&self) -> &ComponentId {
        self.handle.id()
    }

    fn subscribe(&self) -> RecordStream {
        self.handle.subscribe()
    }

    fn stop(&self) -> Result<(), SourceError> {
        self.handle.stop()
    }

    fn is_stopped(&self) -> bool {
        self.handle.is_stopped()
    }
}

async fn accept_loop(
    listener: TcpListener,
    emitter: Emitter,
    stop: CancellationToken,
) -> Result<(), SourceError> {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(read_connection(stream, peer, emitter.clone(), stop.clone()));
                }
                Err(e) => warn!(source = %emitter.id(), error = %e, "accept failed"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    connections.shutdown().await;
    Ok(())
}

async fn read_connection(
    stream: TcpStream,
    peer: SocketAddr,
    emitter: Emitter,
    stop: CancellationToken,
) {
    let _connection = emitter.counters().track_connection();
    debug!(%peer, "connection opened");
    let mut lines = LineReader::new(stream);
    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let mut record = emitter.record();
                    if !line.starts_with('{') || !apply_json(&mut record, &line) {
                        record = emitter.record().with_message(line);
                    }
                    record.insert_field("peer", peer.to_string().into());
                    emitter.emit(record).await;
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(%peer, error = %e, "connection read failed");
                    break;
                }
            },
        }
    }
    debug!(%peer, "connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use shiplog_core::{Gate, ProcessCounters};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn context() -> SourceContext {
        SourceContext {
            shutdown: CancellationToken::new(),
            counters: Arc::new(ProcessCounters::new()),
            gate: Gate::new(),
        }
    }

    fn ephemeral() -> TcpInput {
        TcpInput {
            port: 0,
            bind: "127.0.0.1".to_string(),
            type_tag: Some("syslog".to_string()),
            tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn lines_become_records_and_connections_are_counted() {
        let ctx = context();
        let input = ephemeral();
        let decl = InputDeclaration::Tcp(input.clone());
        let source = TcpSource::bind(ComponentId::new("tcp", 0), &decl, &input, &ctx).unwrap();
        let mut stream = source.subscribe();
        ctx.gate.open();

        let mut client = TcpStream::connect(source.local_addr()).await.unwrap();
        client
            .write_all(b"plain line\r\n{\"message\":\"structured\",\"level\":\"warn\"}\n")
            .await
            .unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), stream.recv())
            .await
            .unwrap()
            .unwrap();
        let second = stream.recv().await.unwrap();
        assert_eq!(first.message.as_deref(), Some("plain line"));
        assert_eq!(first.type_tag, "syslog");
        assert_eq!(second.message.as_deref(), Some("structured"));
        assert_eq!(second.fields["level"], "warn");
        assert_eq!(ctx.counters.active_connections(), 1);

        drop(client);
        for _ in 0..100 {
            if ctx.counters.active_connections() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(ctx.counters.active_connections(), 0);
        assert_eq!(ctx.counters.message_count(), 2);
        source.stop().unwrap();
    }

    #[tokio::test]
    async fn invalid_utf8_does_not_drop_the_connection() {
        let ctx = context();
        let input = ephemeral();
        let decl = InputDeclaration::Tcp(input.clone());
        let source = TcpSource::bind(ComponentId::new("tcp", 0), &decl, &input, &ctx).unwrap();
        let mut stream = source.subscribe();
        ctx.gate.open();

        let mut client = TcpStream::connect(source.local_addr()).await.unwrap();
        client.write_all(b"first\ncaf\xe9 latin1\nthird\n").await.unwrap();

        let mut messages = Vec::new();
        for _ in 0..3 {
            let record = tokio::time::timeout(Duration::from_secs(5), stream.recv())
                .await
                .unwrap()
                .unwrap();
            messages.push(record.message.clone().unwrap());
        }
        assert_eq!(messages, vec!["first", "caf\u{fffd} latin1", "third"]);
        assert_eq!(ctx.counters.active_connections(), 1);
        source.stop().unwrap();
    }

    #[tokio::test]
    async fn oversized_line_is_truncated_and_the_next_one_kept() {
        let ctx = context();
        let input = ephemeral();
        let decl = InputDeclaration::Tcp(input.clone());
        let source = TcpSource::bind(ComponentId::new("tcp", 0), &decl, &input, &ctx).unwrap();
        let mut stream = source.subscribe();
        ctx.gate.open();

        let mut payload = vec![b'a'; crate::lines::MAX_LINE_BYTES + 4096];
        payload.extend_from_slice(b"\nnext\n");
        let mut client = TcpStream::connect(source.local_addr()).await.unwrap();
        client.write_all(&payload).await.unwrap();

        let mut messages = Vec::new();
        for _ in 0..2 {
            let record = tokio::time::timeout(Duration::from_secs(5), stream.recv())
                .await
                .unwrap()
                .unwrap();
            messages.push(record.message.clone().unwrap());
        }
        assert_eq!(messages[0].len(), crate::lines::MAX_LINE_BYTES);
        assert!(messages[0].bytes().all(|b| b == b'a'));
        assert_eq!(messages[1], "next");
        assert_eq!(ctx.counters.active_connections(), 1);
        source.stop().unwrap();
    }

    #[tokio::test]
    async fn occupied_port_fails_construction() {
        let ctx = context();
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let input = TcpInput {
            port: taken.local_addr().unwrap().port(),
            ..ephemeral()
        };
        let decl = InputDeclaration::Tcp(input.clone());
        let err = TcpSource::bind(ComponentId::new("tcp", 3), &decl, &input, &ctx).unwrap_err();
        assert!(matches!(err, PipelineError::Construction { ref component, .. } if component == "tcp#3"));
    }
}
