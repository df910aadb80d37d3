//! Static configuration documents and writer fixtures used across harnesses.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing_subscriber::fmt::MakeWriter;

/// One `stdin` input and one `stdout` output, as TOML.
pub const STDIN_STDOUT_TOML: &str = r#"
[[stdin]]
type = "toml-stdin"

[[stdout]]
codec = "line"
"#;

/// One `stdin` input and one `stdout` output, as JSON.
pub const STDIN_STDOUT_JSON: &str = r#"{
  "stdin": [{ "type": "json-stdin" }],
  "stdout": [{ "codec": "json" }]
}"#;

/// Two outputs and three inputs across sections, as YAML.
pub const MIXED_YAML: &str = r#"
stdout:
  - codec: json
redis:
  - host: ["cache-1", "cache-2"]
    key: app-logs
stdin:
  - type: console
tcp:
  - port: 6514
    type: syslog
    tags: [network]
os_event:
  - units: [sshd.service]
"#;

/// Write `contents` to `dir/name` and return the path.
pub fn write_document(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write config document");
    path
}

/// Poll `check` every 10ms until it holds or five seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

// ---------------------------------------------------------------------------
// In-memory writer
// ---------------------------------------------------------------------------

/// A cloneable in-memory [`MakeWriter`] for capturing diagnostics output.
#[derive(Clone, Default)]
pub struct Buffer(Arc<Mutex<Vec<u8>>>);

impl Buffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Buffer {
    type Writer = Buffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
