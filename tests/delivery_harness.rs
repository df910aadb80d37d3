#![allow(unused)]
//! Record delivery integration harness.
//!
//! # What this covers
//!
//! - **Fan-out**: every record a source publishes reaches every sink.
//! - **Ordering**: each sink sees a given source's records in emission order.
//! - **Gate**: records emitted right after assembly are not lost by sinks
//!   wired later in the same assembly.
//! - **Built-in inputs**: real `tcp` and `log` sources feeding recording
//!   sinks, including the connection counter.
//!
//! # What this does NOT cover
//!
//! - Remote destinations (the sink crates test their own wire formats)
//!
//! # Running
//!
//! ```sh
//! cargo test --test delivery_harness
//! ```

mod common;
use common::*;

use std::io::Write;

use pretty_assertions::assert_eq;
use tokio::io::AsyncWriteExt;

const SCRIPT: &[&str] = &["boot", "ready", "request served", "draining", "bye"];

#[tokio::test]
async fn every_sink_receives_every_source_in_order() {
    let fake = FakeComponents::new().emitting(SCRIPT);
    let pipeline = assemble(ConfigBuilder::new().stdout(3).stdin(2).build(), &fake);
    let expected = SCRIPT.len() * 2;

    assert!(
        eventually(|| (0..3).all(|n| fake.received(&format!("stdout#{n}")).len() == expected)).await,
        "sinks did not receive every record"
    );
    for n in 0..3 {
        let records = fake.received(&format!("stdout#{n}"));
        assert_delivered_in_order(&records, "stdin#0", SCRIPT);
        assert_delivered_in_order(&records, "stdin#1", SCRIPT);
    }
    assert_eq!(pipeline.message_count(), expected as u64);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn records_carry_declared_type_tag() {
    let fake = FakeComponents::new().emitting(&["hello"]);
    let pipeline = assemble(ConfigBuilder::new().stdout(1).stdin(2).build(), &fake);

    assert!(eventually(|| fake.received("stdout#0").len() == 2).await);
    let mut tags: Vec<String> = fake
        .received("stdout#0")
        .iter()
        .map(|r| r.type_tag.clone())
        .collect();
    tags.sort();
    assert_eq!(tags, vec!["stdin-0", "stdin-1"]);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn tcp_lines_reach_every_sink_and_connections_are_counted() {
    let port = {
        let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        spare.local_addr().unwrap().port()
    };
    let fake = FakeComponents::new().with_builtin_sources();
    let pipeline = assemble(ConfigBuilder::new().stdout(2).tcp(port).build(), &fake);

    let mut client = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    client
        .write_all(b"first line\n{\"message\":\"second line\",\"user\":\"alice\"}\n")
        .await
        .unwrap();

    assert!(eventually(|| pipeline.active_connections() == 1).await);
    assert!(eventually(|| {
        fake.received("stdout#0").len() == 2 && fake.received("stdout#1").len() == 2
    })
    .await);

    for sink in ["stdout#0", "stdout#1"] {
        let records = fake.received(sink);
        assert_eq!(records[0].message.as_deref(), Some("first line"));
        assert_eq!(records[1].message.as_deref(), Some("second line"));
        assert_eq!(records[1].fields["user"], "alice");
        assert_eq!(records[1].type_tag, "tcp");
    }
    assert_eq!(pipeline.message_count(), 2);

    drop(client);
    assert!(eventually(|| pipeline.active_connections() == 0).await);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn followed_file_lines_reach_every_sink() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    std::fs::write(&path, "line one\nline two\n").unwrap();

    let fake = FakeComponents::new().with_builtin_sources();
    let pipeline = assemble(ConfigBuilder::new().stdout(2).log_file(&path).build(), &fake);
    assert!(eventually(|| fake.received("stdout#1").len() == 2).await);

    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    writeln!(file, "line three").unwrap();
    drop(file);

    assert!(eventually(|| {
        fake.received("stdout#0").len() == 3 && fake.received("stdout#1").len() == 3
    })
    .await);
    let messages: Vec<_> = fake
        .received("stdout#0")
        .iter()
        .filter_map(|r| r.message.clone())
        .collect();
    assert_eq!(messages, vec!["line one", "line two", "line three"]);
    pipeline.shutdown().await;
}
