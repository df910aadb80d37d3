//! Domain-specific assertions for shiplog harnesses.
//!
//! These wrap `pretty_assertions` and add context-rich failure messages that
//! make it clear *which* wiring or delivery property was violated.

use std::collections::HashSet;

use pretty_assertions::assert_eq;
use shiplog::Pipeline;
use shiplog_core::SharedRecord;

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Assert that every sink is linked to every source exactly once.
pub fn assert_complete_wiring(pipeline: &Pipeline) {
    let links = pipeline.links();
    let expected = pipeline.sinks().len() * pipeline.sources().len();
    assert_eq!(links.len(), expected, "link count != |sinks| x |sources|");

    let unique: HashSet<_> = links.iter().collect();
    assert_eq!(unique.len(), links.len(), "duplicate links: {links:?}");

    for sink in pipeline.sinks() {
        for source in pipeline.sources() {
            assert!(
                links.iter().any(|l| &l.sink == sink.id() && &l.source == source.id()),
                "missing link {} <- {}",
                sink.id(),
                source.id()
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Messages in `records` published by `source` (prefix `<source>:`), in
/// arrival order, with the prefix removed.
pub fn messages_from(records: &[SharedRecord], source: &str) -> Vec<String> {
    let prefix = format!("{source}:");
    records
        .iter()
        .filter_map(|r| r.message.as_deref())
        .filter_map(|m| m.strip_prefix(&prefix))
        .map(str::to_string)
        .collect()
}

/// Assert that `sink_records` holds exactly `script` from `source`, in order.
pub fn assert_delivered_in_order(sink_records: &[SharedRecord], source: &str, script: &[&str]) {
    assert_eq!(
        messages_from(sink_records, source),
        script.iter().map(|m| m.to_string()).collect::<Vec<_>>(),
        "records from {source} missing or out of order"
    );
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

/// Assert that `earlier` appears in `events` before `later`.
pub fn assert_event_before(events: &[String], earlier: &str, later: &str) {
    let position = |needle: &str| {
        events
            .iter()
            .position(|e| e == needle)
            .unwrap_or_else(|| panic!("event {needle:?} not found in {events:#?}"))
    };
    assert!(
        position(earlier) < position(later),
        "expected {earlier:?} before {later:?} in {events:#?}"
    );
}
