//! Hand-driven source for sink tests.

use shiplog_core::{ComponentId, Fanout, LogRecord, RecordStream, Source, SourceError};

pub struct StubSource {
    id: ComponentId,
    fanout: Fanout,
}

impl StubSource {
    pub fn new(index: usize) -> Self {
        Self {
            id: ComponentId::new("stdin", index),
            fanout: Fanout::new(),
        }
    }

    pub async fn publish(&self, record: LogRecord) {
        self.fanout.publish(record).await;
    }

    pub fn subscriber_count(&self) -> usize {
        self.fanout.subscriber_count()
    }
}

impl Source for StubSource {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn subscribe(&self) -> RecordStream {
        self.fanout.subscribe()
    }

    fn stop(&self) -> Result<(), SourceError> {
        self.fanout.close();
        Ok(())
    }

    fn is_stopped(&self) -> bool {
        self.fanout.is_closed()
    }
}
