//! Structured log sink for [`PowerEvent`]s.

use std::sync::Mutex;

use async_trait::async_trait;
use powermgmt_core::PowerEvent;

/// Destination of the power-event stream.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn write(&self, event: &PowerEvent);
}

/// Writes each event as one JSON document on the `powermgmt::events` target.
pub struct TracingSink;

#[async_trait]
impl EventSink for TracingSink {
    async fn write(&self, event: &PowerEvent) {
        match serde_json::to_string(event) {
            Ok(json) => {
                if event.succeeded() {
                    tracing::info!(target: "powermgmt::events", "{json}");
                } else {
                    tracing::warn!(target: "powermgmt::events", "{json}");
                }
            }
            Err(e) => tracing::error!(
                resource_id = %event.resource_id,
                error = %e,
                "Failed to serialize power event"
            ),
        }
    }
}

/// Collects events in memory.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<PowerEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PowerEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn write(&self, event: &PowerEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
