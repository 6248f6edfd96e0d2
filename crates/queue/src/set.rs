//! The four pipeline queues, opened from config.

use std::sync::Arc;
use std::time::Duration;

use powermgmt_core::config::{Config, QueueBackend};
use tracing::info;

use crate::error::QueueError;
use crate::memory::MemoryQueue;
use crate::queue::DurableQueue;
use crate::sqs::{sqs_client, SqsQueue};

/// Handles to every queue the pipeline reads or writes.
#[derive(Clone)]
pub struct QueueSet {
    /// Scan requests from the trigger.
    pub scans: Arc<dyn DurableQueue>,
    /// Power-action requests from discovery and maintenance.
    pub power_events: Arc<dyn DurableQueue>,
    /// Update-management notifications.
    pub update_events: Arc<dyn DurableQueue>,
    /// Delayed convergence checks.
    pub deferred_checks: Arc<dyn DurableQueue>,
}

impl QueueSet {
    /// In-process queues, all sharing one visibility timeout.
    pub fn memory(visibility_timeout: Duration) -> Self {
        let make = |name: &str| -> Arc<dyn DurableQueue> {
            Arc::new(MemoryQueue::new(name, visibility_timeout))
        };
        Self {
            scans: make("scans"),
            power_events: make("power-events"),
            update_events: make("update-events"),
            deferred_checks: make("deferred-checks"),
        }
    }

    pub async fn from_config(config: &Config) -> Result<Self, QueueError> {
        let queues = &config.queues;
        let set = match queues.backend {
            QueueBackend::Memory => {
                let visibility = Duration::from_secs(u64::from(queues.visibility_timeout_secs));
                let make = |name: &str| -> Arc<dyn DurableQueue> {
                    Arc::new(MemoryQueue::new(name, visibility))
                };
                Self {
                    scans: make(&queues.scans),
                    power_events: make(&queues.power_events),
                    update_events: make(&queues.update_events),
                    deferred_checks: make(&queues.deferred_checks),
                }
            }
            QueueBackend::Sqs => {
                let client = sqs_client(&config.aws).await;
                Self {
                    scans: Arc::new(SqsQueue::new(client.clone(), queues, &queues.scans)?),
                    power_events: Arc::new(SqsQueue::new(client.clone(), queues, &queues.power_events)?),
                    update_events: Arc::new(SqsQueue::new(client.clone(), queues, &queues.update_events)?),
                    deferred_checks: Arc::new(SqsQueue::new(client, queues, &queues.deferred_checks)?),
                }
            }
        };
        info!(backend = ?queues.backend, "Queues opened");
        Ok(set)
    }

    pub fn all(&self) -> [&Arc<dyn DurableQueue>; 4] {
        [
            &self.scans,
            &self.power_events,
            &self.update_events,
            &self.deferred_checks,
        ]
    }
}
