//! Queue consumers and the assembled engine.
//!
//! Each of the four queues gets `WORKER_CONCURRENCY` workers. A worker
//! receives a batch, decodes it, and hands every payload to the queue's
//! handler: success acks, failure nacks for redelivery, and undecodable
//! messages are acked and dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use powermgmt_core::config::Config;
use powermgmt_core::ResourceKind;
use powermgmt_queue::{decode_batch, DurableQueue, QueueError, QueueSet};
use powermgmt_schedule::{Evaluator, TagParser};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::convergence::ConvergenceManager;
use crate::dispatcher::{AdapterRegistry, Dispatcher};
use crate::error::EngineError;
use crate::executor::ActionExecutor;
use crate::maintenance::MaintenanceCoordinator;
use crate::scanner::DiscoveryScanner;
use crate::sink::EventSink;
use crate::state::ActionStateStore;
use crate::traits::{AlertSuppressor, InventoryQuery};
use crate::trigger::Trigger;

/// Consumer of one queue's typed payloads.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    type Payload: DeserializeOwned + Send + 'static;

    /// Queue role, for logs.
    fn name(&self) -> &'static str;

    async fn handle(&self, payload: Self::Payload) -> Result<(), EngineError>;
}

/// Receive and process one batch. Returns the number of messages received.
pub async fn poll_once<H: MessageHandler + ?Sized>(
    queue: &dyn DurableQueue,
    handler: &H,
    batch: u32,
) -> Result<usize, QueueError> {
    let messages = queue.receive(batch).await?;
    let received = messages.len();
    if received == 0 {
        return Ok(0);
    }

    let (decoded, poison) = decode_batch::<H::Payload>(messages);
    for (msg, err) in poison {
        warn!(queue = handler.name(), message_id = %msg.id, error = %err, "Dropping undecodable message");
        if let Err(e) = queue.ack(&msg.receipt_handle).await {
            warn!(queue = handler.name(), message_id = %msg.id, error = %e, "Failed to ack poison message");
        }
    }

    for (msg, payload) in decoded {
        match handler.handle(payload).await {
            Ok(()) => {
                if let Err(e) = queue.ack(&msg.receipt_handle).await {
                    warn!(queue = handler.name(), message_id = %msg.id, error = %e, "Ack failed");
                }
            }
            Err(e) => {
                warn!(
                    queue = handler.name(),
                    message_id = %msg.id,
                    attempt = msg.attempt_count,
                    error = %e,
                    "Handler failed, message will be redelivered"
                );
                if let Err(e) = queue.nack(&msg.receipt_handle).await {
                    warn!(queue = handler.name(), message_id = %msg.id, error = %e, "Nack failed");
                }
            }
        }
    }
    Ok(received)
}

/// Spawn `concurrency` workers draining `queue` until `shutdown` flips.
pub fn spawn_workers<H: MessageHandler>(
    queue: Arc<dyn DurableQueue>,
    handler: Arc<H>,
    concurrency: usize,
    batch: u32,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    (0..concurrency.max(1))
        .map(|worker| {
            let queue = queue.clone();
            let handler = handler.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                debug!(queue = handler.name(), worker, "Worker started");
                loop {
                    if *shutdown.borrow() {
                        break;
                    }
                    let received = match poll_once(queue.as_ref(), handler.as_ref(), batch).await {
                        Ok(n) => n,
                        Err(e) => {
                            warn!(queue = handler.name(), worker, error = %e, "Receive failed");
                            0
                        }
                    };
                    if received == 0 {
                        tokio::select! {
                            _ = tokio::time::sleep(poll_interval) => {}
                            _ = shutdown.changed() => break,
                        }
                    }
                }
                debug!(queue = handler.name(), worker, "Worker stopped");
            })
        })
        .collect()
}

/// Cloud-facing collaborators the engine is assembled from.
pub struct Collaborators {
    pub adapters: AdapterRegistry,
    pub inventory: Arc<dyn InventoryQuery>,
    pub alerts: Arc<dyn AlertSuppressor>,
    pub sink: Arc<dyn EventSink>,
}

/// All stages wired together over one [`QueueSet`].
pub struct PowerEngine {
    pub queues: QueueSet,
    pub state: Arc<ActionStateStore>,
    pub scanner: Arc<DiscoveryScanner>,
    pub executor: Arc<ActionExecutor>,
    pub convergence: Arc<ConvergenceManager>,
    pub maintenance: Arc<MaintenanceCoordinator>,
    pub trigger: Arc<Trigger>,
    config: Config,
}

impl PowerEngine {
    pub fn new(config: Config, queues: QueueSet, collaborators: Collaborators) -> Result<Self, EngineError> {
        let Collaborators {
            adapters,
            inventory,
            alerts,
            sink,
        } = collaborators;

        let evaluator = Evaluator::from_config(&config.schedule)
            .map_err(|e| powermgmt_core::PowerMgmtError::Config(e.to_string()))?;
        let kinds: Vec<ResourceKind> = adapters
            .kinds()
            .into_iter()
            .filter(|k| config.scopes.is_enabled(*k))
            .collect();

        let state = Arc::new(ActionStateStore::new(config.convergence.action_lease()));
        let dispatcher = Arc::new(Dispatcher::new(
            adapters,
            alerts,
            sink.clone(),
            config.dispatch.clone(),
            config.alerts.suppression(),
        ));
        let executor = Arc::new(ActionExecutor::new(
            dispatcher.clone(),
            state.clone(),
            queues.deferred_checks.clone(),
            config.convergence.clone(),
        ));
        let convergence = Arc::new(ConvergenceManager::new(
            dispatcher.clone(),
            state.clone(),
            queues.deferred_checks.clone(),
            sink.clone(),
            config.convergence.clone(),
        ));
        let scanner = Arc::new(DiscoveryScanner::new(
            inventory.clone(),
            TagParser::new(config.schedule.day_order),
            evaluator,
            state.clone(),
            dispatcher.clone(),
            sink.clone(),
            queues.power_events.clone(),
            kinds.clone(),
        ));
        let maintenance = Arc::new(MaintenanceCoordinator::new(
            inventory,
            executor.clone(),
            dispatcher,
            state.clone(),
            sink,
            kinds,
            config.maintenance.grace(),
        ));
        let trigger = Arc::new(Trigger::new(
            queues.scans.clone(),
            config.scopes.scan_scopes(),
            config.schedule.tick(),
        ));

        Ok(Self {
            queues,
            state,
            scanner,
            executor,
            convergence,
            maintenance,
            trigger,
            config,
        })
    }

    /// Start the trigger and every queue's workers.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let worker = &self.config.worker;
        let batch = self.config.queues.receive_batch;
        let poll = worker.poll_interval();

        let mut handles = vec![self.trigger.clone().spawn(shutdown.clone())];
        handles.extend(spawn_workers(
            self.queues.scans.clone(),
            self.scanner.clone(),
            worker.concurrency,
            batch,
            poll,
            shutdown.clone(),
        ));
        handles.extend(spawn_workers(
            self.queues.power_events.clone(),
            self.executor.clone(),
            worker.concurrency,
            batch,
            poll,
            shutdown.clone(),
        ));
        handles.extend(spawn_workers(
            self.queues.update_events.clone(),
            self.maintenance.clone(),
            worker.concurrency,
            batch,
            poll,
            shutdown.clone(),
        ));
        handles.extend(spawn_workers(
            self.queues.deferred_checks.clone(),
            self.convergence.clone(),
            worker.concurrency,
            batch,
            poll,
            shutdown,
        ));
        info!(
            workers_per_queue = worker.concurrency.max(1),
            tasks = handles.len(),
            "Power management engine running"
        );
        handles
    }
}
