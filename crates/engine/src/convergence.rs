//! Deferred convergence checks.
//!
//! Each dispatched action gets a chain of delayed checks on the deferred-check
//! queue. A check either observes the target state (terminal success),
//! enqueues the next check with backoff, or gives up once `wait_retries`
//! reaches the budget (terminal failure). Workers never sleep on a check.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use powermgmt_core::config::ConvergenceConfig;
use powermgmt_core::{ActionResult, DeferredCheck, PowerEvent, PowerMgmtError, PowerState};
use powermgmt_queue::{publish, DurableQueue};
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::pipeline::MessageHandler;
use crate::sink::EventSink;
use crate::state::ActionStateStore;

/// What one check concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Converged,
    Requeued,
    TimedOut,
    /// Superseded or duplicate delivery.
    Stale,
}

pub struct ConvergenceManager {
    dispatcher: Arc<Dispatcher>,
    state: Arc<ActionStateStore>,
    deferred_checks: Arc<dyn DurableQueue>,
    sink: Arc<dyn EventSink>,
    config: ConvergenceConfig,
}

impl ConvergenceManager {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        state: Arc<ActionStateStore>,
        deferred_checks: Arc<dyn DurableQueue>,
        sink: Arc<dyn EventSink>,
        config: ConvergenceConfig,
    ) -> Self {
        Self {
            dispatcher,
            state,
            deferred_checks,
            sink,
            config,
        }
    }

    pub async fn check(&self, check: &DeferredCheck) -> Result<CheckOutcome, EngineError> {
        let id = check.resource_id.as_str();
        if !self.state.claim_check(id, check.action_id, check.wait_retries) {
            debug!(resource_id = id, wait_retries = check.wait_retries, "Dropping stale convergence check");
            return Ok(CheckOutcome::Stale);
        }

        let observed = match self.dispatcher.observe(id, check.kind).await {
            Ok(state) => state,
            Err(e) => {
                warn!(resource_id = id, error = %e, "Power state read failed during convergence check");
                PowerState::Unknown
            }
        };
        let target = check.action.target_state();

        let elapsed_secs = (Utc::now() - check.dispatched_at).num_seconds();
        if observed == target {
            info!(
                resource_id = id,
                action = %check.action,
                wait_retries = check.wait_retries,
                elapsed_secs,
                "Resource converged"
            );
            let event = PowerEvent::convergence(
                id,
                check.kind,
                check.action,
                ActionResult::Succeeded,
                observed,
                check.wait_retries,
            );
            self.sink.write(&event).await;
            if let Some(text) = &check.status_text {
                self.dispatcher
                    .annotate(id, check.kind, Some(check.action), text)
                    .await;
            }
            self.state.release(id, check.action_id);
            return Ok(CheckOutcome::Converged);
        }

        if check.wait_retries < self.config.max_retries {
            let next = check.next_retry();
            let delay = self.config.delay_for(check.wait_retries);
            if let Err(e) = publish(self.deferred_checks.as_ref(), &next, delay).await {
                self.state.rewind_check(id, check.action_id, check.wait_retries);
                return Err(e.into());
            }
            debug!(
                resource_id = id,
                observed = %observed,
                expected = %target,
                next_wait_retries = next.wait_retries,
                delay_secs = delay.as_secs(),
                "Not converged yet, rechecking later"
            );
            return Ok(CheckOutcome::Requeued);
        }

        let timeout = PowerMgmtError::ConvergenceTimeout {
            resource_id: check.resource_id.clone(),
            expected: target.to_string(),
            wait_retries: self.config.max_retries,
        };
        warn!(resource_id = id, action = %check.action, observed = %observed, elapsed_secs, "{timeout}");
        let event = PowerEvent::convergence(
            id,
            check.kind,
            check.action,
            ActionResult::Failed,
            observed,
            self.config.max_retries,
        )
        .with_error(timeout.to_string());
        self.sink.write(&event).await;
        self.state.release(id, check.action_id);
        Ok(CheckOutcome::TimedOut)
    }
}

#[async_trait]
impl MessageHandler for ConvergenceManager {
    type Payload = DeferredCheck;

    fn name(&self) -> &'static str {
        "deferred-checks"
    }

    async fn handle(&self, check: DeferredCheck) -> Result<(), EngineError> {
        self.check(&check).await.map(|_| ())
    }
}
