//! Runs one power action through the per-resource state machine.
//!
//! Shared by the power-events consumer (schedule actions) and the
//! maintenance coordinator (maintenance actions).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use powermgmt_core::config::ConvergenceConfig;
use powermgmt_core::{ActionOrigin, DeferredCheck, PowerAction, PowerActionRequest};
use powermgmt_queue::{publish, DurableQueue};
use tracing::{debug, info};
use uuid::Uuid;

use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::pipeline::MessageHandler;
use crate::state::{ActionStateStore, BeginOutcome};
use crate::status;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Dispatched and awaiting convergence.
    Dispatched(Uuid),
    /// Already in the target state.
    AlreadyInState,
    /// The control-plane call failed; reported as a failed event.
    Failed,
    /// Refused by the dedup lock or a maintenance override.
    Skipped,
}

pub struct ActionExecutor {
    dispatcher: Arc<Dispatcher>,
    state: Arc<ActionStateStore>,
    deferred_checks: Arc<dyn DurableQueue>,
    convergence: ConvergenceConfig,
}

impl ActionExecutor {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        state: Arc<ActionStateStore>,
        deferred_checks: Arc<dyn DurableQueue>,
        convergence: ConvergenceConfig,
    ) -> Self {
        Self {
            dispatcher,
            state,
            deferred_checks,
            convergence,
        }
    }

    /// Lock, dispatch, and schedule the first convergence check.
    ///
    /// Maintenance actions preempt whatever is in flight. `status_text` is
    /// written once the resource converges.
    pub async fn execute(
        &self,
        request: &PowerActionRequest,
        status_text: Option<&str>,
    ) -> Result<ExecOutcome, EngineError> {
        let id = request.resource_id.as_str();
        let action_id = match request.origin {
            ActionOrigin::Maintenance => {
                let window_id = request.window_id.as_deref().unwrap_or_default();
                if request.action == PowerAction::StopPostUpdates {
                    if let Some(current) = self.state.override_for(id).filter(|o| o.window_id != window_id) {
                        info!(
                            resource_id = id,
                            window_id,
                            current_window = %current.window_id,
                            "Stop for an earlier window while a later one holds the resource, skipping"
                        );
                        return Ok(ExecOutcome::Skipped);
                    }
                }
                debug!(resource_id = id, window_id, action = %request.action, "Maintenance action takes the resource");
                self.state.preempt(id, request.action)
            }
            ActionOrigin::Schedule => match self.state.try_begin(id, request.action, request.origin) {
                BeginOutcome::Started(action_id) => action_id,
                BeginOutcome::Busy { phase, action } => {
                    debug!(resource_id = id, ?phase, in_flight = %action, "Action already in flight, skipping");
                    return Ok(ExecOutcome::Skipped);
                }
                BeginOutcome::Overridden { window_id } => {
                    info!(resource_id = id, window_id = %window_id, "Maintenance override active, skipping scheduled action");
                    return Ok(ExecOutcome::Skipped);
                }
            },
        };

        let dispatch = self
            .dispatcher
            .invoke(id, request.kind, request.action, status_text)
            .await;

        if !dispatch.succeeded() {
            self.state.release(id, action_id);
            return Ok(ExecOutcome::Failed);
        }

        if dispatch.already_in_state {
            // Maintenance still records that the window owns the resource.
            if let (ActionOrigin::Maintenance, Some(text)) = (request.origin, status_text) {
                self.dispatcher
                    .annotate(id, request.kind, Some(request.action), text)
                    .await;
            }
            self.state.release(id, action_id);
            return Ok(ExecOutcome::AlreadyInState);
        }

        self.state.mark_awaiting(id, action_id);
        let check = DeferredCheck {
            action_id,
            resource_id: request.resource_id.clone(),
            kind: request.kind,
            action: request.action,
            wait_retries: 1,
            dispatched_at: Utc::now(),
            status_text: status_text.map(str::to_string),
        };
        if let Err(e) = publish(self.deferred_checks.as_ref(), &check, self.convergence.delay_for(0)).await {
            self.state.release(id, action_id);
            return Err(e.into());
        }
        Ok(ExecOutcome::Dispatched(action_id))
    }
}

#[async_trait]
impl MessageHandler for ActionExecutor {
    type Payload = PowerActionRequest;

    fn name(&self) -> &'static str {
        "power-events"
    }

    async fn handle(&self, request: PowerActionRequest) -> Result<(), EngineError> {
        let text = match request.origin {
            ActionOrigin::Schedule => Some(status::for_scheduled(request.action)),
            ActionOrigin::Maintenance => None,
        };
        self.execute(&request, text).await.map(|_| ())
    }
}
