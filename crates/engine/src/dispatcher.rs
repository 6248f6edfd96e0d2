//! Routes power actions to the adapter for each resource kind.
//!
//! The dispatcher observes the resource, suppresses its alerts, issues the
//! control-plane call and reports the outcome as a [`PowerEvent`]. Failures
//! are returned as failed events, never as errors.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use powermgmt_core::config::DispatchConfig;
use powermgmt_core::{
    ActionResult, PowerAction, PowerEvent, PowerMgmtError, PowerState, ResourceKind, TAG_STATUS,
    TAG_STATUS_TIME,
};

use crate::retry::with_retry;
use crate::sink::EventSink;
use crate::traits::{AlertSuppressor, ControlError, KindAdapter, StopTagging};

/// Adapters keyed by the kind they manage.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<ResourceKind, Arc<dyn KindAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn KindAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn KindAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, kind: ResourceKind) -> Option<&Arc<dyn KindAdapter>> {
        self.adapters.get(&kind)
    }

    pub fn kinds(&self) -> Vec<ResourceKind> {
        let mut kinds: Vec<_> = self.adapters.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

/// Outcome of one [`Dispatcher::invoke`].
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub event: PowerEvent,
    /// The resource was already in the target state; nothing was called.
    pub already_in_state: bool,
}

impl Dispatch {
    pub fn succeeded(&self) -> bool {
        self.event.succeeded()
    }
}

pub struct Dispatcher {
    registry: AdapterRegistry,
    alerts: Arc<dyn AlertSuppressor>,
    sink: Arc<dyn EventSink>,
    retry: DispatchConfig,
    suppression: Option<Duration>,
}

impl Dispatcher {
    pub fn new(
        registry: AdapterRegistry,
        alerts: Arc<dyn AlertSuppressor>,
        sink: Arc<dyn EventSink>,
        retry: DispatchConfig,
        suppression: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            alerts,
            sink,
            retry,
            suppression,
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    fn adapter(&self, kind: ResourceKind) -> Result<&Arc<dyn KindAdapter>, ControlError> {
        self.registry
            .get(kind)
            .ok_or_else(|| ControlError::Fatal(format!("no adapter registered for {kind}")))
    }

    /// Current power state, retrying throttled reads.
    pub async fn observe(&self, resource_id: &str, kind: ResourceKind) -> Result<PowerState, ControlError> {
        let adapter = self.adapter(kind)?;
        with_retry(&self.retry, "power_state", || adapter.power_state(resource_id)).await
    }

    /// Move one resource towards the target state of `action`.
    ///
    /// `status_text` is only written here for kinds that must be tagged
    /// before a stop. Everything else is tagged after convergence.
    pub async fn invoke(
        &self,
        resource_id: &str,
        kind: ResourceKind,
        action: PowerAction,
        status_text: Option<&str>,
    ) -> Dispatch {
        let start = std::time::Instant::now();
        let dispatch = match self.adapter(kind) {
            Ok(adapter) => self.invoke_adapter(adapter.as_ref(), resource_id, action, status_text).await,
            Err(e) => Dispatch {
                event: self.failed(resource_id, kind, action, PowerState::Unknown, &e),
                already_in_state: false,
            },
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        if dispatch.succeeded() {
            tracing::info!(
                resource_id,
                kind = kind.feature_code(),
                action = %action,
                already_in_state = dispatch.already_in_state,
                duration_ms,
                "Power action dispatched"
            );
        } else {
            tracing::warn!(
                resource_id,
                kind = kind.feature_code(),
                action = %action,
                error = dispatch.event.error.as_deref().unwrap_or_default(),
                duration_ms,
                "Power action failed"
            );
        }
        self.sink.write(&dispatch.event).await;
        dispatch
    }

    async fn invoke_adapter(
        &self,
        adapter: &dyn KindAdapter,
        resource_id: &str,
        action: PowerAction,
        status_text: Option<&str>,
    ) -> Dispatch {
        let kind = adapter.kind();
        let target = action.target_state();

        let observed = match with_retry(&self.retry, "power_state", || adapter.power_state(resource_id)).await {
            Ok(state) => state,
            Err(e @ ControlError::NotFound(_)) => {
                return Dispatch {
                    event: self.failed(resource_id, kind, action, PowerState::Unknown, &e),
                    already_in_state: false,
                };
            }
            Err(e) => {
                tracing::warn!(resource_id, error = %e, "Could not read power state before action");
                PowerState::Unknown
            }
        };

        if observed == target {
            return Dispatch {
                event: PowerEvent::action(resource_id, kind, action, ActionResult::Succeeded, observed),
                already_in_state: true,
            };
        }

        if let Some(duration) = self.suppression {
            if let Err(e) = self.alerts.suppress(resource_id, duration).await {
                tracing::warn!(resource_id, error = %e, "Alert suppression failed, continuing");
            }
        }

        let result = if action.is_start() {
            with_retry(&self.retry, "start", || adapter.start(resource_id)).await
        } else {
            if let (StopTagging::BeforeStop, Some(text)) = (adapter.stop_tagging(), status_text) {
                self.write_status(adapter, resource_id, text).await;
            }
            with_retry(&self.retry, "stop", || adapter.stop(resource_id)).await
        };

        match result {
            Ok(()) => {
                let transitioning = if action.is_start() {
                    PowerState::Starting
                } else {
                    PowerState::Stopping
                };
                Dispatch {
                    event: PowerEvent::action(resource_id, kind, action, ActionResult::Succeeded, transitioning),
                    already_in_state: false,
                }
            }
            Err(e) => Dispatch {
                event: self.failed(resource_id, kind, action, observed, &e),
                already_in_state: false,
            },
        }
    }

    fn failed(
        &self,
        resource_id: &str,
        kind: ResourceKind,
        action: PowerAction,
        observed: PowerState,
        error: &ControlError,
    ) -> PowerEvent {
        let detail = PowerMgmtError::ActionInvocation {
            resource_id: resource_id.to_string(),
            action: action.to_string(),
            detail: error.to_string(),
        };
        PowerEvent::action(resource_id, kind, action, ActionResult::Failed, observed)
            .with_error(detail.to_string())
    }

    /// Write status tags, best-effort.
    ///
    /// `action` is the power action the text describes, if any. Stops on
    /// kinds that cannot be tagged after stopping are skipped.
    pub async fn annotate(
        &self,
        resource_id: &str,
        kind: ResourceKind,
        action: Option<PowerAction>,
        text: &str,
    ) {
        let Ok(adapter) = self.adapter(kind) else {
            return;
        };
        if action.is_some_and(|a| !a.is_start()) && adapter.stop_tagging() != StopTagging::AfterStop {
            tracing::debug!(resource_id, kind = kind.feature_code(), "Skipping status tag after stop");
            return;
        }
        self.write_status(adapter.as_ref(), resource_id, text).await;
    }

    async fn write_status(&self, adapter: &dyn KindAdapter, resource_id: &str, text: &str) {
        let tags = BTreeMap::from([
            (TAG_STATUS.to_string(), text.to_string()),
            (TAG_STATUS_TIME.to_string(), Utc::now().to_rfc3339()),
        ]);
        match with_retry(&self.retry, "merge_tags", || adapter.merge_tags(resource_id, &tags)).await {
            Ok(()) => tracing::debug!(resource_id, status = text, "Status tag written"),
            Err(e) => tracing::warn!(resource_id, error = %e, "Failed to write status tag"),
        }
    }
}
