//! Maintenance window coordination.
//!
//! A window start powers every target on and opens an override so the
//! schedule leaves it alone. A window end stops the targets that were off
//! (or whose scheduled stop was held back), then closes the override. The
//! next regular tick decides the resource's state from then on.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use powermgmt_core::{
    MaintenanceWindow, PowerAction, PowerActionRequest, PowerEvent, PowerState, ResourceDescriptor,
    ResourceKind, ResourcePath, Scope, UpdateMgmtEvent, WindowStatus, WindowTarget, TAG_STATUS,
};
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::executor::{ActionExecutor, ExecOutcome};
use crate::pipeline::MessageHandler;
use crate::scanner::is_managed;
use crate::sink::EventSink;
use crate::state::ActionStateStore;
use crate::status;
use crate::traits::InventoryQuery;

pub struct MaintenanceCoordinator {
    inventory: Arc<dyn InventoryQuery>,
    executor: Arc<ActionExecutor>,
    dispatcher: Arc<Dispatcher>,
    state: Arc<ActionStateStore>,
    sink: Arc<dyn EventSink>,
    kinds: Vec<ResourceKind>,
    grace: Duration,
}

impl MaintenanceCoordinator {
    pub fn new(
        inventory: Arc<dyn InventoryQuery>,
        executor: Arc<ActionExecutor>,
        dispatcher: Arc<Dispatcher>,
        state: Arc<ActionStateStore>,
        sink: Arc<dyn EventSink>,
        kinds: Vec<ResourceKind>,
        grace: Duration,
    ) -> Self {
        Self {
            inventory,
            executor,
            dispatcher,
            state,
            sink,
            kinds,
            grace,
        }
    }

    /// Handle one update-management notification.
    ///
    /// A failed target lookup is returned as an error so the notification is
    /// redelivered; a missed window start would leave targets off.
    pub async fn on_event(&self, event: &UpdateMgmtEvent) -> Result<usize, EngineError> {
        let now = Utc::now();
        let window = maintenance_window(event, now);
        if window.is_stale_start(now) {
            info!(window_id = %window.id, end = ?window.end, "Window already over, ignoring late start notification");
            return Ok(0);
        }

        let targets = self.targets(&window).await?;
        info!(window_id = %window.id, status = ?window.status, targets = targets.len(), "Maintenance event received");

        let mut first_error = None;
        let mut handled = 0;
        for resource in &targets {
            if resource.is_exempt() {
                debug!(resource_id = %resource.id, window_id = %window.id, "Exempt, ignoring maintenance window");
                continue;
            }
            if !is_managed(resource, &self.kinds) {
                continue;
            }
            let result = match window.status {
                WindowStatus::Active => self.window_started(resource, &window, now).await,
                WindowStatus::Completed => self.window_completed(resource, &window.id).await,
                WindowStatus::Pending => Ok(()),
            };
            match result {
                Ok(()) => handled += 1,
                Err(e) => {
                    warn!(resource_id = %resource.id, window_id = %window.id, error = %e, "Maintenance action failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(handled),
        }
    }

    async fn targets(&self, window: &MaintenanceWindow) -> Result<Vec<ResourceDescriptor>, EngineError> {
        let (label, lookup) = match &window.target {
            WindowTarget::ResourceGroup(path) => {
                let scope = Scope::ResourceGroup(path.clone());
                let found = self.inventory.query(&scope, &self.kinds).await;
                (scope.to_string(), found)
            }
            WindowTarget::UpdateRun => {
                let found = self.inventory.maintenance_targets(&window.id, &self.kinds).await;
                (format!("maintenance:{}", window.id), found)
            }
        };
        match lookup {
            Ok(targets) => Ok(targets),
            Err(e) => {
                warn!(scope = %label, error = %e, "Maintenance target lookup failed");
                self.sink
                    .write(&PowerEvent::discovery_failed(&label, e.to_string()))
                    .await;
                Err(EngineError::TargetLookup(e))
            }
        }
    }

    async fn window_started(
        &self,
        resource: &ResourceDescriptor,
        window: &MaintenanceWindow,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let running = resource.power_state == PowerState::Running;
        let until = window.hold_until(now, self.grace);
        let state = self.state.begin_override(&resource.id, &window.id, until, running);

        let text = if state.was_running {
            status::MAINTENANCE_RUNNING
        } else {
            status::MAINTENANCE_WAS_STOPPED
        };
        let request = PowerActionRequest::maintenance(
            &resource.id,
            resource.kind,
            PowerAction::StartForUpdates,
            &window.id,
        );
        let outcome = self.executor.execute(&request, Some(text)).await?;
        debug!(resource_id = %resource.id, ?outcome, "Window start handled");
        Ok(())
    }

    async fn window_completed(&self, resource: &ResourceDescriptor, window_id: &str) -> Result<(), EngineError> {
        let stop = match self.state.override_for(&resource.id) {
            Some(o) if o.window_id != window_id => {
                info!(
                    resource_id = %resource.id,
                    window_id,
                    current_window = %o.window_id,
                    "Override belongs to a later window, leaving resource on"
                );
                return Ok(());
            }
            Some(o) => !o.was_running || o.stop_deferred,
            // No local record of the window start; fall back to what it tagged.
            None => status::wants_post_maintenance_stop(resource.tag(TAG_STATUS)),
        };

        if stop {
            let request = PowerActionRequest::maintenance(
                &resource.id,
                resource.kind,
                PowerAction::StopPostUpdates,
                window_id,
            );
            let outcome = self
                .executor
                .execute(&request, Some(status::POST_MAINTENANCE_STOPPED))
                .await?;
            if outcome == ExecOutcome::Failed {
                warn!(resource_id = %resource.id, window_id, "Post-maintenance stop failed, next tick will reconcile");
            }
        } else {
            self.dispatcher
                .annotate(&resource.id, resource.kind, None, status::MAINTENANCE_COMPLETED)
                .await;
        }
        self.state.clear_override(&resource.id, window_id);
        Ok(())
    }
}

/// The window an update-management notification describes.
fn maintenance_window(event: &UpdateMgmtEvent, now: DateTime<Utc>) -> MaintenanceWindow {
    MaintenanceWindow {
        id: event.data.correlation_id.clone(),
        target: window_target(event),
        start: event.data.start.unwrap_or(now),
        end: event.data.end,
        status: event.window_status(),
    }
}

/// Targets of the window: one resource group when the event names one,
/// otherwise whatever the update run selected.
///
/// A bare group name is qualified with the subscription of the maintenance
/// configuration (or the event subject).
fn window_target(event: &UpdateMgmtEvent) -> WindowTarget {
    let Some(group) = event
        .data
        .resource_group
        .as_deref()
        .map(str::trim)
        .filter(|g| !g.is_empty())
    else {
        return WindowTarget::UpdateRun;
    };
    if group.starts_with('/') {
        return WindowTarget::ResourceGroup(group.trim_end_matches('/').to_string());
    }
    let subscription = [
        event.data.maintenance_configuration_id.as_deref(),
        event.subject.as_deref(),
    ]
    .into_iter()
    .flatten()
    .find_map(|id| id.parse::<ResourcePath>().ok())
    .map(|path| path.subscription_id);
    match subscription {
        Some(subscription) => {
            WindowTarget::ResourceGroup(format!("/subscriptions/{subscription}/resourceGroups/{group}"))
        }
        None => {
            warn!(group, "Cannot qualify resource group without a subscription, using update run targets");
            WindowTarget::UpdateRun
        }
    }
}

#[async_trait]
impl MessageHandler for MaintenanceCoordinator {
    type Payload = UpdateMgmtEvent;

    fn name(&self) -> &'static str {
        "update-events"
    }

    async fn handle(&self, event: UpdateMgmtEvent) -> Result<(), EngineError> {
        self.on_event(&event).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use powermgmt_core::UpdateMgmtData;

    fn event(resource_group: Option<&str>) -> UpdateMgmtEvent {
        UpdateMgmtEvent {
            id: "evt-1".into(),
            event_type: "Microsoft.Maintenance.PreMaintenanceEvent".into(),
            subject: None,
            event_time: None,
            data: UpdateMgmtData {
                correlation_id: "run-1".into(),
                maintenance_configuration_id: Some(
                    "/subscriptions/sub-9/resourceGroups/rg-ops/providers/Microsoft.Maintenance/maintenanceConfigurations/weekly"
                        .into(),
                ),
                start: None,
                end: None,
                resource_group: resource_group.map(str::to_string),
            },
        }
    }

    #[test]
    fn bare_group_uses_configuration_subscription() {
        assert_eq!(
            window_target(&event(Some("rg-app"))),
            WindowTarget::ResourceGroup("/subscriptions/sub-9/resourceGroups/rg-app".into())
        );
    }

    #[test]
    fn qualified_group_is_used_as_is() {
        assert_eq!(
            window_target(&event(Some("/subscriptions/a/resourceGroups/b/"))),
            WindowTarget::ResourceGroup("/subscriptions/a/resourceGroups/b".into())
        );
        assert_eq!(window_target(&event(None)), WindowTarget::UpdateRun);
        assert_eq!(window_target(&event(Some("  "))), WindowTarget::UpdateRun);
    }

    #[test]
    fn window_carries_event_bounds() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).unwrap();
        let mut e = event(None);
        e.data.end = Some(Utc.with_ymd_and_hms(2026, 3, 2, 3, 0, 0).unwrap());
        let window = maintenance_window(&e, now);
        assert_eq!(window.id, "run-1");
        assert_eq!(window.start, now);
        assert_eq!(window.status, WindowStatus::Active);
        assert_eq!(
            window.hold_until(now, Duration::minutes(60)),
            Utc.with_ymd_and_hms(2026, 3, 2, 4, 0, 0).unwrap()
        );
        assert!(window.is_stale_start(Utc.with_ymd_and_hms(2026, 3, 2, 3, 30, 0).unwrap()));
    }
}
