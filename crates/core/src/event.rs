//! Power events, tag-check findings and maintenance windows.
//!
//! [`PowerEvent`] is the structured-log contract consumed by the external
//! dashboard. Its JSON field names must stay stable.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resource::{PowerState, ResourceKind};

/// A power operation the engine can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerAction {
    Start,
    Stop,
    StartForUpdates,
    StopPostUpdates,
}

impl PowerAction {
    pub fn is_start(&self) -> bool {
        matches!(self, PowerAction::Start | PowerAction::StartForUpdates)
    }

    /// The power state the action converges to.
    pub fn target_state(&self) -> PowerState {
        if self.is_start() {
            PowerState::Running
        } else {
            PowerState::Stopped
        }
    }

    pub fn is_maintenance(&self) -> bool {
        matches!(self, PowerAction::StartForUpdates | PowerAction::StopPostUpdates)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PowerAction::Start => "start",
            PowerAction::Stop => "stop",
            PowerAction::StartForUpdates => "start_for_updates",
            PowerAction::StopPostUpdates => "stop_post_updates",
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionResult {
    Succeeded,
    Failed,
}

/// Which stage emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventName {
    #[serde(rename = "powerAction")]
    PowerAction,
    #[serde(rename = "checkPowerMgmtStatus")]
    ConvergenceCheck,
    #[serde(rename = "tagcheck")]
    TagCheck,
    #[serde(rename = "discovery")]
    Discovery,
}

/// One structured event on the log sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "resourceId")]
    pub resource_id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    pub event: EventName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<PowerAction>,
    #[serde(rename = "powerState")]
    pub power_state: PowerState,
    pub result: ActionResult,
    pub wait_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PowerEvent {
    /// Event describing a dispatched (or acknowledged) action.
    pub fn action(
        resource_id: impl Into<String>,
        kind: ResourceKind,
        action: PowerAction,
        result: ActionResult,
        power_state: PowerState,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            resource_id: resource_id.into(),
            resource_type: Some(kind.arm_type().to_string()),
            event: EventName::PowerAction,
            action: Some(action),
            power_state,
            result,
            wait_retries: 0,
            error: None,
        }
    }

    /// Event describing the outcome of a deferred convergence check.
    pub fn convergence(
        resource_id: impl Into<String>,
        kind: ResourceKind,
        action: PowerAction,
        result: ActionResult,
        power_state: PowerState,
        wait_retries: u32,
    ) -> Self {
        Self {
            event: EventName::ConvergenceCheck,
            wait_retries,
            ..Self::action(resource_id, kind, action, result, power_state)
        }
    }

    /// Scope-level discovery failure. `resource_id` carries the scope.
    pub fn discovery_failed(scope: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            resource_id: scope.into(),
            resource_type: None,
            event: EventName::Discovery,
            action: None,
            power_state: PowerState::Unknown,
            result: ActionResult::Failed,
            wait_retries: 0,
            error: Some(detail.into()),
        }
    }

    pub fn with_error(mut self, detail: impl Into<String>) -> Self {
        self.error = Some(detail.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn succeeded(&self) -> bool {
        self.result == ActionResult::Succeeded
    }
}

/// A resource whose schedule tags could not be parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagCheckFinding {
    pub resource_id: String,
    pub kind: ResourceKind,
    pub tag: String,
    pub value: String,
    pub reason: String,
}

impl TagCheckFinding {
    /// Human-readable message, also written back as the status tag.
    pub fn message(&self) -> String {
        let name = self.resource_id.rsplit('/').next().unwrap_or(&self.resource_id);
        format!(
            "{} {} has invalid tag value '{}' for {}: {}",
            self.kind.arm_type(),
            name,
            self.value,
            self.tag,
            self.reason
        )
    }

    pub fn to_event(&self, power_state: PowerState) -> PowerEvent {
        PowerEvent {
            timestamp: Utc::now(),
            resource_id: self.resource_id.clone(),
            resource_type: Some(self.kind.arm_type().to_string()),
            event: EventName::TagCheck,
            action: None,
            power_state,
            result: ActionResult::Failed,
            wait_retries: 0,
            error: Some(self.message()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowStatus {
    Pending,
    Active,
    Completed,
}

/// What a maintenance window applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum WindowTarget {
    /// Whatever the update run selected, resolved by correlation id.
    UpdateRun,
    /// Every managed resource in one resource group (full path).
    ResourceGroup(String),
}

/// Update-management window during which targets must be powered on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    /// Correlation id of the update run.
    pub id: String,
    pub target: WindowTarget,
    pub start: DateTime<Utc>,
    /// Announced end, when the notification carried one.
    pub end: Option<DateTime<Utc>>,
    /// Lifecycle signalled by the notification itself.
    pub status: WindowStatus,
}

impl MaintenanceWindow {
    /// Status implied by the window bounds at `now`. Without an end the
    /// window stays active until its end notification.
    pub fn status_at(&self, now: DateTime<Utc>) -> WindowStatus {
        if now < self.start {
            WindowStatus::Pending
        } else if self.end.is_some_and(|end| now >= end) {
            WindowStatus::Completed
        } else {
            WindowStatus::Active
        }
    }

    /// A start notification delivered after the window it announces ended.
    pub fn is_stale_start(&self, now: DateTime<Utc>) -> bool {
        self.status == WindowStatus::Active && self.status_at(now) == WindowStatus::Completed
    }

    /// When an override opened at `now` lapses if the end notification never arrives.
    pub fn hold_until(&self, now: DateTime<Utc>, grace: chrono::Duration) -> DateTime<Utc> {
        self.end.unwrap_or(now).max(now) + grace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn power_event_json_contract() {
        let event = PowerEvent::convergence(
            "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm1",
            ResourceKind::VirtualMachine,
            PowerAction::StartForUpdates,
            ActionResult::Succeeded,
            PowerState::Running,
            3,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "checkPowerMgmtStatus");
        assert_eq!(json["action"], "start_for_updates");
        assert_eq!(json["powerState"], "running");
        assert_eq!(json["result"], "succeeded");
        assert_eq!(json["wait_retries"], 3);
        assert_eq!(json["type"], "microsoft.compute/virtualmachines");
        assert!(json.get("timestamp").is_some());
        assert!(json.get("resourceId").is_some());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn tag_check_finding_becomes_failed_tagcheck_event() {
        let finding = TagCheckFinding {
            resource_id: "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm1".into(),
            kind: ResourceKind::VirtualMachine,
            tag: "Schedule".into(),
            value: "Buisness".into(),
            reason: "unknown preset".into(),
        };
        let event = finding.to_event(PowerState::Stopped);
        assert_eq!(event.event, EventName::TagCheck);
        assert_eq!(event.result, ActionResult::Failed);
        assert!(event.error.unwrap().contains("'Buisness'"));
    }

    #[test]
    fn action_targets() {
        assert_eq!(PowerAction::Start.target_state(), PowerState::Running);
        assert_eq!(PowerAction::StartForUpdates.target_state(), PowerState::Running);
        assert_eq!(PowerAction::StopPostUpdates.target_state(), PowerState::Stopped);
        assert!(PowerAction::StopPostUpdates.is_maintenance());
    }

    fn window(end: Option<DateTime<Utc>>, status: WindowStatus) -> MaintenanceWindow {
        MaintenanceWindow {
            id: "run-1".into(),
            target: WindowTarget::UpdateRun,
            start: Utc.with_ymd_and_hms(2026, 1, 5, 2, 0, 0).unwrap(),
            end,
            status,
        }
    }

    #[test]
    fn window_status_follows_bounds() {
        let end = Utc.with_ymd_and_hms(2026, 1, 5, 4, 0, 0).unwrap();
        let w = window(Some(end), WindowStatus::Active);
        assert_eq!(
            w.status_at(Utc.with_ymd_and_hms(2026, 1, 5, 1, 0, 0).unwrap()),
            WindowStatus::Pending
        );
        assert_eq!(
            w.status_at(Utc.with_ymd_and_hms(2026, 1, 5, 3, 0, 0).unwrap()),
            WindowStatus::Active
        );
        assert_eq!(w.status_at(end), WindowStatus::Completed);

        let open = window(None, WindowStatus::Active);
        assert_eq!(
            open.status_at(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()),
            WindowStatus::Active
        );
    }

    #[test]
    fn late_start_notification_is_stale() {
        let end = Utc.with_ymd_and_hms(2026, 1, 5, 4, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 1, 5, 5, 0, 0).unwrap();
        assert!(window(Some(end), WindowStatus::Active).is_stale_start(late));
        assert!(!window(Some(end), WindowStatus::Completed).is_stale_start(late));
        assert!(!window(None, WindowStatus::Active).is_stale_start(late));
    }

    #[test]
    fn hold_lasts_until_end_plus_grace() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 1, 0, 0).unwrap();
        let grace = chrono::Duration::minutes(60);
        assert_eq!(window(None, WindowStatus::Active).hold_until(now, grace), now + grace);
        let end = Utc.with_ymd_and_hms(2026, 1, 5, 3, 0, 0).unwrap();
        assert_eq!(
            window(Some(end), WindowStatus::Active).hold_until(now, grace),
            end + grace
        );
        // An end already in the past still holds for the grace period.
        let past = Utc.with_ymd_and_hms(2026, 1, 4, 0, 0, 0).unwrap();
        assert_eq!(
            window(Some(past), WindowStatus::Active).hold_until(now, grace),
            now + grace
        );
    }
}
