//! Payloads carried on the four durable queues.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::{PowerAction, WindowStatus};
use crate::resource::ResourceKind;

/// An inventory scope a scan covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Scope {
    Subscription(String),
    ManagementGroup(String),
    /// Full `/subscriptions/{sub}/resourceGroups/{rg}` path.
    ResourceGroup(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Subscription(id) => write!(f, "subscription:{id}"),
            Scope::ManagementGroup(id) => write!(f, "management_group:{id}"),
            Scope::ResourceGroup(path) => write!(f, "resource_group:{path}"),
        }
    }
}

/// Discovery queue: scan one scope for the tick ending at `tick_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub scope: Scope,
    pub tick_at: DateTime<Utc>,
    /// Previous tick the trigger emitted, used by the catch-up policy.
    #[serde(default)]
    pub previous_tick: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOrigin {
    Schedule,
    Maintenance,
}

/// Power-management events queue: one requested action for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerActionRequest {
    pub resource_id: String,
    pub kind: ResourceKind,
    pub action: PowerAction,
    pub origin: ActionOrigin,
    pub created_at: DateTime<Utc>,
    /// Correlation id of the maintenance window, for maintenance actions.
    #[serde(default)]
    pub window_id: Option<String>,
    /// Rule that produced the action, for logs.
    #[serde(default)]
    pub reason: Option<String>,
}

impl PowerActionRequest {
    pub fn scheduled(
        resource_id: impl Into<String>,
        kind: ResourceKind,
        action: PowerAction,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            kind,
            action,
            origin: ActionOrigin::Schedule,
            created_at: Utc::now(),
            window_id: None,
            reason: Some(reason.into()),
        }
    }

    pub fn maintenance(
        resource_id: impl Into<String>,
        kind: ResourceKind,
        action: PowerAction,
        window_id: impl Into<String>,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            kind,
            action,
            origin: ActionOrigin::Maintenance,
            created_at: Utc::now(),
            window_id: Some(window_id.into()),
            reason: None,
        }
    }
}

/// Deferred-check queue: re-inspect a resource after a dispatched action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredCheck {
    pub action_id: Uuid,
    pub resource_id: String,
    pub kind: ResourceKind,
    pub action: PowerAction,
    pub wait_retries: u32,
    pub dispatched_at: DateTime<Utc>,
    /// Status tag written once the action converges.
    #[serde(default)]
    pub status_text: Option<String>,
}

impl DeferredCheck {
    /// The follow-up check after another unconverged observation.
    pub fn next_retry(&self) -> Self {
        Self {
            wait_retries: self.wait_retries + 1,
            ..self.clone()
        }
    }
}

/// Update-management queue: event-grid shaped maintenance notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateMgmtEvent {
    pub id: String,
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(rename = "eventTime", default)]
    pub event_time: Option<DateTime<Utc>>,
    pub data: UpdateMgmtData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateMgmtData {
    #[serde(rename = "CorrelationId")]
    pub correlation_id: String,
    #[serde(rename = "MaintenanceConfigurationId", default)]
    pub maintenance_configuration_id: Option<String>,
    #[serde(rename = "StartDateTime", default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(rename = "EndDateTime", default)]
    pub end: Option<DateTime<Utc>>,
    /// Restricts the window to one resource group instead of a target lookup.
    #[serde(rename = "ResourceGroup", default)]
    pub resource_group: Option<String>,
}

impl UpdateMgmtEvent {
    pub fn is_pre_maintenance(&self) -> bool {
        self.event_type.contains("PreMaintenance")
    }

    /// Lifecycle status this event signals.
    pub fn window_status(&self) -> WindowStatus {
        if self.is_pre_maintenance() {
            WindowStatus::Active
        } else {
            WindowStatus::Completed
        }
    }
}
