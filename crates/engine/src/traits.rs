//! Capability traits for the cloud collaborators.
//!
//! Each resource kind gets one adapter implementing the capabilities it
//! supports. The dispatcher only ever sees these traits.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use powermgmt_core::{PowerState, ResourceDescriptor, ResourceKind, Scope};

/// Errors from a control-plane, inventory or alerting call.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Throttled, conflicting operation, or a transient server fault.
    #[error("retryable: {0}")]
    Retryable(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Fatal(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ControlError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ControlError::Retryable(_) => true,
            ControlError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Reads the current power state of one resource.
#[async_trait]
pub trait PowerObservable: Send + Sync {
    async fn power_state(&self, resource_id: &str) -> Result<PowerState, ControlError>;
}

#[async_trait]
pub trait Startable: Send + Sync {
    /// Must succeed when the resource is already running.
    async fn start(&self, resource_id: &str) -> Result<(), ControlError>;
}

#[async_trait]
pub trait Stoppable: Send + Sync {
    /// Must succeed when the resource is already stopped.
    async fn stop(&self, resource_id: &str) -> Result<(), ControlError>;
}

#[async_trait]
pub trait Taggable: Send + Sync {
    /// Merge `tags` into the resource's existing tags.
    async fn merge_tags(
        &self,
        resource_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), ControlError>;
}

/// When status tags may be written around a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTagging {
    /// After the stop has converged.
    AfterStop,
    /// Before issuing the stop; the resource rejects tag writes once stopped.
    BeforeStop,
    /// Never; a tag write would restart the resource.
    Never,
}

/// Everything the dispatcher needs from one resource kind.
pub trait KindAdapter: PowerObservable + Startable + Stoppable + Taggable {
    fn kind(&self) -> ResourceKind;

    fn stop_tagging(&self) -> StopTagging {
        StopTagging::AfterStop
    }
}

/// Inventory query collaborator.
#[async_trait]
pub trait InventoryQuery: Send + Sync {
    /// Power-tagged resources of `kinds` under `scope`.
    async fn query(
        &self,
        scope: &Scope,
        kinds: &[ResourceKind],
    ) -> Result<Vec<ResourceDescriptor>, ControlError>;

    /// Resources assigned to the maintenance run `correlation_id`.
    async fn maintenance_targets(
        &self,
        correlation_id: &str,
        kinds: &[ResourceKind],
    ) -> Result<Vec<ResourceDescriptor>, ControlError>;
}

/// Alert-suppression collaborator.
#[async_trait]
pub trait AlertSuppressor: Send + Sync {
    async fn suppress(&self, resource_id: &str, duration: Duration) -> Result<(), ControlError>;
}

/// Suppressor used when alert suppression is disabled.
pub struct NoAlertSuppression;

#[async_trait]
impl AlertSuppressor for NoAlertSuppression {
    async fn suppress(&self, _resource_id: &str, _duration: Duration) -> Result<(), ControlError> {
        Ok(())
    }
}
