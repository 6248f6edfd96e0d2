//! One control-plane adapter per resource kind.
//!
//! Every operation is idempotent on the ARM side: starting a running
//! resource or stopping a stopped one is accepted.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use powermgmt_core::{PowerState, ResourceKind};
use serde_json::{json, Value};

use super::client::ArmClient;
use crate::dispatcher::AdapterRegistry;
use crate::traits::{
    ControlError, KindAdapter, PowerObservable, Startable, StopTagging, Stoppable, Taggable,
};

const TAGS_API_VERSION: &str = "2021-04-01";
const VM_API_VERSION: &str = "2024-07-01";
const AKS_API_VERSION: &str = "2024-05-01";
const AGW_API_VERSION: &str = "2024-05-01";
const PSQL_API_VERSION: &str = "2022-12-01";
const STORAGE_API_VERSION: &str = "2023-05-01";

/// Map the per-kind state string to a [`PowerState`].
///
/// Accepts both control-plane values and the codes the inventory projects.
pub fn parse_power_code(kind: ResourceKind, code: &str) -> PowerState {
    let code = code.trim().to_ascii_lowercase();
    let code = code.strip_prefix("powerstate/").unwrap_or(&code);
    match (kind, code) {
        (ResourceKind::VirtualMachine, "running") => PowerState::Running,
        (ResourceKind::VirtualMachine, "starting") => PowerState::Starting,
        (ResourceKind::VirtualMachine, "deallocating" | "stopping") => PowerState::Stopping,
        (ResourceKind::VirtualMachine, "deallocated") => PowerState::Stopped,
        // Stopped but still allocated: neither schedule action applies.
        (ResourceKind::VirtualMachine, _) => PowerState::Unknown,
        (ResourceKind::FlexibleDatabaseServer, "ready") => PowerState::Running,
        (_, "running") => PowerState::Running,
        (_, "starting") => PowerState::Starting,
        (_, "stopping") => PowerState::Stopping,
        (_, "stopped") => PowerState::Stopped,
        _ => PowerState::Unknown,
    }
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Result<&'a str, ControlError> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .ok_or_else(|| ControlError::Decode(format!("missing {pointer}")))
}

async fn merge_tags(
    arm: &ArmClient,
    resource_id: &str,
    tags: &BTreeMap<String, String>,
) -> Result<(), ControlError> {
    let body = json!({ "operation": "Merge", "properties": { "tags": tags } });
    arm.patch(
        &format!("{resource_id}/providers/Microsoft.Resources/tags/default"),
        TAGS_API_VERSION,
        &body,
    )
    .await
    .map(|_| ())
}

// ── Virtual machines ────────────────────────────────────────────────

pub struct VirtualMachineAdapter {
    arm: Arc<ArmClient>,
}

impl VirtualMachineAdapter {
    pub fn new(arm: Arc<ArmClient>) -> Self {
        Self { arm }
    }
}

/// Power state from a VM instance view's `statuses`.
pub fn vm_power_state(instance_view: &Value) -> PowerState {
    instance_view["statuses"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|s| s["code"].as_str())
        .find(|code| code.starts_with("PowerState/"))
        .map_or(PowerState::Unknown, |code| {
            parse_power_code(ResourceKind::VirtualMachine, code)
        })
}

#[async_trait]
impl PowerObservable for VirtualMachineAdapter {
    async fn power_state(&self, resource_id: &str) -> Result<PowerState, ControlError> {
        let view = self
            .arm
            .get(&format!("{resource_id}/instanceView"), VM_API_VERSION)
            .await?;
        Ok(vm_power_state(&view))
    }
}

#[async_trait]
impl Startable for VirtualMachineAdapter {
    async fn start(&self, resource_id: &str) -> Result<(), ControlError> {
        self.arm
            .post(&format!("{resource_id}/start"), VM_API_VERSION, None)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl Stoppable for VirtualMachineAdapter {
    /// Deallocates, so compute is no longer billed.
    async fn stop(&self, resource_id: &str) -> Result<(), ControlError> {
        self.arm
            .post(&format!("{resource_id}/deallocate"), VM_API_VERSION, None)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl Taggable for VirtualMachineAdapter {
    async fn merge_tags(&self, resource_id: &str, tags: &BTreeMap<String, String>) -> Result<(), ControlError> {
        merge_tags(&self.arm, resource_id, tags).await
    }
}

impl KindAdapter for VirtualMachineAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::VirtualMachine
    }
}

// ── Managed clusters ────────────────────────────────────────────────

pub struct ManagedClusterAdapter {
    arm: Arc<ArmClient>,
}

impl ManagedClusterAdapter {
    pub fn new(arm: Arc<ArmClient>) -> Self {
        Self { arm }
    }
}

/// A cluster reports `Running`/`Stopped` in `powerState` and the transition
/// in `provisioningState`.
pub fn cluster_power_state(cluster: &Value) -> Result<PowerState, ControlError> {
    let provisioning = cluster
        .pointer("/properties/provisioningState")
        .and_then(Value::as_str)
        .unwrap_or_default();
    match provisioning {
        "Starting" => return Ok(PowerState::Starting),
        "Stopping" => return Ok(PowerState::Stopping),
        _ => {}
    }
    let code = str_at(cluster, "/properties/powerState/code")?;
    Ok(parse_power_code(ResourceKind::ManagedCluster, code))
}

#[async_trait]
impl PowerObservable for ManagedClusterAdapter {
    async fn power_state(&self, resource_id: &str) -> Result<PowerState, ControlError> {
        let cluster = self.arm.get(resource_id, AKS_API_VERSION).await?;
        cluster_power_state(&cluster)
    }
}

#[async_trait]
impl Startable for ManagedClusterAdapter {
    async fn start(&self, resource_id: &str) -> Result<(), ControlError> {
        self.arm
            .post(&format!("{resource_id}/start"), AKS_API_VERSION, None)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl Stoppable for ManagedClusterAdapter {
    async fn stop(&self, resource_id: &str) -> Result<(), ControlError> {
        self.arm
            .post(&format!("{resource_id}/stop"), AKS_API_VERSION, None)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl Taggable for ManagedClusterAdapter {
    async fn merge_tags(&self, resource_id: &str, tags: &BTreeMap<String, String>) -> Result<(), ControlError> {
        merge_tags(&self.arm, resource_id, tags).await
    }
}

impl KindAdapter for ManagedClusterAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ManagedCluster
    }
}

// ── Application gateways ────────────────────────────────────────────

pub struct AppGatewayAdapter {
    arm: Arc<ArmClient>,
}

impl AppGatewayAdapter {
    pub fn new(arm: Arc<ArmClient>) -> Self {
        Self { arm }
    }
}

#[async_trait]
impl PowerObservable for AppGatewayAdapter {
    async fn power_state(&self, resource_id: &str) -> Result<PowerState, ControlError> {
        let gateway = self.arm.get(resource_id, AGW_API_VERSION).await?;
        let state = str_at(&gateway, "/properties/operationalState")?;
        Ok(parse_power_code(ResourceKind::ApplicationGateway, state))
    }
}

#[async_trait]
impl Startable for AppGatewayAdapter {
    async fn start(&self, resource_id: &str) -> Result<(), ControlError> {
        self.arm
            .post(&format!("{resource_id}/start"), AGW_API_VERSION, None)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl Stoppable for AppGatewayAdapter {
    async fn stop(&self, resource_id: &str) -> Result<(), ControlError> {
        self.arm
            .post(&format!("{resource_id}/stop"), AGW_API_VERSION, None)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl Taggable for AppGatewayAdapter {
    async fn merge_tags(&self, resource_id: &str, tags: &BTreeMap<String, String>) -> Result<(), ControlError> {
        merge_tags(&self.arm, resource_id, tags).await
    }
}

impl KindAdapter for AppGatewayAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ApplicationGateway
    }

    // A tag update re-provisions the gateway, which starts it again.
    fn stop_tagging(&self) -> StopTagging {
        StopTagging::Never
    }
}

// ── Flexible database servers ───────────────────────────────────────

pub struct FlexibleServerAdapter {
    arm: Arc<ArmClient>,
}

impl FlexibleServerAdapter {
    pub fn new(arm: Arc<ArmClient>) -> Self {
        Self { arm }
    }
}

#[async_trait]
impl PowerObservable for FlexibleServerAdapter {
    async fn power_state(&self, resource_id: &str) -> Result<PowerState, ControlError> {
        let server = self.arm.get(resource_id, PSQL_API_VERSION).await?;
        let state = str_at(&server, "/properties/state")?;
        Ok(parse_power_code(ResourceKind::FlexibleDatabaseServer, state))
    }
}

#[async_trait]
impl Startable for FlexibleServerAdapter {
    async fn start(&self, resource_id: &str) -> Result<(), ControlError> {
        self.arm
            .post(&format!("{resource_id}/start"), PSQL_API_VERSION, None)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl Stoppable for FlexibleServerAdapter {
    async fn stop(&self, resource_id: &str) -> Result<(), ControlError> {
        self.arm
            .post(&format!("{resource_id}/stop"), PSQL_API_VERSION, None)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl Taggable for FlexibleServerAdapter {
    async fn merge_tags(&self, resource_id: &str, tags: &BTreeMap<String, String>) -> Result<(), ControlError> {
        merge_tags(&self.arm, resource_id, tags).await
    }
}

impl KindAdapter for FlexibleServerAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::FlexibleDatabaseServer
    }

    // Stopped servers reject tag updates.
    fn stop_tagging(&self) -> StopTagging {
        StopTagging::BeforeStop
    }
}

// ── Storage SFTP endpoint ───────────────────────────────────────────

/// Treats a storage account's SFTP endpoint as the powered resource.
pub struct SftpAdapter {
    arm: Arc<ArmClient>,
}

impl SftpAdapter {
    pub fn new(arm: Arc<ArmClient>) -> Self {
        Self { arm }
    }

    async fn set_enabled(&self, resource_id: &str, enabled: bool) -> Result<(), ControlError> {
        let body = json!({ "properties": { "isSftpEnabled": enabled } });
        self.arm
            .patch(resource_id, STORAGE_API_VERSION, &body)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl PowerObservable for SftpAdapter {
    async fn power_state(&self, resource_id: &str) -> Result<PowerState, ControlError> {
        let account = self.arm.get(resource_id, STORAGE_API_VERSION).await?;
        Ok(
            match account.pointer("/properties/isSftpEnabled").and_then(Value::as_bool) {
                Some(true) => PowerState::Running,
                Some(false) | None => PowerState::Stopped,
            },
        )
    }
}

#[async_trait]
impl Startable for SftpAdapter {
    async fn start(&self, resource_id: &str) -> Result<(), ControlError> {
        self.set_enabled(resource_id, true).await
    }
}

#[async_trait]
impl Stoppable for SftpAdapter {
    async fn stop(&self, resource_id: &str) -> Result<(), ControlError> {
        self.set_enabled(resource_id, false).await
    }
}

#[async_trait]
impl Taggable for SftpAdapter {
    async fn merge_tags(&self, resource_id: &str, tags: &BTreeMap<String, String>) -> Result<(), ControlError> {
        merge_tags(&self.arm, resource_id, tags).await
    }
}

impl KindAdapter for SftpAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::StorageSftpFeature
    }
}

/// Registry of ARM adapters for `kinds`.
pub fn registry(arm: Arc<ArmClient>, kinds: &[ResourceKind]) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    for kind in kinds {
        let adapter: Arc<dyn KindAdapter> = match kind {
            ResourceKind::VirtualMachine => Arc::new(VirtualMachineAdapter::new(arm.clone())),
            ResourceKind::ManagedCluster => Arc::new(ManagedClusterAdapter::new(arm.clone())),
            ResourceKind::ApplicationGateway => Arc::new(AppGatewayAdapter::new(arm.clone())),
            ResourceKind::FlexibleDatabaseServer => Arc::new(FlexibleServerAdapter::new(arm.clone())),
            ResourceKind::StorageSftpFeature => Arc::new(SftpAdapter::new(arm.clone())),
        };
        registry.register(adapter);
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vm_instance_view_power_codes() {
        let view = json!({
            "statuses": [
                { "code": "ProvisioningState/succeeded" },
                { "code": "PowerState/deallocating" }
            ]
        });
        assert_eq!(vm_power_state(&view), PowerState::Stopping);
        assert_eq!(vm_power_state(&json!({ "statuses": [] })), PowerState::Unknown);
        assert_eq!(
            parse_power_code(ResourceKind::VirtualMachine, "PowerState/deallocated"),
            PowerState::Stopped
        );
        // Stopped but still allocated.
        assert_eq!(
            parse_power_code(ResourceKind::VirtualMachine, "PowerState/stopped"),
            PowerState::Unknown
        );
    }

    #[test]
    fn cluster_transition_comes_from_provisioning_state() {
        let starting = json!({ "properties": { "provisioningState": "Starting", "powerState": { "code": "Stopped" } } });
        assert_eq!(cluster_power_state(&starting).unwrap(), PowerState::Starting);
        let running = json!({ "properties": { "provisioningState": "Succeeded", "powerState": { "code": "Running" } } });
        assert_eq!(cluster_power_state(&running).unwrap(), PowerState::Running);
        assert!(cluster_power_state(&json!({})).is_err());
    }

    #[test]
    fn flexible_server_ready_means_running() {
        let kind = ResourceKind::FlexibleDatabaseServer;
        assert_eq!(parse_power_code(kind, "Ready"), PowerState::Running);
        assert_eq!(parse_power_code(kind, "Stopped"), PowerState::Stopped);
        assert_eq!(parse_power_code(kind, "Updating"), PowerState::Unknown);
    }

    #[test]
    fn gateway_operational_states() {
        let kind = ResourceKind::ApplicationGateway;
        assert_eq!(parse_power_code(kind, "Running"), PowerState::Running);
        assert_eq!(parse_power_code(kind, "Stopping"), PowerState::Stopping);
    }
}
