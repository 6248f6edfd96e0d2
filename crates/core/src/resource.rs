//! Resource descriptors produced by discovery.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PowerMgmtError;

/// Tag holding a named schedule preset.
pub const TAG_SCHEDULE: &str = "Schedule";
/// Tag holding a power-on day-list or cron rule.
pub const TAG_POWER_ON: &str = "PowerOn";
/// Tag holding a power-off day-list or cron rule.
pub const TAG_POWER_OFF: &str = "PowerOff";
/// Tag selecting which feature of a multi-feature resource is managed.
pub const TAG_FEATURE_SUBTYPE: &str = "PowerMgmtFeature";
/// Any value opts the resource out of power management.
pub const TAG_EXEMPT: &str = "_POWERMGMT_EXEMPT_";
/// Status text written back by the dispatcher.
pub const TAG_STATUS: &str = "_POWERMGMT_STATUS_";
/// Timestamp of the last status write.
pub const TAG_STATUS_TIME: &str = "_POWERMGMT_LASTUPDATED_";

/// Tags whose presence puts a resource in scope.
pub const POWER_TAGS: &[&str] = &[TAG_SCHEDULE, TAG_POWER_ON, TAG_POWER_OFF];

/// Kinds of resource the engine can power-manage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    VirtualMachine,
    ManagedCluster,
    ApplicationGateway,
    FlexibleDatabaseServer,
    StorageSftpFeature,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::VirtualMachine,
        ResourceKind::ManagedCluster,
        ResourceKind::ApplicationGateway,
        ResourceKind::FlexibleDatabaseServer,
        ResourceKind::StorageSftpFeature,
    ];

    /// Lower-cased ARM provider type for this kind.
    pub fn arm_type(&self) -> &'static str {
        match self {
            ResourceKind::VirtualMachine => "microsoft.compute/virtualmachines",
            ResourceKind::ManagedCluster => "microsoft.containerservice/managedclusters",
            ResourceKind::ApplicationGateway => "microsoft.network/applicationgateways",
            ResourceKind::FlexibleDatabaseServer => "microsoft.dbforpostgresql/flexibleservers",
            ResourceKind::StorageSftpFeature => "microsoft.storage/storageaccounts",
        }
    }

    /// Short feature code used by `TYPES_ENABLED`.
    pub fn feature_code(&self) -> &'static str {
        match self {
            ResourceKind::VirtualMachine => "vm",
            ResourceKind::ManagedCluster => "aks",
            ResourceKind::ApplicationGateway => "agw",
            ResourceKind::FlexibleDatabaseServer => "psql",
            ResourceKind::StorageSftpFeature => "sftp",
        }
    }

    pub fn from_feature_code(code: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.feature_code().eq_ignore_ascii_case(code.trim()))
    }

    /// Map an ARM type (case-insensitive) back to a kind.
    ///
    /// Storage accounts only map to [`ResourceKind::StorageSftpFeature`] when
    /// the caller has already checked the feature sub-type tag.
    pub fn from_arm_type(arm_type: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.arm_type().eq_ignore_ascii_case(arm_type))
    }

    /// Tag value of [`TAG_FEATURE_SUBTYPE`] required before the kind is managed.
    pub fn required_subtype(&self) -> Option<&'static str> {
        match self {
            ResourceKind::StorageSftpFeature => Some("sftp"),
            _ => None,
        }
    }

    /// Whether a start may be issued from `state`.
    ///
    /// An [`PowerState::Unknown`] state never admits a schedule action.
    pub fn accepts_start(&self, state: PowerState) -> bool {
        match self {
            // Flexible servers take a long time to transition; only act on a settled state.
            ResourceKind::FlexibleDatabaseServer => state == PowerState::Stopped,
            _ => matches!(state, PowerState::Stopped | PowerState::Stopping),
        }
    }

    /// Whether a stop may be issued from `state`.
    pub fn accepts_stop(&self, state: PowerState) -> bool {
        match self {
            ResourceKind::FlexibleDatabaseServer => state == PowerState::Running,
            _ => matches!(state, PowerState::Running | PowerState::Starting),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.arm_type())
    }
}

/// Last observed power state of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Running,
    Starting,
    Stopping,
    Stopped,
    Unknown,
}

impl PowerState {
    pub fn is_transitioning(&self) -> bool {
        matches!(self, PowerState::Starting | PowerState::Stopping)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::Running => "running",
            PowerState::Starting => "starting",
            PowerState::Stopping => "stopping",
            PowerState::Stopped => "stopped",
            PowerState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discovered resource. Produced fresh every scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub id: String,
    pub kind: ResourceKind,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub power_state: PowerState,
}

impl ResourceDescriptor {
    pub fn new(id: impl Into<String>, kind: ResourceKind, power_state: PowerState) -> Self {
        Self {
            id: id.into(),
            kind,
            tags: BTreeMap::new(),
            power_state,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn is_exempt(&self) -> bool {
        self.tags.contains_key(TAG_EXEMPT)
    }

    /// Name segment of the resource path (last component).
    pub fn name(&self) -> &str {
        self.id.rsplit('/').next().unwrap_or(&self.id)
    }
}

/// Decoded parts of an ARM resource path
/// (`/subscriptions/{sub}/resourceGroups/{rg}/providers/{ns}/{type}/{name}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePath {
    pub subscription_id: String,
    pub resource_group: String,
    pub provider_type: String,
    pub name: String,
}

impl FromStr for ResourcePath {
    type Err = PowerMgmtError;

    fn from_str(id: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = id.trim_matches('/').split('/').collect();
        if parts.len() < 8
            || !parts[0].eq_ignore_ascii_case("subscriptions")
            || !parts[2].eq_ignore_ascii_case("resourcegroups")
            || !parts[4].eq_ignore_ascii_case("providers")
        {
            return Err(PowerMgmtError::InvalidResourceId(id.to_string()));
        }
        Ok(Self {
            subscription_id: parts[1].to_string(),
            resource_group: parts[3].to_string(),
            provider_type: format!("{}/{}", parts[5], parts[6]).to_lowercase(),
            name: parts[7].to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VM_ID: &str = "/subscriptions/0000-1111/resourceGroups/rg-dev/providers/Microsoft.Compute/virtualMachines/vm-build-01";

    #[test]
    fn resource_path_decodes_arm_id() {
        let path: ResourcePath = VM_ID.parse().unwrap();
        assert_eq!(path.subscription_id, "0000-1111");
        assert_eq!(path.resource_group, "rg-dev");
        assert_eq!(path.provider_type, "microsoft.compute/virtualmachines");
        assert_eq!(path.name, "vm-build-01");
    }

    #[test]
    fn resource_path_rejects_short_ids() {
        assert!("/subscriptions/abc".parse::<ResourcePath>().is_err());
        assert!("not-an-id".parse::<ResourcePath>().is_err());
    }

    #[test]
    fn kind_round_trips_through_arm_type() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_arm_type(kind.arm_type()), Some(kind));
        }
        assert_eq!(
            ResourceKind::from_arm_type("Microsoft.Compute/virtualMachines"),
            Some(ResourceKind::VirtualMachine)
        );
    }

    #[test]
    fn flexible_server_only_acts_from_settled_states() {
        let pg = ResourceKind::FlexibleDatabaseServer;
        assert!(pg.accepts_start(PowerState::Stopped));
        assert!(!pg.accepts_start(PowerState::Unknown));
        assert!(pg.accepts_stop(PowerState::Running));
        assert!(!pg.accepts_stop(PowerState::Starting));

        let vm = ResourceKind::VirtualMachine;
        assert!(vm.accepts_start(PowerState::Stopping));
        assert!(!vm.accepts_start(PowerState::Starting));
        assert!(vm.accepts_stop(PowerState::Starting));
        assert!(!vm.accepts_stop(PowerState::Stopping));
    }

    #[test]
    fn unknown_state_admits_no_action() {
        for kind in ResourceKind::ALL {
            assert!(!kind.accepts_start(PowerState::Unknown), "{kind}");
            assert!(!kind.accepts_stop(PowerState::Unknown), "{kind}");
        }
    }

    #[test]
    fn descriptor_name_and_exemption() {
        let d = ResourceDescriptor::new(VM_ID, ResourceKind::VirtualMachine, PowerState::Running)
            .with_tag(TAG_EXEMPT, "yes");
        assert_eq!(d.name(), "vm-build-01");
        assert!(d.is_exempt());
    }
}
