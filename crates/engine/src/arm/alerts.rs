//! Alert suppression through alert processing rules.
//!
//! Each resource gets one rule, `AzAPR_{name}_disableactiongroup`, in its own
//! resource group. The rule removes all action groups for alerts on the
//! resource until its schedule lapses, so re-applying it only moves the end.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use powermgmt_core::ResourcePath;
use serde_json::{json, Value};

use super::client::ArmClient;
use crate::traits::{AlertSuppressor, ControlError};

const ALERTS_API_VERSION: &str = "2021-08-08";

pub struct ArmAlertSuppressor {
    arm: Arc<ArmClient>,
}

impl ArmAlertSuppressor {
    pub fn new(arm: Arc<ArmClient>) -> Self {
        Self { arm }
    }
}

pub fn rule_name(resource_name: &str) -> String {
    format!("AzAPR_{resource_name}_disableactiongroup")
}

fn rule_body(resource_id: &str, duration: Duration) -> Value {
    let now = Utc::now();
    let until = now + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::minutes(30));
    json!({
        "location": "Global",
        "properties": {
            "scopes": [resource_id],
            "description": "This processing rule suppresses notifications to all action groups",
            "actions": [{ "actionType": "RemoveAllActionGroups" }],
            "schedule": {
                "effectiveFrom": now.format("%Y-%m-%dT%H:%M:%S").to_string(),
                "effectiveUntil": until.format("%Y-%m-%dT%H:%M:%S").to_string(),
                "timeZone": "UTC",
            },
            "enabled": true,
        },
        "tags": { "_POWERMGMT_LASTUPDATED_": now.to_rfc3339_opts(SecondsFormat::Secs, true) },
    })
}

#[async_trait]
impl AlertSuppressor for ArmAlertSuppressor {
    async fn suppress(&self, resource_id: &str, duration: Duration) -> Result<(), ControlError> {
        let path: ResourcePath = resource_id
            .parse()
            .map_err(|e: powermgmt_core::PowerMgmtError| ControlError::Fatal(e.to_string()))?;
        let rule = format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.AlertsManagement/actionRules/{}",
            path.subscription_id,
            path.resource_group,
            rule_name(&path.name)
        );
        self.arm
            .put(&rule, ALERTS_API_VERSION, &rule_body(resource_id, duration))
            .await?;
        tracing::debug!(resource_id, rule = %rule, minutes = duration.as_secs() / 60, "Alerts suppressed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_targets_resource_and_removes_action_groups() {
        let id = "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm1";
        let body = rule_body(id, Duration::from_secs(1800));
        assert_eq!(body["properties"]["scopes"][0], id);
        assert_eq!(body["properties"]["actions"][0]["actionType"], "RemoveAllActionGroups");
        assert!(body["properties"]["schedule"]["effectiveUntil"].is_string());
        assert_eq!(rule_name("vm1"), "AzAPR_vm1_disableactiongroup");
    }
}
