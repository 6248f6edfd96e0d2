//! Inventory over Azure Resource Graph.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use powermgmt_core::config::{DispatchConfig, ScopeConfig};
use powermgmt_core::{ResourceDescriptor, ResourceKind, Scope, POWER_TAGS};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::adapters::parse_power_code;
use super::client::ArmClient;
use crate::retry::with_retry;
use crate::traits::{ControlError, InventoryQuery};

const GRAPH_API_VERSION: &str = "2022-10-01";
const GRAPH_PATH: &str = "/providers/Microsoft.ResourceGraph/resources";
/// Upper bound on pages followed for one query.
const MAX_PAGES: usize = 50;

#[derive(Debug, Deserialize)]
struct GraphRow {
    id: String,
    #[serde(rename = "type")]
    resource_type: String,
    #[serde(default)]
    tags: Option<BTreeMap<String, String>>,
    #[serde(rename = "powerState", default)]
    power_state: Option<String>,
}

/// One page of a Resource Graph response.
#[derive(Debug, Deserialize)]
struct GraphPage {
    #[serde(default)]
    data: Vec<GraphRow>,
    #[serde(rename = "$skipToken", default)]
    skip_token: Option<String>,
}

pub struct ResourceGraphInventory {
    arm: Arc<ArmClient>,
    /// Default scope for maintenance lookups.
    maintenance_scope: Vec<Scope>,
    retry: DispatchConfig,
}

impl ResourceGraphInventory {
    pub fn new(arm: Arc<ArmClient>, scopes: &ScopeConfig, retry: DispatchConfig) -> Self {
        let maintenance_scope = match &scopes.inventory_scope {
            Some(group) => vec![Scope::ManagementGroup(group.clone())],
            None => scopes.scan_scopes(),
        };
        Self {
            arm,
            maintenance_scope,
            retry,
        }
    }

    async fn run(&self, scopes: &[Scope], query: &str) -> Result<Vec<GraphRow>, ControlError> {
        let mut rows = Vec::new();
        let mut skip_token: Option<String> = None;

        for page in 0..MAX_PAGES {
            let body = request_body(scopes, query, skip_token.as_deref());
            let value = with_retry(&self.retry, "resource_graph", || {
                self.arm.post(GRAPH_PATH, GRAPH_API_VERSION, Some(&body))
            })
            .await?;
            let result: GraphPage = serde_json::from_value(value)
                .map_err(|e| ControlError::Decode(format!("resource graph page {page}: {e}")))?;
            rows.extend(result.data);

            match result.skip_token {
                Some(token) if !token.is_empty() => skip_token = Some(token),
                _ => break,
            }
        }
        debug!(rows = rows.len(), "Resource graph query complete");
        Ok(rows)
    }
}

#[async_trait]
impl InventoryQuery for ResourceGraphInventory {
    async fn query(&self, scope: &Scope, kinds: &[ResourceKind]) -> Result<Vec<ResourceDescriptor>, ControlError> {
        if kinds.is_empty() {
            return Ok(Vec::new());
        }
        let (scopes, filter) = match scope {
            Scope::ResourceGroup(path) => {
                let (subscription, group) = split_group_path(path)?;
                (
                    vec![Scope::Subscription(subscription.to_string())],
                    format!("| where resourceGroup =~ '{}'\n", escape_kql(group)),
                )
            }
            other => (vec![other.clone()], String::new()),
        };
        let query = format!("{}{filter}{}", resources_query(kinds), PROJECTION);
        let rows = self.run(&scopes, &query).await?;
        Ok(rows.into_iter().filter_map(into_descriptor).collect())
    }

    async fn maintenance_targets(
        &self,
        correlation_id: &str,
        kinds: &[ResourceKind],
    ) -> Result<Vec<ResourceDescriptor>, ControlError> {
        if kinds.is_empty() {
            return Ok(Vec::new());
        }
        let query = maintenance_query(correlation_id, kinds);
        let rows = self.run(&self.maintenance_scope, &query).await?;
        Ok(rows.into_iter().filter_map(into_descriptor).collect())
    }
}

const PROJECTION: &str = "| project id, type, tags, powerState\n| order by id asc";

fn request_body(scopes: &[Scope], query: &str, skip_token: Option<&str>) -> Value {
    let mut body = json!({
        "query": query,
        "options": { "resultFormat": "objectArray", "$top": 1000 },
    });
    let subscriptions: Vec<&str> = scopes
        .iter()
        .filter_map(|s| match s {
            Scope::Subscription(id) => Some(id.as_str()),
            _ => None,
        })
        .collect();
    let groups: Vec<&str> = scopes
        .iter()
        .filter_map(|s| match s {
            Scope::ManagementGroup(id) => Some(id.as_str()),
            _ => None,
        })
        .collect();
    if !subscriptions.is_empty() {
        body["subscriptions"] = json!(subscriptions);
    }
    if !groups.is_empty() {
        body["managementGroups"] = json!(groups);
    }
    if let Some(token) = skip_token {
        body["options"]["$skipToken"] = json!(token);
    }
    body
}

fn type_list(kinds: &[ResourceKind]) -> String {
    kinds
        .iter()
        .map(|k| format!("'{}'", k.arm_type()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Per-kind power state projection, normalized by [`parse_power_code`].
const POWER_STATE_EXTEND: &str = "| extend powerState = case(
    type =~ 'microsoft.compute/virtualmachines', tostring(properties.extended.instanceView.powerState.code),
    type =~ 'microsoft.containerservice/managedclusters', tostring(properties.powerState.code),
    type =~ 'microsoft.network/applicationgateways', tostring(properties.operationalState),
    type =~ 'microsoft.dbforpostgresql/flexibleservers', tostring(properties.state),
    type =~ 'microsoft.storage/storageaccounts', iff(tobool(properties.isSftpEnabled), 'Running', 'Stopped'),
    '')
";

fn resources_query(kinds: &[ResourceKind]) -> String {
    let tagged = POWER_TAGS
        .iter()
        .map(|t| format!("isnotempty(tags['{t}'])"))
        .collect::<Vec<_>>()
        .join(" or ");
    format!(
        "resources\n| where type in~ ({})\n| where {tagged}\n{POWER_STATE_EXTEND}",
        type_list(kinds)
    )
}

fn maintenance_query(correlation_id: &str, kinds: &[ResourceKind]) -> String {
    format!(
        "maintenanceresources
| where type =~ 'microsoft.maintenance/applyupdates'
| where properties.correlationId =~ '{}'
| extend targetId = tolower(tostring(split(tolower(id), '/providers/microsoft.maintenance/')[0]))
| distinct targetId
| join kind=inner (
    resources
    | where type in~ ({})
    {}    | extend targetId = tolower(id)
) on targetId
{PROJECTION}",
        escape_kql(correlation_id),
        type_list(kinds),
        POWER_STATE_EXTEND.replace('\n', "\n    "),
    )
}

/// Contents of a single-quoted KQL string literal.
fn escape_kql(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars().filter(|c| !c.is_control()) {
        if matches!(c, '\\' | '\'') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn split_group_path(path: &str) -> Result<(&str, &str), ControlError> {
    let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
    match parts.as_slice() {
        [subs, subscription, groups, group]
            if subs.eq_ignore_ascii_case("subscriptions") && groups.eq_ignore_ascii_case("resourcegroups") =>
        {
            Ok((*subscription, *group))
        }
        _ => Err(ControlError::Fatal(format!("not a resource group path: {path}"))),
    }
}

fn into_descriptor(row: GraphRow) -> Option<ResourceDescriptor> {
    let kind = ResourceKind::from_arm_type(&row.resource_type)?;
    let power_state = parse_power_code(kind, row.power_state.as_deref().unwrap_or_default());
    Some(ResourceDescriptor {
        id: row.id,
        kind,
        tags: row.tags.unwrap_or_default(),
        power_state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use powermgmt_core::PowerState;

    #[test]
    fn body_carries_scope_and_skip_token() {
        let body = request_body(&[Scope::ManagementGroup("mg-root".into())], "resources", Some("tok"));
        assert_eq!(body["managementGroups"][0], "mg-root");
        assert!(body.get("subscriptions").is_none());
        assert_eq!(body["options"]["$skipToken"], "tok");
    }

    #[test]
    fn resources_query_filters_kinds_and_power_tags() {
        let q = resources_query(&[ResourceKind::VirtualMachine]);
        assert!(q.contains("'microsoft.compute/virtualmachines'"));
        assert!(q.contains("isnotempty(tags['PowerOff'])"));
        assert!(!q.contains("'microsoft.network/applicationgateways',"));
    }

    #[test]
    fn correlation_id_quotes_are_escaped() {
        let q = maintenance_query("abc' or 1==1 //", &[ResourceKind::VirtualMachine]);
        assert!(q.contains(r"=~ 'abc\' or 1==1 //'"));
    }

    #[test]
    fn group_names_keep_parentheses() {
        assert_eq!(escape_kql("rg(prod)"), "rg(prod)");
        assert_eq!(escape_kql(r"a\b"), r"a\\b");
        assert_eq!(escape_kql("line\nbreak"), "linebreak");
    }

    #[test]
    fn group_path_splits() {
        assert_eq!(
            split_group_path("/subscriptions/s1/resourceGroups/rg-a").unwrap(),
            ("s1", "rg-a")
        );
        assert!(split_group_path("/subscriptions/s1").is_err());
    }

    #[test]
    fn rows_become_descriptors() {
        let page: GraphPage = serde_json::from_value(json!({
            "data": [
                {
                    "id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm1",
                    "type": "microsoft.compute/virtualmachines",
                    "tags": { "Schedule": "AlwaysOn" },
                    "powerState": "PowerState/deallocated"
                },
                { "id": "/x", "type": "microsoft.web/sites", "tags": null }
            ],
            "$skipToken": null
        }))
        .unwrap();
        let resources: Vec<_> = page.data.into_iter().filter_map(into_descriptor).collect();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].power_state, PowerState::Stopped);
        assert_eq!(resources[0].tag("Schedule"), Some("AlwaysOn"));
    }
}
