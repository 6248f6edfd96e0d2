//! Discovery: scan one scope, reconcile every resource, enqueue actions.
//!
//! An inventory failure is reported and the scan request acked, so one bad
//! scope never blocks the others. Each resource is evaluated on its own; a
//! malformed tag only excludes that resource.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use powermgmt_core::{
    PowerActionRequest, PowerEvent, ResourceDescriptor, ResourceKind, ScanRequest, TAG_FEATURE_SUBTYPE,
    TAG_STATUS,
};
use powermgmt_queue::{publish, DurableQueue};
use powermgmt_schedule::{decide_action, Evaluator, TagParser};
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::pipeline::MessageHandler;
use crate::sink::EventSink;
use crate::state::{ActionPhase, ActionStateStore};
use crate::status;
use crate::traits::InventoryQuery;

/// Counters for one scanned scope.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub discovered: usize,
    pub exempt: usize,
    pub invalid: usize,
    pub actions: usize,
    /// Stops held back by an active maintenance window.
    pub deferred: usize,
    /// Skipped because an action was already in flight.
    pub busy: usize,
    pub discovery_failed: bool,
}

/// Whether `resource` is of an enabled kind and carries any required sub-type tag.
pub fn is_managed(resource: &ResourceDescriptor, kinds: &[ResourceKind]) -> bool {
    if !kinds.contains(&resource.kind) {
        return false;
    }
    match resource.kind.required_subtype() {
        Some(subtype) => resource
            .tag(TAG_FEATURE_SUBTYPE)
            .is_some_and(|v| v.eq_ignore_ascii_case(subtype)),
        None => true,
    }
}

pub struct DiscoveryScanner {
    inventory: Arc<dyn InventoryQuery>,
    parser: TagParser,
    evaluator: Evaluator,
    state: Arc<ActionStateStore>,
    dispatcher: Arc<Dispatcher>,
    sink: Arc<dyn EventSink>,
    power_events: Arc<dyn DurableQueue>,
    kinds: Vec<ResourceKind>,
}

impl DiscoveryScanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        inventory: Arc<dyn InventoryQuery>,
        parser: TagParser,
        evaluator: Evaluator,
        state: Arc<ActionStateStore>,
        dispatcher: Arc<Dispatcher>,
        sink: Arc<dyn EventSink>,
        power_events: Arc<dyn DurableQueue>,
        kinds: Vec<ResourceKind>,
    ) -> Self {
        Self {
            inventory,
            parser,
            evaluator,
            state,
            dispatcher,
            sink,
            power_events,
            kinds,
        }
    }

    pub async fn scan(&self, request: &ScanRequest) -> Result<ScanReport, EngineError> {
        let mut report = ScanReport::default();
        let scope = request.scope.to_string();

        let resources = match self.inventory.query(&request.scope, &self.kinds).await {
            Ok(resources) => resources,
            Err(e) => {
                warn!(scope = %scope, error = %e, "Inventory query failed");
                self.sink
                    .write(&PowerEvent::discovery_failed(&scope, e.to_string()))
                    .await;
                report.discovery_failed = true;
                return Ok(report);
            }
        };

        let window = self.evaluator.window(request.tick_at, request.previous_tick);
        debug!(scope = %scope, start = %window.start, end = %window.end, count = resources.len(), "Reconciling scope");

        let mut first_error = None;
        for resource in &resources {
            report.discovered += 1;
            if let Err(e) = self.reconcile(resource, &window, &mut report).await {
                warn!(resource_id = %resource.id, error = %e, "Failed to enqueue power action");
                first_error.get_or_insert(e);
            }
        }

        info!(
            scope = %scope,
            discovered = report.discovered,
            actions = report.actions,
            invalid = report.invalid,
            exempt = report.exempt,
            deferred = report.deferred,
            busy = report.busy,
            "Scope scanned"
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    async fn reconcile(
        &self,
        resource: &ResourceDescriptor,
        window: &powermgmt_schedule::EvalWindow,
        report: &mut ScanReport,
    ) -> Result<(), EngineError> {
        let id = resource.id.as_str();
        if resource.is_exempt() {
            debug!(resource_id = id, "Exempt from power management");
            report.exempt += 1;
            return Ok(());
        }
        if !is_managed(resource, &self.kinds) {
            return Ok(());
        }

        let schedule = match self.parser.check(resource) {
            Ok(schedule) => schedule,
            Err(finding) => {
                let message = finding.message();
                warn!(resource_id = id, tag = %finding.tag, value = %finding.value, "Invalid power management tag");
                self.sink.write(&finding.to_event(resource.power_state)).await;
                if resource.tag(TAG_STATUS) != Some(message.as_str()) {
                    self.dispatcher.annotate(id, resource.kind, None, &message).await;
                }
                report.invalid += 1;
                return Ok(());
            }
        };
        if schedule.is_untouched() {
            return Ok(());
        }

        let evaluation = self.evaluator.evaluate(&schedule, window);
        let Some(action) = decide_action(evaluation.desired, resource.power_state, resource.kind) else {
            return Ok(());
        };

        if self.state.override_for(id).is_some() {
            if !action.is_start() {
                if self.state.mark_stop_deferred(id) {
                    self.dispatcher
                        .annotate(id, resource.kind, None, status::MAINTENANCE_STOP_PENDING)
                        .await;
                }
                info!(resource_id = id, "Stop deferred until the maintenance window ends");
                report.deferred += 1;
            }
            return Ok(());
        }

        let phase = self.state.phase(id);
        if phase != ActionPhase::Idle {
            debug!(resource_id = id, ?phase, "Action in flight, not re-dispatching");
            report.busy += 1;
            return Ok(());
        }

        let reason = evaluation.rule.unwrap_or_else(|| schedule.to_string());
        let request = PowerActionRequest::scheduled(id, resource.kind, action, reason);
        publish(self.power_events.as_ref(), &request, Duration::ZERO).await?;
        info!(resource_id = id, action = %action, observed = %resource.power_state, "Power action enqueued");
        report.actions += 1;
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for DiscoveryScanner {
    type Payload = ScanRequest;

    fn name(&self) -> &'static str {
        "scans"
    }

    async fn handle(&self, request: ScanRequest) -> Result<(), EngineError> {
        self.scan(&request).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use powermgmt_core::PowerState;

    #[test]
    fn storage_accounts_need_the_sftp_subtype() {
        let id = "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/st1";
        let kinds = ResourceKind::ALL.to_vec();
        let plain = ResourceDescriptor::new(id, ResourceKind::StorageSftpFeature, PowerState::Running);
        assert!(!is_managed(&plain, &kinds));
        let sftp = plain.clone().with_tag(TAG_FEATURE_SUBTYPE, "SFTP");
        assert!(is_managed(&sftp, &kinds));
    }

    #[test]
    fn disabled_kinds_are_not_managed() {
        let id = "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm1";
        let vm = ResourceDescriptor::new(id, ResourceKind::VirtualMachine, PowerState::Running);
        assert!(!is_managed(&vm, &[ResourceKind::ManagedCluster]));
        assert!(is_managed(&vm, &[ResourceKind::VirtualMachine]));
    }
}
