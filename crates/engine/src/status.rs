//! Status texts written to `_POWERMGMT_STATUS_`.

use powermgmt_core::PowerAction;

pub const AUTO_STARTED: &str = "Auto-started";
pub const AUTO_STOPPED: &str = "Auto-stopped";
pub const MAINTENANCE_WAS_STOPPED: &str = "In maintenance window (was stopped)";
pub const MAINTENANCE_STOP_PENDING: &str = "In maintenance window (stop pending)";
pub const MAINTENANCE_RUNNING: &str = "In maintenance window";
pub const MAINTENANCE_COMPLETED: &str = "Maintenance window completed";
pub const POST_MAINTENANCE_STOPPED: &str = "Auto-stopped (post maintenance)";

/// Text written once a schedule action converges.
pub fn for_scheduled(action: PowerAction) -> &'static str {
    if action.is_start() {
        AUTO_STARTED
    } else {
        AUTO_STOPPED
    }
}

/// Whether a status tag left by a window start means the resource should be
/// stopped again when the window ends.
pub fn wants_post_maintenance_stop(status: Option<&str>) -> bool {
    matches!(status, Some(MAINTENANCE_WAS_STOPPED | MAINTENANCE_STOP_PENDING))
}
