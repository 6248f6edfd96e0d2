//! Per-resource action state: the dedup lock and the maintenance override.
//!
//! This is the only state shared between workers. Every transition happens
//! under one lock so two workers can never both move the same resource out
//! of `Idle`.
//!
//! ```text
//! Idle → PendingAction → AwaitingConvergence → Idle
//! ```
//!
//! A maintenance override runs alongside the phase. While it is active,
//! schedule-origin actions are refused; maintenance actions still take the
//! same path.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use powermgmt_core::{ActionOrigin, PowerAction};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPhase {
    Idle,
    PendingAction,
    AwaitingConvergence,
}

/// Result of asking to move a resource out of `Idle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginOutcome {
    Started(Uuid),
    /// Another action is already in flight.
    Busy { phase: ActionPhase, action: PowerAction },
    /// A maintenance window owns the resource.
    Overridden { window_id: String },
}

/// Snapshot of an active maintenance override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideState {
    pub window_id: String,
    pub until: DateTime<Utc>,
    /// Power state at the first window start.
    pub was_running: bool,
    /// A schedule stop was suppressed while the window was open.
    pub stop_deferred: bool,
}

#[derive(Debug)]
struct InFlight {
    action_id: Uuid,
    action: PowerAction,
    phase: ActionPhase,
    /// `wait_retries` of the only deferred check still accepted.
    next_check: u32,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct ResourceState {
    in_flight: Option<InFlight>,
    maintenance: Option<OverrideState>,
}

impl ResourceState {
    fn expire(&mut self, now: Instant, wall: DateTime<Utc>, resource_id: &str) {
        if self.in_flight.as_ref().is_some_and(|f| f.expires_at <= now) {
            warn!(resource_id, "Action lease expired, releasing lock");
            self.in_flight = None;
        }
        if self.maintenance.as_ref().is_some_and(|o| o.until <= wall) {
            warn!(resource_id, "Maintenance override expired");
            self.maintenance = None;
        }
    }

    fn is_empty(&self) -> bool {
        self.in_flight.is_none() && self.maintenance.is_none()
    }
}

/// In-process store of per-resource action state.
pub struct ActionStateStore {
    resources: Mutex<HashMap<String, ResourceState>>,
    lease: Duration,
}

impl ActionStateStore {
    /// `lease` bounds how long one action may hold the lock.
    pub fn new(lease: Duration) -> Self {
        Self {
            resources: Mutex::new(HashMap::new()),
            lease,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ResourceState>> {
        // State stays consistent under poisoning: every update is a single assignment.
        self.resources.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_entry<R>(&self, resource_id: &str, f: impl FnOnce(&mut ResourceState) -> R) -> R {
        let mut map = self.lock();
        let entry = map.entry(resource_id.to_string()).or_default();
        entry.expire(Instant::now(), Utc::now(), resource_id);
        let result = f(entry);
        if entry.is_empty() {
            map.remove(resource_id);
        }
        result
    }

    fn start(&self, entry: &mut ResourceState, action: PowerAction) -> Uuid {
        let action_id = Uuid::new_v4();
        entry.in_flight = Some(InFlight {
            action_id,
            action,
            phase: ActionPhase::PendingAction,
            next_check: 1,
            expires_at: Instant::now() + self.lease,
        });
        action_id
    }

    /// Check-and-set `Idle → PendingAction`.
    pub fn try_begin(&self, resource_id: &str, action: PowerAction, origin: ActionOrigin) -> BeginOutcome {
        self.with_entry(resource_id, |entry| {
            if origin == ActionOrigin::Schedule {
                if let Some(o) = &entry.maintenance {
                    return BeginOutcome::Overridden {
                        window_id: o.window_id.clone(),
                    };
                }
            }
            if let Some(f) = &entry.in_flight {
                return BeginOutcome::Busy {
                    phase: f.phase,
                    action: f.action,
                };
            }
            BeginOutcome::Started(self.start(entry, action))
        })
    }

    /// Replace any in-flight action. Checks for the old one become stale.
    pub fn preempt(&self, resource_id: &str, action: PowerAction) -> Uuid {
        self.with_entry(resource_id, |entry| {
            if let Some(f) = &entry.in_flight {
                debug!(resource_id, superseded = %f.action, by = %action, "Preempting in-flight action");
            }
            self.start(entry, action)
        })
    }

    /// `PendingAction → AwaitingConvergence` once the action has been dispatched.
    pub fn mark_awaiting(&self, resource_id: &str, action_id: Uuid) -> bool {
        self.with_entry(resource_id, |entry| match &mut entry.in_flight {
            Some(f) if f.action_id == action_id => {
                f.phase = ActionPhase::AwaitingConvergence;
                true
            }
            _ => false,
        })
    }

    /// Accept the deferred check numbered `wait_retries`, at most once.
    ///
    /// Redelivered or superseded checks return `false`.
    pub fn claim_check(&self, resource_id: &str, action_id: Uuid, wait_retries: u32) -> bool {
        self.with_entry(resource_id, |entry| match &mut entry.in_flight {
            Some(f)
                if f.action_id == action_id
                    && f.phase == ActionPhase::AwaitingConvergence
                    && f.next_check == wait_retries =>
            {
                f.next_check = wait_retries + 1;
                true
            }
            _ => false,
        })
    }

    /// Undo a claim whose follow-up could not be enqueued.
    pub fn rewind_check(&self, resource_id: &str, action_id: Uuid, wait_retries: u32) {
        self.with_entry(resource_id, |entry| {
            if let Some(f) = entry.in_flight.as_mut().filter(|f| f.action_id == action_id) {
                f.next_check = wait_retries;
            }
        })
    }

    /// Back to `Idle`, if `action_id` still holds the lock.
    pub fn release(&self, resource_id: &str, action_id: Uuid) {
        self.with_entry(resource_id, |entry| {
            if entry.in_flight.as_ref().is_some_and(|f| f.action_id == action_id) {
                entry.in_flight = None;
            }
        })
    }

    pub fn phase(&self, resource_id: &str) -> ActionPhase {
        self.with_entry(resource_id, |entry| {
            entry.in_flight.as_ref().map_or(ActionPhase::Idle, |f| f.phase)
        })
    }

    /// Open or extend a maintenance override.
    ///
    /// The latest start wins. A repeated start keeps the power state recorded
    /// by the first one, since by then the window has already started the resource.
    pub fn begin_override(
        &self,
        resource_id: &str,
        window_id: &str,
        until: DateTime<Utc>,
        was_running: bool,
    ) -> OverrideState {
        self.with_entry(resource_id, |entry| {
            let next = match entry.maintenance.take() {
                Some(existing) => OverrideState {
                    window_id: window_id.to_string(),
                    until: existing.until.max(until),
                    was_running: existing.was_running,
                    stop_deferred: existing.stop_deferred,
                },
                None => OverrideState {
                    window_id: window_id.to_string(),
                    until,
                    was_running,
                    stop_deferred: false,
                },
            };
            entry.maintenance = Some(next.clone());
            next
        })
    }

    pub fn override_for(&self, resource_id: &str) -> Option<OverrideState> {
        self.with_entry(resource_id, |entry| entry.maintenance.clone())
    }

    /// Record a suppressed schedule stop. Returns `true` the first time.
    pub fn mark_stop_deferred(&self, resource_id: &str) -> bool {
        self.with_entry(resource_id, |entry| match &mut entry.maintenance {
            Some(o) if !o.stop_deferred => {
                o.stop_deferred = true;
                true
            }
            _ => false,
        })
    }

    /// Close the override opened for `window_id`.
    ///
    /// An override since taken over by a newer window is left in place.
    pub fn clear_override(&self, resource_id: &str, window_id: &str) -> Option<OverrideState> {
        self.with_entry(resource_id, |entry| {
            if entry.maintenance.as_ref().is_some_and(|o| o.window_id == window_id) {
                entry.maintenance.take()
            } else {
                None
            }
        })
    }
}
