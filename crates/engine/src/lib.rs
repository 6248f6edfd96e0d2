//! Tag-driven power management engine.
//!
//! A trigger publishes scan requests; discovery reconciles each scope and
//! enqueues power actions; the executor dispatches them through per-kind
//! adapters; deferred checks follow each action to convergence; and the
//! maintenance coordinator overrides schedules for update windows.

pub mod arm;
pub mod convergence;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod maintenance;
pub mod pipeline;
pub mod retry;
pub mod scanner;
pub mod sink;
pub mod state;
pub mod status;
pub mod traits;
pub mod trigger;

pub use convergence::{CheckOutcome, ConvergenceManager};
pub use dispatcher::{AdapterRegistry, Dispatch, Dispatcher};
pub use error::EngineError;
pub use executor::{ActionExecutor, ExecOutcome};
pub use maintenance::MaintenanceCoordinator;
pub use pipeline::{poll_once, spawn_workers, Collaborators, MessageHandler, PowerEngine};
pub use scanner::{DiscoveryScanner, ScanReport};
pub use sink::{EventSink, MemorySink, TracingSink};
pub use state::{ActionPhase, ActionStateStore, BeginOutcome, OverrideState};
pub use traits::{
    AlertSuppressor, ControlError, InventoryQuery, KindAdapter, NoAlertSuppression,
    PowerObservable, Startable, StopTagging, Stoppable, Taggable,
};
pub use trigger::Trigger;
