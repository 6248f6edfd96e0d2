use powermgmt_core::PowerMgmtError;
use powermgmt_queue::QueueError;
use thiserror::Error;

use crate::traits::ControlError;

/// Failures that escape a message handler.
///
/// Anything returned as an `EngineError` leaves the queue message un-acked so
/// it is redelivered. Per-resource outcomes are reported as events instead.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("target lookup failed: {0}")]
    TargetLookup(#[source] ControlError),

    #[error(transparent)]
    Core(#[from] PowerMgmtError),
}
