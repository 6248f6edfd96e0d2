use thiserror::Error;

/// Failure taxonomy shared by every stage of the pipeline.
///
/// The first four variants are never raised past a worker: they are turned
/// into [`PowerEvent`](crate::event::PowerEvent)s or
/// [`TagCheckFinding`](crate::event::TagCheckFinding)s and published.
#[derive(Error, Debug)]
pub enum PowerMgmtError {
    #[error("invalid tag value '{value}' for {tag}: {reason}")]
    TagValidation {
        tag: String,
        value: String,
        reason: String,
    },

    #[error("{action} on {resource_id} failed: {detail}")]
    ActionInvocation {
        resource_id: String,
        action: String,
        detail: String,
    },

    #[error("{resource_id} did not reach {expected} after {wait_retries} checks")]
    ConvergenceTimeout {
        resource_id: String,
        expected: String,
        wait_retries: u32,
    },

    #[error("discovery failed for scope {scope}: {detail}")]
    Discovery { scope: String, detail: String },

    #[error("invalid resource id: {0}")]
    InvalidResourceId(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}
