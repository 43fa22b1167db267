// Error taxonomy: one enum per collaborator, one per recovery category.
// None of these ever escapes a tick; each component degrades to a safe value.

use thiserror::Error;

/// Failure talking to the container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("docker: {0}")]
    Docker(#[from] bollard::errors::Error),
    #[error("container {0} not found")]
    NotFound(String),
    #[error("{0}")]
    Other(String),
}

/// Failure talking to the message broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Connectivity problem; the whole measurement is abandoned.
    #[error("broker unreachable: {0}")]
    Unreachable(String),
    /// Problem scoped to a single topic; the topic is skipped.
    #[error("topic {topic}: {reason}")]
    Topic { topic: String, reason: String },
    #[error("broker task: {0}")]
    Task(String),
}

/// Lag could not be measured this tick; treated as zero lag.
#[derive(Debug, Error)]
#[error("lag measurement unavailable: {0}")]
pub struct MeasurementError(#[source] pub BrokerError);

/// Replica count could not be inspected; treated as the safe floor.
#[derive(Debug, Error)]
#[error("fleet inspection failed: {0}")]
pub struct InspectionError(#[source] pub RuntimeError);

/// What the controller was doing to a replica when the runtime failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationAction {
    Launch,
    Stop,
    Remove,
    Recreate,
}

impl std::fmt::Display for MutationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MutationAction::Launch => "launch",
            MutationAction::Stop => "stop",
            MutationAction::Remove => "remove",
            MutationAction::Recreate => "recreate",
        };
        f.write_str(s)
    }
}

/// One replica-level mutation that failed. Collected, never propagated.
#[derive(Debug, Error)]
#[error("{action} {replica}: {source}")]
pub struct MutationError {
    pub replica: String,
    pub action: MutationAction,
    #[source]
    pub source: RuntimeError,
}

/// Neither a registry pull nor a local lookup produced an image id.
#[derive(Debug, Error)]
#[error("image {image} unavailable (pull: {pull}; local: {local})")]
pub struct RefreshError {
    pub image: String,
    pub pull: RuntimeError,
    pub local: RuntimeError,
}
