use renderq_core::backend::BackendError;
use renderq_core::error::CoreError;

/// Why a dispatch attempt or a running job failed.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Node unreachable: {0}")]
    NodeUnreachable(String),

    #[error("Backend rejected workflow ({status}): {body}")]
    BackendRejected { status: u16, body: String },

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Stalled: no activity for {0} seconds")]
    Stalled(u64),

    #[error("Workflow build failed: {0}")]
    Build(#[from] CoreError),

    #[error("No endpoint registered for node {0}")]
    NoEndpoint(String),
}

impl DispatchError {
    /// Unknown workflows and invalid settings fail the same way every
    /// time; everything else may succeed on another attempt or node.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            DispatchError::Build(
                CoreError::UnknownWorkflow(_)
                    | CoreError::InvalidResolution(_)
                    | CoreError::Validation(_)
            )
        )
    }
}

impl From<BackendError> for DispatchError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unreachable(msg) => DispatchError::NodeUnreachable(msg),
            BackendError::Rejected { status, body } => DispatchError::BackendRejected { status, body },
            BackendError::Protocol(msg) => DispatchError::ExecutionError(msg),
        }
    }
}

/// Errors returned by [`Scheduler`](crate::Scheduler) operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Job {0} not found")]
    JobNotFound(uuid::Uuid),

    #[error("Job {id} is {status}; {action} is not allowed")]
    InvalidState {
        id: uuid::Uuid,
        status: renderq_core::job::JobStatus,
        action: &'static str,
    },
}
