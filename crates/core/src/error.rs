#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("Invalid resolution '{0}', expected WIDTHxHEIGHT")]
    InvalidResolution(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
