use thiserror::Error;

/// Ranging pipeline error types
#[derive(Error, Debug)]
pub enum RangingError {
    #[error("Invalid controller state: {0}")]
    InvalidState(String),

    #[error("A ranging request is still awaiting acknowledgement")]
    OutstandingRequest,

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Sweep error: {0}")]
    Sweep(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for ranging operations
pub type RangingResult<T> = Result<T, RangingError>;
