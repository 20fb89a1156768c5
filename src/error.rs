use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("capacity exceeded: {0}")]
    LimitExceeded(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("shutting down: {0}")]
    ShuttingDown(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
