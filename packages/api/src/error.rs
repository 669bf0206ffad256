//! Errors returned by the service layer.

use actors::{ActorError, ConfigError};

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Error type for service operations.
///
/// Caller mistakes (`Unauthorized`, `Forbidden`, `Conflict`, `Validation`,
/// `NotFound`) are distinct from infrastructure failures so a transport
/// layer can map them to status codes.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Actor(#[from] ActorError),

    #[error("invalid credentials")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("database error: {0}")]
    Db(#[from] db::DbError),

    #[error("notification failed: {0}")]
    Notification(String),
}

impl From<ConfigError> for ServiceError {
    fn from(err: ConfigError) -> Self {
        ServiceError::Config(err.0)
    }
}

impl ServiceError {
    /// True when retrying later might succeed.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            ServiceError::Actor(e) => e.is_infrastructure(),
            ServiceError::Storage(_) | ServiceError::Db(_) | ServiceError::Notification(_) => true,
            _ => false,
        }
    }
}
