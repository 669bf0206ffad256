//! Errors surfaced by the actor runtime and the entities built on it.

use tenancy_core::StoreError;

/// Result type for actor operations.
pub type ActorResult<T> = Result<T, ActorError>;

/// Error type for actor operations.
///
/// `false`-style outcomes (already a member, unknown invite token) are not
/// errors and are returned as values by the entity methods.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ActorError {
    #[error("failed to activate {id}: {reason}")]
    Activation { id: String, reason: String },

    #[error("failed to persist state for {id}: {reason}")]
    Persistence { id: String, reason: String },

    /// The stored state moved under this activation. The activation has
    /// reloaded the stored value; the in-memory change was discarded.
    #[error("state of {id} was changed by another writer: {reason}")]
    Conflict { id: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no processor registered for job type '{0}'")]
    ProcessorResolution(String),

    #[error("entity kind '{0}' is not registered with the runtime")]
    NotRegistered(&'static str),

    #[error("actor {0} is unavailable")]
    Unavailable(String),

    #[error("call to {0} timed out")]
    Timeout(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ActorError {
    pub(crate) fn persistence(id: impl std::fmt::Display, err: StoreError) -> Self {
        ActorError::Persistence {
            id: id.to_string(),
            reason: err.to_string(),
        }
    }

    /// Storage or runtime failure, as opposed to a caller mistake.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            ActorError::Activation { .. }
                | ActorError::Persistence { .. }
                | ActorError::Conflict { .. }
                | ActorError::Unavailable(_)
                | ActorError::Timeout(_)
                | ActorError::Serialization(_)
        )
    }
}

impl From<serde_json::Error> for ActorError {
    fn from(err: serde_json::Error) -> Self {
        ActorError::Serialization(err.to_string())
    }
}
