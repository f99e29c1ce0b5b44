//! Error taxonomy for the artifacts domain

use lineage_common::{Error, RepositoryError, StateError};
use thiserror::Error;

use crate::domain::entities::ArtifactId;
use crate::domain::vocabulary::Vocabulary;

/// Domain result type
pub type Result<T> = std::result::Result<T, ArtifactError>;

/// Errors raised by artifact creation, deletion, traversal and submission
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Malformed or contradictory creation arguments
    #[error("Cannot create artifact: {0}")]
    Creation(String),

    /// The artifact failed a deletability precondition
    #[error("Cannot delete artifact {id}: {reason}")]
    Deletion { id: ArtifactId, reason: String },

    /// Capability-gated access without the capability, or a write-once violation
    #[error("Operation not permitted: {0}")]
    OperationNotPermitted(String),

    #[error("{entity} {id} does not exist")]
    NotFound { entity: &'static str, id: i64 },

    #[error("'{value}' is not a valid {category}")]
    UnknownVocabulary { category: Vocabulary, value: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ArtifactError {
    pub(crate) fn deletion(id: ArtifactId, reason: impl Into<String>) -> Self {
        Self::Deletion {
            id,
            reason: reason.into(),
        }
    }

    pub(crate) fn artifact_not_found(id: ArtifactId) -> Self {
        Self::NotFound {
            entity: "Artifact",
            id: id.0,
        }
    }

    /// Map a submission state machine failure onto the operation error
    /// reported to callers.
    pub(crate) fn not_permitted(id: ArtifactId, target: &str, err: StateError) -> Self {
        let message = match err {
            StateError::Unsupported(_) => format!("Artifact {id} cannot be submitted to {target}"),
            StateError::TerminalState(_) | StateError::InvalidTransition { .. } => {
                format!("Artifact {id} already submitted to {target}")
            }
            StateError::GuardFailed(reason) => format!("Artifact {id}: {reason}"),
        };
        Self::OperationNotPermitted(message)
    }
}

impl From<sqlx::Error> for ArtifactError {
    fn from(err: sqlx::Error) -> Self {
        Self::Repository(RepositoryError::Connection(err))
    }
}

impl From<ArtifactError> for Error {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::Creation(_) | ArtifactError::UnknownVocabulary { .. } => {
                Error::Validation(err.to_string())
            }
            ArtifactError::Deletion { .. } => Error::Conflict(err.to_string()),
            ArtifactError::OperationNotPermitted(_) => Error::Authorization(err.to_string()),
            ArtifactError::NotFound { .. } => Error::NotFound(err.to_string()),
            ArtifactError::Repository(e) => e.into(),
        }
    }
}
