use crate::lock::Lock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SlipwayError {
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("unknown command")]
    UnknownCommand,

    #[error("no access to {repo}")]
    AccessDenied { repo: String },

    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("ref `{git_ref}` not found in {repo}")]
    RefNotFound { git_ref: String, repo: String },

    #[error("{environment} is locked by another user")]
    LockHeldByOther { environment: String, lock: Lock },

    #[error("unknown or expired action token")]
    UnknownOrExpiredToken,

    #[error("action is not resumable")]
    ActionNotWhitelisted,

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("github request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl SlipwayError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        SlipwayError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// True for faults the user cannot act on. These render as a generic
    /// apology and are the only class reported out-of-band to operators.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            SlipwayError::Storage(_)
                | SlipwayError::Io(_)
                | SlipwayError::Yaml(_)
                | SlipwayError::Json(_)
                | SlipwayError::Http(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SlipwayError>;
