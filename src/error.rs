use thiserror::Error;

use crate::api::ApiError;
use crate::jobs::JobKind;

#[derive(Debug, Error)]
pub enum CloseError {
    /// A lifecycle or turn rule was violated. Raised locally, before any network call.
    #[error("Illegal transition: {0}")]
    IllegalTransition(String),

    /// The server reports the entity already changed; refresh instead of retrying.
    #[error("Stale state: {0}")]
    StaleState(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("{kind} job failed{}", detail_suffix(.detail))]
    JobFailure {
        kind: JobKind,
        detail: Option<String>,
    },

    #[error("{kind} job still pending after {elapsed_ms}ms")]
    PollTimeout { kind: JobKind, elapsed_ms: u64 },

    #[error("A submission for incidence {0} is already in flight")]
    SubmissionInFlight(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<ApiError> for CloseError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Conflict { message } => CloseError::StaleState(message),
            ApiError::NotFound { resource } => CloseError::NotFound(resource),
            other => CloseError::Transport(other.to_string()),
        }
    }
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
}

pub type Result<T, E = CloseError> = std::result::Result<T, E>;
