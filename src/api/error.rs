//! Errors raised by the closing backend client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP 409: the entity changed on the server since it was last read.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// HTTP 404 for the named resource.
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// Any other non-success status (4xx/5xx).
    #[error("API error (status {status}): {message}")]
    Status { status: u16, message: String },

    /// DNS, connection, timeout or body decoding failure.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}
