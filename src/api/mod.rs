pub mod client;
pub mod error;
pub mod types;

pub use client::{ClosingApi, ClosingApiClient};
pub use error::ApiError;
pub use types::{ResolutionAck, SubmitJobRequest, SubmitJobResponse};
