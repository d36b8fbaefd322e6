use std::future::Future;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::error::ApiError;
use super::types::{ResolutionAck, SubmitJobRequest, SubmitJobResponse};
use crate::incidence::{Incidence, Resolution, ResolutionDraft};
use crate::jobs::{JobKind, JobStatusReport};
use crate::lifecycle::Closing;

/// Everything the closing core needs from the backend.
///
/// Implemented over HTTP by [`ClosingApiClient`] and by hand-written mocks in tests.
pub trait ClosingApi: Send + Sync + 'static {
    fn get_closing(&self, closing_id: &str) -> impl Future<Output = Result<Closing, ApiError>> + Send;

    fn list_incidences(
        &self,
        closing_id: &str,
    ) -> impl Future<Output = Result<Vec<Incidence>, ApiError>> + Send;

    fn get_history(
        &self,
        incidence_id: &str,
    ) -> impl Future<Output = Result<Vec<Resolution>, ApiError>> + Send;

    fn append_resolution(
        &self,
        incidence_id: &str,
        draft: &ResolutionDraft,
    ) -> impl Future<Output = Result<ResolutionAck, ApiError>> + Send;

    fn approve(
        &self,
        incidence_id: &str,
        draft: &ResolutionDraft,
    ) -> impl Future<Output = Result<ResolutionAck, ApiError>> + Send;

    fn reject(
        &self,
        incidence_id: &str,
        draft: &ResolutionDraft,
    ) -> impl Future<Output = Result<ResolutionAck, ApiError>> + Send;

    fn confirm_disappearance(
        &self,
        incidence_id: &str,
        draft: &ResolutionDraft,
    ) -> impl Future<Output = Result<ResolutionAck, ApiError>> + Send;

    /// Starts a backend job and returns its task id.
    fn submit_job(
        &self,
        closing_id: &str,
        kind: JobKind,
        subject: Option<&str>,
    ) -> impl Future<Output = Result<String, ApiError>> + Send;

    fn poll_job(
        &self,
        closing_id: &str,
        task_id: &str,
    ) -> impl Future<Output = Result<JobStatusReport, ApiError>> + Send;
}

pub struct ClosingApiClient {
    token: String,
    client: Client,
    base_url: String,
}

impl ClosingApiClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;
        let base_url: String = base_url.into();
        Ok(Self {
            token: token.into(),
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        resource: String,
    ) -> Result<T, ApiError> {
        let response = request.bearer_auth(&self.token).send().await?;
        let status = response.status();
        debug!(%resource, status = status.as_u16(), "backend response");

        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound { resource });
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            if status == StatusCode::CONFLICT {
                return Err(ApiError::Conflict { message });
            }
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<T>().await?)
    }

    async fn post_resolution(
        &self,
        incidence_id: &str,
        action: &str,
        draft: &ResolutionDraft,
    ) -> Result<ResolutionAck, ApiError> {
        let request = self
            .client
            .post(self.url(&format!("/incidences/{incidence_id}/{action}")))
            .json(draft);
        self.send(request, format!("incidence {incidence_id}")).await
    }
}

impl ClosingApi for ClosingApiClient {
    async fn get_closing(&self, closing_id: &str) -> Result<Closing, ApiError> {
        let request = self.client.get(self.url(&format!("/closings/{closing_id}")));
        self.send(request, format!("closing {closing_id}")).await
    }

    async fn list_incidences(&self, closing_id: &str) -> Result<Vec<Incidence>, ApiError> {
        let request = self
            .client
            .get(self.url(&format!("/closings/{closing_id}/incidences")));
        self.send(request, format!("closing {closing_id}")).await
    }

    async fn get_history(&self, incidence_id: &str) -> Result<Vec<Resolution>, ApiError> {
        let request = self
            .client
            .get(self.url(&format!("/incidences/{incidence_id}/resolutions")));
        self.send(request, format!("incidence {incidence_id}")).await
    }

    async fn append_resolution(
        &self,
        incidence_id: &str,
        draft: &ResolutionDraft,
    ) -> Result<ResolutionAck, ApiError> {
        self.post_resolution(incidence_id, "resolutions", draft).await
    }

    async fn approve(
        &self,
        incidence_id: &str,
        draft: &ResolutionDraft,
    ) -> Result<ResolutionAck, ApiError> {
        self.post_resolution(incidence_id, "approve", draft).await
    }

    async fn reject(
        &self,
        incidence_id: &str,
        draft: &ResolutionDraft,
    ) -> Result<ResolutionAck, ApiError> {
        self.post_resolution(incidence_id, "reject", draft).await
    }

    async fn confirm_disappearance(
        &self,
        incidence_id: &str,
        draft: &ResolutionDraft,
    ) -> Result<ResolutionAck, ApiError> {
        self.post_resolution(incidence_id, "confirm-disappearance", draft)
            .await
    }

    async fn submit_job(
        &self,
        closing_id: &str,
        kind: JobKind,
        subject: Option<&str>,
    ) -> Result<String, ApiError> {
        let body = SubmitJobRequest {
            kind,
            subject: subject.map(str::to_string),
        };
        let request = self
            .client
            .post(self.url(&format!("/closings/{closing_id}/jobs")))
            .json(&body);
        let response: SubmitJobResponse = self.send(request, format!("closing {closing_id}")).await?;
        Ok(response.task_id)
    }

    async fn poll_job(&self, closing_id: &str, task_id: &str) -> Result<JobStatusReport, ApiError> {
        let request = self
            .client
            .get(self.url(&format!("/closings/{closing_id}/jobs/{task_id}")));
        self.send(request, format!("task {task_id}")).await
    }
}
