use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CloseError, Result};

/// Long-running backend computations the closing depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    FileProcess,
    Verify,
    Consolidate,
    GenerateIncidences,
    Finalize,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::FileProcess => write!(f, "file-process"),
            JobKind::Verify => write!(f, "verify"),
            JobKind::Consolidate => write!(f, "consolidate"),
            JobKind::GenerateIncidences => write!(f, "generate-incidences"),
            JobKind::Finalize => write!(f, "finalize"),
        }
    }
}

/// State reported by the backend for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Succeeded,
    Failed,
}

/// Body of a job status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl JobStatusReport {
    pub fn pending() -> Self {
        Self {
            state: JobState::Pending,
            result: None,
            detail: None,
        }
    }

    pub fn succeeded(result: Option<Value>) -> Self {
        Self {
            state: JobState::Succeeded,
            result,
            detail: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            state: JobState::Failed,
            result: None,
            detail: Some(detail.into()),
        }
    }
}

/// Correlation handle of one submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub closing_id: String,
    pub task_id: String,
    pub kind: JobKind,
    /// What the job works on, e.g. the uploaded file id of a file-process job.
    pub subject: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl JobHandle {
    pub fn new(
        closing_id: impl Into<String>,
        task_id: impl Into<String>,
        kind: JobKind,
        subject: Option<String>,
    ) -> Self {
        Self {
            closing_id: closing_id.into(),
            task_id: task_id.into(),
            kind,
            subject,
            submitted_at: Utc::now(),
        }
    }

    pub fn operation(&self) -> OperationKey {
        OperationKey {
            kind: self.kind,
            subject: self.subject.clone(),
        }
    }
}

/// A logical operation. At most one poll is active per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationKey {
    pub kind: JobKind,
    pub subject: Option<String>,
}

impl OperationKey {
    pub fn new(kind: JobKind) -> Self {
        Self { kind, subject: None }
    }

    pub fn with_subject(kind: JobKind, subject: impl Into<String>) -> Self {
        Self {
            kind,
            subject: Some(subject.into()),
        }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subject {
            Some(subject) => write!(f, "{}:{subject}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Terminal result delivered to a poll's completion callback.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded { result: Option<Value> },
    Failed { detail: Option<String> },
    TimedOut { elapsed_ms: u64 },
}

impl JobOutcome {
    pub fn poll_state(&self) -> PollState {
        match self {
            JobOutcome::Succeeded { .. } => PollState::Succeeded,
            JobOutcome::Failed { .. } => PollState::Failed,
            JobOutcome::TimedOut { .. } => PollState::TimedOut,
        }
    }

    /// The success payload, or the matching error for `kind`.
    pub fn into_result(self, kind: JobKind) -> Result<Option<Value>> {
        match self {
            JobOutcome::Succeeded { result } => Ok(result),
            JobOutcome::Failed { detail } => Err(CloseError::JobFailure { kind, detail }),
            JobOutcome::TimedOut { elapsed_ms } => Err(CloseError::PollTimeout { kind, elapsed_ms }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollState {
    Idle,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
}

impl PollState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PollState::Succeeded | PollState::Failed | PollState::TimedOut
        )
    }
}

/// Tick interval and upper bound for a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    /// Polls still pending after this long end as [`JobOutcome::TimedOut`].
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            timeout: Duration::from_secs(15 * 60),
        }
    }
}

impl PollConfig {
    /// Builds a config; the timeout is never shorter than one interval.
    pub fn from_millis(interval_ms: u64, timeout_ms: u64) -> Self {
        let interval_ms = interval_ms.max(1);
        Self {
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms.max(interval_ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_handle_defaults() {
        let job = JobHandle::new("c-1", "t-1", JobKind::FileProcess, Some("file-9".into()));
        assert_eq!(
            job.operation(),
            OperationKey::with_subject(JobKind::FileProcess, "file-9")
        );
        assert_eq!(job.operation().to_string(), "file-process:file-9");
    }

    #[test]
    fn status_report_from_wire() {
        let report: JobStatusReport =
            serde_json::from_str(r#"{"state":"succeeded","result":{"discrepancies":0}}"#).unwrap();
        assert_eq!(report.state, JobState::Succeeded);
        assert_eq!(report.result, Some(json!({"discrepancies": 0})));

        let pending: JobStatusReport = serde_json::from_str(r#"{"state":"pending"}"#).unwrap();
        assert_eq!(pending, JobStatusReport::pending());
    }

    #[test]
    fn outcome_into_result() {
        let ok = JobOutcome::Succeeded { result: None }.into_result(JobKind::Verify);
        assert!(matches!(ok, Ok(None)));

        let failed = JobOutcome::Failed {
            detail: Some("bad file".into()),
        }
        .into_result(JobKind::FileProcess);
        assert!(matches!(
            failed,
            Err(CloseError::JobFailure { kind: JobKind::FileProcess, .. })
        ));

        let timed_out = JobOutcome::TimedOut { elapsed_ms: 5 }.into_result(JobKind::Finalize);
        assert!(matches!(timed_out, Err(CloseError::PollTimeout { .. })));
    }

    #[test]
    fn poll_config_from_millis() {
        let config = PollConfig::from_millis(250, 0);
        assert_eq!(config.interval, Duration::from_millis(250));
        assert_eq!(config.timeout, Duration::from_millis(250));

        let bounded = PollConfig::from_millis(0, 1000);
        assert_eq!(bounded.interval, Duration::from_millis(1));
        assert_eq!(bounded.timeout, Duration::from_secs(1));
    }

    #[test]
    fn terminal_poll_states() {
        assert!(!PollState::Idle.is_terminal());
        assert!(!PollState::Polling.is_terminal());
        assert!(PollState::TimedOut.is_terminal());
        assert_eq!(
            JobOutcome::Failed { detail: None }.poll_state(),
            PollState::Failed
        );
    }
}
