//! In-memory backend for the offline `demo` command.
//!
//! Jobs stay pending for a fixed number of polls before they succeed;
//! resolution endpoints acknowledge whatever they receive.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use crate::api::{ApiError, ClosingApi, ResolutionAck};
use crate::incidence::{ComparisonKind, Incidence, Resolution, ResolutionDraft};
use crate::jobs::{JobKind, JobStatusReport};
use crate::lifecycle::Closing;

pub const DEMO_CLOSING: &str = "demo-2026-09";

struct DemoTask {
    kind: JobKind,
    remaining_pending: u32,
}

pub struct DemoApi {
    closing: Closing,
    pending_polls: u32,
    incidences: Mutex<Vec<Incidence>>,
    tasks: Mutex<HashMap<String, DemoTask>>,
}

impl DemoApi {
    /// Every job answers `pending_polls` times before succeeding.
    pub fn new(pending_polls: u32) -> Self {
        Self {
            closing: Closing::new(DEMO_CLOSING, "acme", "2026-09"),
            pending_polls,
            incidences: Mutex::new(Vec::new()),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ack(&self, incidence_id: &str, draft: &ResolutionDraft) -> Result<ResolutionAck, ApiError> {
        let resolution = Resolution {
            id: Uuid::new_v4().to_string(),
            kind: draft.kind,
            author: draft.author,
            comment: draft.comment.clone(),
            attachment: draft.attachment.clone(),
            created_at: Utc::now(),
        };
        let mut incidences = Self::lock(&self.incidences);
        let incidence = incidences
            .iter_mut()
            .find(|i| i.id == incidence_id)
            .ok_or_else(|| ApiError::NotFound {
                resource: format!("incidence {incidence_id}"),
            })?;
        incidence.resolutions.push(resolution.clone());
        Ok(ResolutionAck {
            resolution,
            status: None,
        })
    }
}

/// The incidence set produced by the demo's generation job.
pub fn seed_incidences(closing_id: &str) -> Vec<Incidence> {
    let record = |id: &str, kind: ComparisonKind, label: &str, employee: Option<&str>, prior: i64, current: i64| {
        Incidence {
            id: id.to_string(),
            closing_id: closing_id.to_string(),
            kind,
            concept_type: "haber".to_string(),
            concept_label: label.to_string(),
            employee_id: employee.map(str::to_string),
            prior_amount: Decimal::from(prior),
            current_amount: Decimal::from(current),
            delta_pct: None,
            informational: false,
            backend_status: None,
            resolutions: Vec::new(),
        }
    };

    let mut new_hire = record("inc-05", ComparisonKind::Individual, "Ingreso", Some("emp-77"), 0, 0);
    new_hire.informational = true;

    vec![
        record("inc-01", ComparisonKind::Aggregate, "Sueldo base", None, 100_000, 130_000),
        record("inc-02", ComparisonKind::Individual, "Bono", Some("emp-12"), 50_000, 90_000),
        record("inc-03", ComparisonKind::Individual, "Bono", Some("emp-31"), 40_000, 45_000),
        record("inc-04", ComparisonKind::Legacy, "Horas extra", Some("emp-12"), 10_000, 30_000),
        new_hire,
    ]
}

impl ClosingApi for DemoApi {
    async fn get_closing(&self, closing_id: &str) -> Result<Closing, ApiError> {
        if closing_id == self.closing.id {
            Ok(self.closing.clone())
        } else {
            Err(ApiError::NotFound {
                resource: format!("closing {closing_id}"),
            })
        }
    }

    async fn list_incidences(&self, _closing_id: &str) -> Result<Vec<Incidence>, ApiError> {
        Ok(Self::lock(&self.incidences).clone())
    }

    async fn get_history(&self, incidence_id: &str) -> Result<Vec<Resolution>, ApiError> {
        Self::lock(&self.incidences)
            .iter()
            .find(|i| i.id == incidence_id)
            .map(|i| i.resolutions.clone())
            .ok_or_else(|| ApiError::NotFound {
                resource: format!("incidence {incidence_id}"),
            })
    }

    async fn append_resolution(
        &self,
        incidence_id: &str,
        draft: &ResolutionDraft,
    ) -> Result<ResolutionAck, ApiError> {
        self.ack(incidence_id, draft)
    }

    async fn approve(
        &self,
        incidence_id: &str,
        draft: &ResolutionDraft,
    ) -> Result<ResolutionAck, ApiError> {
        self.ack(incidence_id, draft)
    }

    async fn reject(
        &self,
        incidence_id: &str,
        draft: &ResolutionDraft,
    ) -> Result<ResolutionAck, ApiError> {
        self.ack(incidence_id, draft)
    }

    async fn confirm_disappearance(
        &self,
        incidence_id: &str,
        draft: &ResolutionDraft,
    ) -> Result<ResolutionAck, ApiError> {
        self.ack(incidence_id, draft)
    }

    async fn submit_job(
        &self,
        _closing_id: &str,
        kind: JobKind,
        _subject: Option<&str>,
    ) -> Result<String, ApiError> {
        let task_id = Uuid::new_v4().to_string();
        Self::lock(&self.tasks).insert(
            task_id.clone(),
            DemoTask {
                kind,
                remaining_pending: self.pending_polls,
            },
        );
        Ok(task_id)
    }

    async fn poll_job(&self, closing_id: &str, task_id: &str) -> Result<JobStatusReport, ApiError> {
        let mut tasks = Self::lock(&self.tasks);
        let task = tasks.get_mut(task_id).ok_or_else(|| ApiError::NotFound {
            resource: format!("task {task_id}"),
        })?;
        if task.remaining_pending > 0 {
            task.remaining_pending -= 1;
            return Ok(JobStatusReport::pending());
        }

        let result = match task.kind {
            JobKind::Verify => Some(json!({ "discrepancies": 0 })),
            JobKind::GenerateIncidences => {
                let mut incidences = Self::lock(&self.incidences);
                if incidences.is_empty() {
                    *incidences = seed_incidences(closing_id);
                }
                Some(json!({ "incidences": incidences.len() }))
            }
            _ => None,
        };
        Ok(JobStatusReport::succeeded(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PayCloseConfig;
    use crate::incidence::{ConversationState, GroupKey, Priority, ResolutionKind, Role};
    use crate::lifecycle::{ClosingStatus, SectionId};
    use crate::workflow::ClosingWorkflow;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn settle(wf: &mut ClosingWorkflow<DemoApi>) {
        let event = timeout(Duration::from_secs(2), wf.next_event())
            .await
            .unwrap()
            .unwrap();
        wf.handle_job_event(event).await.unwrap();
    }

    #[tokio::test]
    async fn full_closing_walkthrough() {
        let config = PayCloseConfig {
            poll_interval_ms: 2,
            ..Default::default()
        };
        let mut wf = ClosingWorkflow::load(Arc::new(DemoApi::new(2)), DEMO_CLOSING, &config)
            .await
            .unwrap();
        assert_eq!(wf.status(), ClosingStatus::Created);

        wf.upload_file(SectionId::UploadA, "libro.xlsx").await.unwrap();
        wf.upload_file(SectionId::UploadB, "movimientos.xlsx").await.unwrap();
        settle(&mut wf).await;
        settle(&mut wf).await;
        assert_eq!(wf.status(), ClosingStatus::FilesComplete);

        wf.continue_to_verification().await.unwrap();
        settle(&mut wf).await;
        assert_eq!(wf.status(), ClosingStatus::VerifiedNoDiscrepancies);

        wf.start_job(JobKind::Consolidate, None).await.unwrap();
        settle(&mut wf).await;
        wf.start_job(JobKind::GenerateIncidences, None).await.unwrap();
        settle(&mut wf).await;
        assert_eq!(wf.status(), ClosingStatus::WithIncidences);

        let view = wf.view().unwrap();
        let salary = view
            .group(&GroupKey {
                concept_type: "haber".into(),
                concept_label: "Sueldo base".into(),
            })
            .unwrap();
        assert_eq!(salary.priority, Priority::Medium);
        assert_eq!(view.legacy.len(), 1);
        assert_eq!(view.informational.len(), 1);

        for id in ["inc-01", "inc-02", "inc-03", "inc-04"] {
            wf.submit_resolution(id, Role::Analyst, ResolutionKind::Justification, "checked", None)
                .await
                .unwrap();
            let state = wf.approve(id, Role::Supervisor).await.unwrap();
            assert_eq!(state, ConversationState::Resolved);
        }
        assert_eq!(wf.status(), ClosingStatus::IncidencesResolved);

        wf.start_job(JobKind::Finalize, None).await.unwrap();
        settle(&mut wf).await;
        assert_eq!(wf.status(), ClosingStatus::Finalized);
        assert_eq!(wf.closing().history().len(), 8);
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let api = DemoApi::new(0);
        let err = api.poll_job(DEMO_CLOSING, "nope").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound { .. }));
    }
}
