//! Drives one closing: jobs, section tracking, lifecycle advances and
//! incidence conversations.
//!
//! Poll tasks report completions over a channel; [`ClosingWorkflow::next_event`]
//! and [`ClosingWorkflow::handle_job_event`] apply them on the owning task, so
//! every state change happens in one place.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::{ClosingApi, ResolutionAck};
use crate::config::PayCloseConfig;
use crate::error::{CloseError, Result};
use crate::incidence::{
    AggregatedView, Attachment, AttachmentPolicy, ConversationState, Incidence, ResolutionDraft,
    ResolutionKind, Role, group_incidences,
};
use crate::jobs::{JobHandle, JobKind, JobOutcome, JobPoller, PollHandle};
use crate::lifecycle::{
    Closing, ClosingLifecycle, ClosingStatus, IncidenceTally, ItemStatus, SectionGate, SectionId,
    SectionStates, Trigger,
};

/// A finished poll, delivered to the workflow owner.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
    pub job: JobHandle,
    pub outcome: JobOutcome,
}

/// Backend endpoint a resolution draft is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitAction {
    Append,
    Approve,
    Reject,
    ConfirmDisappearance,
}

type BusySet = Arc<Mutex<HashSet<String>>>;

fn lock_busy(busy: &BusySet) -> MutexGuard<'_, HashSet<String>> {
    busy.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps one incidence marked busy until dropped.
struct InFlight {
    busy: BusySet,
    incidence_id: String,
}

impl InFlight {
    fn acquire(busy: &BusySet, incidence_id: &str) -> Option<Self> {
        lock_busy(busy).insert(incidence_id.to_string()).then(|| Self {
            busy: Arc::clone(busy),
            incidence_id: incidence_id.to_string(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        lock_busy(&self.busy).remove(&self.incidence_id);
    }
}

/// A locally validated resolution that has not reached the backend yet.
///
/// Created by the `begin_*` methods. The incidence stays busy until the
/// matching [`ClosingWorkflow::complete`] call, or until the submission, its
/// `send` future or its [`SubmissionResult`] is dropped.
pub struct Submission<A> {
    api: Arc<A>,
    guard: InFlight,
    action: SubmitAction,
    draft: ResolutionDraft,
}

impl<A: ClosingApi> Submission<A> {
    pub fn incidence_id(&self) -> &str {
        &self.guard.incidence_id
    }

    pub fn draft(&self) -> &ResolutionDraft {
        &self.draft
    }

    pub async fn send(self) -> SubmissionResult {
        let id = self.guard.incidence_id.as_str();
        let result = match self.action {
            SubmitAction::Append => self.api.append_resolution(id, &self.draft).await,
            SubmitAction::Approve => self.api.approve(id, &self.draft).await,
            SubmitAction::Reject => self.api.reject(id, &self.draft).await,
            SubmitAction::ConfirmDisappearance => {
                self.api.confirm_disappearance(id, &self.draft).await
            }
        };
        SubmissionResult {
            incidence_id: id.to_string(),
            result: result.map_err(CloseError::from),
            _guard: self.guard,
        }
    }
}

pub struct SubmissionResult {
    pub incidence_id: String,
    pub result: Result<ResolutionAck>,
    _guard: InFlight,
}

pub struct ClosingWorkflow<A: ClosingApi> {
    api: Arc<A>,
    closing: Closing,
    sections: SectionStates,
    incidences: Vec<Incidence>,
    /// Uploaded file id to the section it belongs to.
    uploads: HashMap<String, SectionId>,
    in_flight: BusySet,
    poller: JobPoller,
    events_tx: mpsc::UnboundedSender<JobEvent>,
    events_rx: mpsc::UnboundedReceiver<JobEvent>,
    attachments: AttachmentPolicy,
}

impl<A: ClosingApi> ClosingWorkflow<A> {
    pub fn new(api: Arc<A>, closing: Closing, config: &PayCloseConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            api,
            closing,
            sections: SectionStates::default(),
            incidences: Vec::new(),
            uploads: HashMap::new(),
            in_flight: BusySet::default(),
            poller: JobPoller::new(config.poll_config()),
            events_tx,
            events_rx,
            attachments: config.attachment_policy(),
        }
    }

    /// Fetches the closing and, once incidences exist, its incidence list.
    ///
    /// A closing whose incidences were all resolved elsewhere advances here.
    pub async fn load(api: Arc<A>, closing_id: &str, config: &PayCloseConfig) -> Result<Self> {
        let closing = api.get_closing(closing_id).await?;
        let status = closing.status();
        let mut workflow = Self::new(api, closing, config);
        if matches!(
            status,
            ClosingStatus::WithIncidences
                | ClosingStatus::WithoutIncidences
                | ClosingStatus::IncidencesResolved
        ) {
            workflow.refresh_incidences().await?;
        }
        info!(closing = closing_id, status = %workflow.status(), "closing loaded");
        Ok(workflow)
    }

    pub fn closing(&self) -> &Closing {
        &self.closing
    }

    pub fn status(&self) -> ClosingStatus {
        self.closing.status()
    }

    pub fn sections(&self) -> &SectionStates {
        &self.sections
    }

    pub fn unlocked_sections(&self) -> BTreeSet<SectionId> {
        SectionGate::unlocked_sections(self.status())
    }

    pub fn section_complete(&self, section: SectionId) -> bool {
        self.sections.is_complete(section)
    }

    pub fn incidences(&self) -> &[Incidence] {
        &self.incidences
    }

    pub fn incidence(&self, incidence_id: &str) -> Option<&Incidence> {
        self.incidences.iter().find(|i| i.id == incidence_id)
    }

    pub fn incidence_state(&self, incidence_id: &str) -> Option<ConversationState> {
        self.incidence(incidence_id).map(Incidence::state)
    }

    pub fn view(&self) -> Result<AggregatedView> {
        group_incidences(&self.incidences)
    }

    pub fn job_in_progress(&self) -> bool {
        self.poller.any_polling()
    }

    pub fn is_submitting(&self, incidence_id: &str) -> bool {
        lock_busy(&self.in_flight).contains(incidence_id)
    }

    // --- sections and lifecycle ---

    /// Records an upload item and fires whatever system triggers follow.
    pub fn track_upload(
        &mut self,
        section: SectionId,
        file_id: &str,
        status: ItemStatus,
    ) -> Result<Vec<Trigger>> {
        if !SectionId::UPLOADS.contains(&section) {
            return Err(CloseError::Validation(format!("{section} is not an upload section")));
        }
        if !SectionGate::is_unlocked(self.status(), section) {
            return Err(CloseError::IllegalTransition(format!(
                "{section} is locked while the closing is {}",
                self.status()
            )));
        }
        self.uploads.insert(file_id.to_string(), section);
        self.sections.track(section, file_id, status);
        self.advance()
    }

    /// Applies system triggers until the gate has nothing more to fire.
    pub fn advance(&mut self) -> Result<Vec<Trigger>> {
        let mut fired = Vec::new();
        while let Some(trigger) = SectionGate::should_auto_advance(self.status(), &self.sections) {
            self.closing.apply(trigger)?;
            if trigger == Trigger::ReopenFiles {
                self.sections.reset();
                self.uploads.clear();
                self.incidences.clear();
            }
            fired.push(trigger);
        }
        Ok(fired)
    }

    /// User "continue": moves a closing with complete uploads into verification
    /// and starts the verify job.
    pub async fn continue_to_verification(&mut self) -> Result<PollHandle> {
        if !SectionGate::continue_allowed(self.status(), &self.sections) {
            return Err(CloseError::IllegalTransition(format!(
                "continue is not available while the closing is {} with uploads {}",
                self.status(),
                if self.sections.uploads_complete() {
                    "complete"
                } else {
                    "incomplete"
                }
            )));
        }
        self.closing.apply(Trigger::Continue)?;
        self.start_job(JobKind::Verify, None).await
    }

    pub fn request_recharge(&mut self) -> Result<ClosingStatus> {
        let status = self.closing.apply(Trigger::RequestRecharge)?;
        self.poller.cancel_all();
        Ok(status)
    }

    /// Approves a pending recharge and reopens the upload sections.
    pub fn approve_recharge(&mut self) -> Result<ClosingStatus> {
        self.closing.apply(Trigger::ApproveRecharge)?;
        self.advance()?;
        Ok(self.status())
    }

    // --- jobs ---

    /// Tracks `file_id` as loading in `section` and starts its processing job.
    pub async fn upload_file(&mut self, section: SectionId, file_id: &str) -> Result<PollHandle> {
        self.track_upload(section, file_id, ItemStatus::Loading)?;
        self.start_job(JobKind::FileProcess, Some(file_id.to_string()))
            .await
    }

    /// Submits a backend job and starts polling it.
    ///
    /// A job for the same kind and subject that is still being polled is superseded.
    pub async fn start_job(&mut self, kind: JobKind, subject: Option<String>) -> Result<PollHandle> {
        self.ensure_job_allowed(kind)?;

        let task_id = self
            .api
            .submit_job(&self.closing.id, kind, subject.as_deref())
            .await?;
        let job = JobHandle::new(self.closing.id.clone(), task_id, kind, subject);
        info!(closing = %job.closing_id, task = %job.task_id, %kind, "job submitted");

        let api = Arc::clone(&self.api);
        let poll_fn = move |job: JobHandle| {
            let api = Arc::clone(&api);
            async move {
                api.poll_job(&job.closing_id, &job.task_id)
                    .await
                    .map_err(CloseError::from)
            }
        };
        let events = self.events_tx.clone();
        let on_complete = move |job: JobHandle, outcome: JobOutcome| {
            // The receiver only goes away with the workflow itself.
            let _ = events.send(JobEvent { job, outcome });
        };

        Ok(self.poller.submit(job.operation(), job, poll_fn, on_complete))
    }

    pub fn cancel_job(&mut self, handle: &PollHandle) -> bool {
        self.poller.cancel(handle)
    }

    fn ensure_job_allowed(&self, kind: JobKind) -> Result<()> {
        let status = self.status();
        let allowed = match kind {
            JobKind::FileProcess => SectionId::UPLOADS
                .iter()
                .any(|s| SectionGate::is_unlocked(status, *s)),
            JobKind::Verify => status == ClosingStatus::Verifying,
            JobKind::Consolidate => {
                ClosingLifecycle::can_transition(status, Trigger::Consolidated)
            }
            JobKind::GenerateIncidences => status == ClosingStatus::Consolidated,
            JobKind::Finalize => ClosingLifecycle::can_transition(status, Trigger::Finalize),
        };
        if allowed {
            Ok(())
        } else {
            Err(CloseError::IllegalTransition(format!(
                "cannot start a {kind} job while the closing is {status}"
            )))
        }
    }

    /// Waits for the next finished poll.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events_rx.recv().await
    }

    /// Feeds a finished job into the sections and the lifecycle.
    ///
    /// Failed and timed-out jobs are returned as errors after their section
    /// state has been updated.
    pub async fn handle_job_event(&mut self, event: JobEvent) -> Result<Vec<Trigger>> {
        self.poller.reap();
        let JobEvent { job, outcome } = event;
        if job.closing_id != self.closing.id {
            debug!(closing = %job.closing_id, "ignoring job of another closing");
            return Ok(Vec::new());
        }

        match job.kind {
            JobKind::FileProcess => {
                let Some(file_id) = job.subject.as_deref() else {
                    return Err(CloseError::Validation(
                        "file-process job without a file id".into(),
                    ));
                };
                let Some(section) = self.uploads.get(file_id).copied() else {
                    debug!(file = file_id, "ignoring result for an untracked file");
                    return Ok(Vec::new());
                };
                let item = match outcome {
                    JobOutcome::Succeeded { .. } => ItemStatus::Processed,
                    _ => ItemStatus::Error,
                };
                self.sections.track(section, file_id, item);
                outcome.into_result(job.kind)?;
                self.advance()
            }
            JobKind::Verify => {
                let result = outcome.into_result(job.kind)?;
                let discrepancies = discrepancy_count(result.as_ref())?;
                if discrepancies > 0 {
                    info!(closing = %self.closing.id, discrepancies, "verification found discrepancies");
                }
                self.sections.discrepancies = Some(discrepancies);
                self.advance()
            }
            JobKind::Consolidate => {
                outcome.into_result(job.kind)?;
                self.closing.apply(Trigger::Consolidated)?;
                let mut fired = vec![Trigger::Consolidated];
                fired.extend(self.advance()?);
                Ok(fired)
            }
            JobKind::GenerateIncidences => {
                outcome.into_result(job.kind)?;
                self.refresh_incidences().await
            }
            JobKind::Finalize => {
                outcome.into_result(job.kind)?;
                self.closing.apply(Trigger::Finalize)?;
                self.poller.cancel_all();
                Ok(vec![Trigger::Finalize])
            }
        }
    }

    // --- incidences ---

    /// Re-reads the incidence list from the backend and fires whatever the
    /// new tally allows, e.g. `all_incidences_resolved` after another
    /// supervisor approved the last open incidence.
    pub async fn refresh_incidences(&mut self) -> Result<Vec<Trigger>> {
        let mut incidences = self.api.list_incidences(&self.closing.id).await?;
        for incidence in &mut incidences {
            incidence.sort_resolutions();
            report_mismatch(incidence);
        }
        self.incidences = incidences;
        self.sections.incidences = Some(IncidenceTally::from_incidences(&self.incidences));
        self.advance()
    }

    /// Replaces one incidence's resolutions with the backend history.
    ///
    /// The cached backend status is dropped; the state is derived from the
    /// history until the next [`refresh_incidences`](Self::refresh_incidences).
    pub async fn refresh_history(&mut self, incidence_id: &str) -> Result<ConversationState> {
        let history = self.api.get_history(incidence_id).await?;
        let incidence = self.incidence_mut(incidence_id)?;
        incidence.resolutions = history;
        incidence.sort_resolutions();
        incidence.backend_status = None;
        Ok(incidence.state())
    }

    pub fn begin_resolution(
        &mut self,
        incidence_id: &str,
        actor: Role,
        kind: ResolutionKind,
        comment: &str,
        attachment: Option<Attachment>,
    ) -> Result<Submission<A>> {
        let policy = self.attachments;
        let action = match kind {
            ResolutionKind::Approval => SubmitAction::Approve,
            ResolutionKind::Rejection => SubmitAction::Reject,
            ResolutionKind::Justification | ResolutionKind::Query => SubmitAction::Append,
        };
        self.begin(incidence_id, action, |inc| {
            inc.draft_resolution(actor, kind, comment, attachment, &policy)
        })
    }

    pub fn begin_approval(&mut self, incidence_id: &str, actor: Role) -> Result<Submission<A>> {
        self.begin(incidence_id, SubmitAction::Approve, |inc| {
            inc.draft_approval(actor)
        })
    }

    pub fn begin_rejection(
        &mut self,
        incidence_id: &str,
        actor: Role,
        comment: &str,
    ) -> Result<Submission<A>> {
        self.begin(incidence_id, SubmitAction::Reject, |inc| {
            inc.draft_rejection(actor, comment)
        })
    }

    pub fn begin_disappearance_confirmation(
        &mut self,
        incidence_id: &str,
        actor: Role,
        comment: &str,
    ) -> Result<Submission<A>> {
        self.begin(incidence_id, SubmitAction::ConfirmDisappearance, |inc| {
            inc.draft_disappearance_confirmation(actor, comment)
        })
    }

    fn begin(
        &mut self,
        incidence_id: &str,
        action: SubmitAction,
        draft: impl FnOnce(&Incidence) -> Result<ResolutionDraft>,
    ) -> Result<Submission<A>> {
        let busy = || CloseError::SubmissionInFlight(incidence_id.to_string());
        if self.is_submitting(incidence_id) {
            return Err(busy());
        }
        let incidence = self
            .incidence(incidence_id)
            .ok_or_else(|| CloseError::NotFound(format!("incidence {incidence_id}")))?;
        let draft = draft(incidence)?;

        let guard = InFlight::acquire(&self.in_flight, incidence_id).ok_or_else(busy)?;
        debug!(incidence = incidence_id, kind = %draft.kind, author = %draft.author, "submitting resolution");
        Ok(Submission {
            api: Arc::clone(&self.api),
            guard,
            action,
            draft,
        })
    }

    /// Applies the backend's answer to a submission.
    ///
    /// On error the incidence is left exactly as it was; a [`CloseError::StaleState`]
    /// calls for [`refresh_history`](Self::refresh_history) rather than a retry.
    pub fn complete(&mut self, submitted: SubmissionResult) -> Result<ConversationState> {
        let SubmissionResult {
            incidence_id,
            result,
            _guard: guard,
        } = submitted;
        drop(guard);

        let ack = match result {
            Ok(ack) => ack,
            Err(err) => {
                warn!(incidence = %incidence_id, error = %err, "resolution not accepted");
                return Err(err);
            }
        };

        let incidence = self.incidence_mut(&incidence_id)?;
        incidence.record(ack.resolution, ack.status)?;
        report_mismatch(incidence);
        let state = incidence.state();
        info!(incidence = %incidence_id, %state, "resolution recorded");

        if self.sections.incidences.is_some() {
            self.sections.incidences = Some(IncidenceTally::from_incidences(&self.incidences));
        }
        self.advance()?;
        Ok(state)
    }

    pub async fn submit_resolution(
        &mut self,
        incidence_id: &str,
        actor: Role,
        kind: ResolutionKind,
        comment: &str,
        attachment: Option<Attachment>,
    ) -> Result<ConversationState> {
        let submission = self.begin_resolution(incidence_id, actor, kind, comment, attachment)?;
        let result = submission.send().await;
        self.complete(result)
    }

    pub async fn approve(&mut self, incidence_id: &str, actor: Role) -> Result<ConversationState> {
        let submission = self.begin_approval(incidence_id, actor)?;
        let result = submission.send().await;
        self.complete(result)
    }

    pub async fn reject(
        &mut self,
        incidence_id: &str,
        actor: Role,
        comment: &str,
    ) -> Result<ConversationState> {
        let submission = self.begin_rejection(incidence_id, actor, comment)?;
        let result = submission.send().await;
        self.complete(result)
    }

    pub async fn confirm_disappearance(
        &mut self,
        incidence_id: &str,
        actor: Role,
        comment: &str,
    ) -> Result<ConversationState> {
        let submission = self.begin_disappearance_confirmation(incidence_id, actor, comment)?;
        let result = submission.send().await;
        self.complete(result)
    }

    fn incidence_mut(&mut self, incidence_id: &str) -> Result<&mut Incidence> {
        self.incidences
            .iter_mut()
            .find(|i| i.id == incidence_id)
            .ok_or_else(|| CloseError::NotFound(format!("incidence {incidence_id}")))
    }

    /// Stops every poll this workflow owns.
    pub fn shutdown(&mut self) {
        self.poller.cancel_all();
    }
}

fn report_mismatch(incidence: &Incidence) {
    if let Some(mismatch) = incidence.status_mismatch() {
        warn!(
            incidence = %incidence.id,
            backend = %mismatch.backend,
            derived = %mismatch.derived,
            "backend status disagrees with resolution history"
        );
    }
}

fn discrepancy_count(result: Option<&Value>) -> Result<u32> {
    result
        .and_then(|r| r.get("discrepancies"))
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| CloseError::Validation("verify result has no discrepancy count".into()))
}
