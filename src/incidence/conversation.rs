//! Turn-based resolution protocol for a single incidence.
//!
//! The conversation state is either the status the backend reports (when it
//! is one we recognize) or a pure function of the last resolution. Local
//! operations never touch the resolution list: they produce a
//! [`ResolutionDraft`], and [`Incidence::record`] appends the acknowledged
//! resolution afterwards.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::model::{Attachment, Incidence, Resolution, ResolutionKind, Role};
use crate::error::{CloseError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    /// Nothing said yet; the analyst opens.
    Pending,
    AnalystTurn,
    SupervisorTurn,
    Resolved,
    /// The backend noticed the difference vanished; a supervisor has to confirm.
    PendingDisappearanceConfirmation,
}

impl ConversationState {
    /// Role expected to act next. `None` once resolved.
    pub fn turn(self) -> Option<Role> {
        match self {
            ConversationState::Pending | ConversationState::AnalystTurn => Some(Role::Analyst),
            ConversationState::SupervisorTurn
            | ConversationState::PendingDisappearanceConfirmation => Some(Role::Supervisor),
            ConversationState::Resolved => None,
        }
    }

    pub fn is_resolved(self) -> bool {
        self == ConversationState::Resolved
    }

    /// Maps a backend status string; unknown values yield `None`.
    pub fn from_backend(status: &str) -> Option<Self> {
        match status.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(ConversationState::Pending),
            "analyst_turn" => Some(ConversationState::AnalystTurn),
            "supervisor_turn" => Some(ConversationState::SupervisorTurn),
            "resolved" | "approved" => Some(ConversationState::Resolved),
            "pending_disappearance_confirmation" => {
                Some(ConversationState::PendingDisappearanceConfirmation)
            }
            _ => None,
        }
    }

    /// Fallback derivation from the resolution sequence.
    pub fn derive(resolutions: &[Resolution]) -> Self {
        let Some(last) = resolutions.iter().max_by_key(|r| r.created_at) else {
            return ConversationState::Pending;
        };

        match (last.author, last.kind) {
            (_, ResolutionKind::Approval) => ConversationState::Resolved,
            (Role::System, _) => ConversationState::PendingDisappearanceConfirmation,
            (_, ResolutionKind::Rejection) => ConversationState::AnalystTurn,
            (_, ResolutionKind::Justification) => ConversationState::SupervisorTurn,
            (Role::Analyst, ResolutionKind::Query) => ConversationState::SupervisorTurn,
            (Role::Supervisor, ResolutionKind::Query) => ConversationState::AnalystTurn,
        }
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConversationState::Pending => "PENDING",
            ConversationState::AnalystTurn => "ANALYST_TURN",
            ConversationState::SupervisorTurn => "SUPERVISOR_TURN",
            ConversationState::Resolved => "RESOLVED",
            ConversationState::PendingDisappearanceConfirmation => {
                "PENDING_DISAPPEARANCE_CONFIRMATION"
            }
        };
        write!(f, "{name}")
    }
}

/// Backend status and local derivation disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusMismatch {
    pub backend: ConversationState,
    pub derived: ConversationState,
}

/// A validated resolution waiting to be sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionDraft {
    pub kind: ResolutionKind,
    pub author: Role,
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentPolicy {
    pub max_bytes: u64,
}

impl Default for AttachmentPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

impl AttachmentPolicy {
    pub fn check(&self, attachment: &Attachment) -> Result<()> {
        if attachment.file_name.trim().is_empty() {
            return Err(CloseError::Validation("attachment has no file name".into()));
        }
        if attachment.size_bytes == 0 {
            return Err(CloseError::Validation(format!(
                "attachment {} is empty",
                attachment.file_name
            )));
        }
        if attachment.size_bytes > self.max_bytes {
            return Err(CloseError::Validation(format!(
                "attachment {} is {} bytes, limit is {}",
                attachment.file_name, attachment.size_bytes, self.max_bytes
            )));
        }
        Ok(())
    }
}

fn may_author(role: Role, kind: ResolutionKind) -> bool {
    match role {
        Role::Analyst => matches!(kind, ResolutionKind::Justification | ResolutionKind::Query),
        Role::Supervisor => matches!(
            kind,
            ResolutionKind::Query | ResolutionKind::Rejection | ResolutionKind::Approval
        ),
        Role::System => false,
    }
}

impl Incidence {
    /// Current state: the recognized backend status wins over the derivation.
    pub fn state(&self) -> ConversationState {
        self.backend_state().unwrap_or_else(|| self.derived_state())
    }

    pub fn derived_state(&self) -> ConversationState {
        ConversationState::derive(&self.resolutions)
    }

    fn backend_state(&self) -> Option<ConversationState> {
        self.backend_status
            .as_deref()
            .and_then(ConversationState::from_backend)
    }

    pub fn turn(&self) -> Option<Role> {
        self.state().turn()
    }

    pub fn status_mismatch(&self) -> Option<StatusMismatch> {
        let backend = self.backend_state()?;
        let derived = self.derived_state();
        (backend != derived).then_some(StatusMismatch { backend, derived })
    }

    /// Validates an ordinary turn move (justification, query, approval or rejection).
    pub fn draft_resolution(
        &self,
        actor: Role,
        kind: ResolutionKind,
        comment: &str,
        attachment: Option<Attachment>,
        policy: &AttachmentPolicy,
    ) -> Result<ResolutionDraft> {
        if actor == Role::System {
            return Err(CloseError::IllegalTransition(
                "system resolutions are only produced by the backend".into(),
            ));
        }

        let state = self.state();
        match state {
            ConversationState::Resolved => {
                return Err(CloseError::IllegalTransition(format!(
                    "incidence {} is already resolved",
                    self.id
                )));
            }
            ConversationState::PendingDisappearanceConfirmation => {
                return Err(CloseError::IllegalTransition(format!(
                    "incidence {} is awaiting disappearance confirmation",
                    self.id
                )));
            }
            _ => {}
        }

        if state.turn() != Some(actor) {
            return Err(CloseError::IllegalTransition(format!(
                "incidence {} is in {state}; {actor} cannot act",
                self.id
            )));
        }
        if !may_author(actor, kind) {
            return Err(CloseError::IllegalTransition(format!(
                "{actor} cannot submit a {kind}"
            )));
        }

        let comment = comment.trim();
        match kind {
            ResolutionKind::Rejection if comment.is_empty() => {
                return Err(CloseError::Validation("a rejection needs a comment".into()));
            }
            ResolutionKind::Justification | ResolutionKind::Query
                if comment.is_empty() && attachment.is_none() =>
            {
                return Err(CloseError::Validation(format!(
                    "a {kind} needs a comment or an attachment"
                )));
            }
            _ => {}
        }
        if let Some(attachment) = &attachment {
            policy.check(attachment)?;
        }

        Ok(ResolutionDraft {
            kind,
            author: actor,
            comment: comment.to_string(),
            attachment,
        })
    }

    pub fn draft_approval(&self, actor: Role) -> Result<ResolutionDraft> {
        self.draft_resolution(
            actor,
            ResolutionKind::Approval,
            "",
            None,
            &AttachmentPolicy::default(),
        )
    }

    pub fn draft_rejection(&self, actor: Role, comment: &str) -> Result<ResolutionDraft> {
        self.draft_resolution(
            actor,
            ResolutionKind::Rejection,
            comment,
            None,
            &AttachmentPolicy::default(),
        )
    }

    /// Supervisor confirmation that a vanished difference can be closed. Ignores turn rules.
    pub fn draft_disappearance_confirmation(
        &self,
        actor: Role,
        comment: &str,
    ) -> Result<ResolutionDraft> {
        if actor != Role::Supervisor {
            return Err(CloseError::IllegalTransition(format!(
                "{actor} cannot confirm a disappearance"
            )));
        }
        if self.state() != ConversationState::PendingDisappearanceConfirmation {
            return Err(CloseError::IllegalTransition(format!(
                "incidence {} is in {}, not awaiting disappearance confirmation",
                self.id,
                self.state()
            )));
        }
        let comment = comment.trim();
        if comment.is_empty() {
            return Err(CloseError::Validation(
                "a disappearance confirmation needs a comment".into(),
            ));
        }
        Ok(ResolutionDraft {
            kind: ResolutionKind::Approval,
            author: actor,
            comment: comment.to_string(),
            attachment: None,
        })
    }

    /// Appends a resolution acknowledged by the backend, together with the
    /// status it reported (if any).
    pub fn record(&mut self, resolution: Resolution, backend_status: Option<String>) -> Result<()> {
        if self.resolutions.iter().any(|r| r.id == resolution.id) {
            return Err(CloseError::StaleState(format!(
                "resolution {} already recorded on incidence {}",
                resolution.id, self.id
            )));
        }
        if let Some(last) = self.last_resolution()
            && resolution.created_at < last.created_at
        {
            return Err(CloseError::StaleState(format!(
                "resolution {} predates the latest entry of incidence {}",
                resolution.id, self.id
            )));
        }
        self.resolutions.push(resolution);
        self.backend_status = backend_status;
        Ok(())
    }
}
