use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CloseError, Result};

/// Status of a payroll closing.
///
/// Forward path: CREATED → FILES_PENDING → FILES_COMPLETE → VERIFYING →
/// VERIFIED_NO_DISCREPANCIES → CONSOLIDATED → WITH_INCIDENCES | WITHOUT_INCIDENCES
/// → INCIDENCES_RESOLVED → FINALIZED. The recharge branch is the only way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosingStatus {
    Created,
    FilesPending,
    FilesComplete,
    Verifying,
    VerifiedNoDiscrepancies,
    Consolidated,
    WithIncidences,
    WithoutIncidences,
    IncidencesResolved,
    Finalized,
    RechargeRequested,
    RechargeApproved,
}

impl ClosingStatus {
    pub const ALL: [ClosingStatus; 12] = [
        ClosingStatus::Created,
        ClosingStatus::FilesPending,
        ClosingStatus::FilesComplete,
        ClosingStatus::Verifying,
        ClosingStatus::VerifiedNoDiscrepancies,
        ClosingStatus::Consolidated,
        ClosingStatus::WithIncidences,
        ClosingStatus::WithoutIncidences,
        ClosingStatus::IncidencesResolved,
        ClosingStatus::Finalized,
        ClosingStatus::RechargeRequested,
        ClosingStatus::RechargeApproved,
    ];

    pub fn is_terminal(self) -> bool {
        self == ClosingStatus::Finalized
    }

    /// States from which a recharge may be requested.
    pub fn is_post_consolidation(self) -> bool {
        matches!(
            self,
            ClosingStatus::Consolidated
                | ClosingStatus::WithIncidences
                | ClosingStatus::WithoutIncidences
                | ClosingStatus::IncidencesResolved
        )
    }
}

impl fmt::Display for ClosingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClosingStatus::Created => "CREATED",
            ClosingStatus::FilesPending => "FILES_PENDING",
            ClosingStatus::FilesComplete => "FILES_COMPLETE",
            ClosingStatus::Verifying => "VERIFYING",
            ClosingStatus::VerifiedNoDiscrepancies => "VERIFIED_NO_DISCREPANCIES",
            ClosingStatus::Consolidated => "CONSOLIDATED",
            ClosingStatus::WithIncidences => "WITH_INCIDENCES",
            ClosingStatus::WithoutIncidences => "WITHOUT_INCIDENCES",
            ClosingStatus::IncidencesResolved => "INCIDENCES_RESOLVED",
            ClosingStatus::Finalized => "FINALIZED",
            ClosingStatus::RechargeRequested => "RECHARGE_REQUESTED",
            ClosingStatus::RechargeApproved => "RECHARGE_APPROVED",
        };
        write!(f, "{name}")
    }
}

/// Who fires a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerOrigin {
    /// An explicit action by an analyst or supervisor.
    User,
    /// Fired as soon as a job result or section state is observed.
    System,
}

/// Events that move a closing between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    OpenUploads,
    FilesCompleted,
    Continue,
    VerificationPassed,
    Consolidated,
    IncidencesFound,
    NoIncidencesFound,
    AllIncidencesResolved,
    Finalize,
    RequestRecharge,
    ApproveRecharge,
    ReopenFiles,
}

impl Trigger {
    pub fn origin(self) -> TriggerOrigin {
        match self {
            Trigger::Continue
            | Trigger::Consolidated
            | Trigger::Finalize
            | Trigger::RequestRecharge
            | Trigger::ApproveRecharge => TriggerOrigin::User,
            Trigger::OpenUploads
            | Trigger::FilesCompleted
            | Trigger::VerificationPassed
            | Trigger::IncidencesFound
            | Trigger::NoIncidencesFound
            | Trigger::AllIncidencesResolved
            | Trigger::ReopenFiles => TriggerOrigin::System,
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Trigger::OpenUploads => "open_uploads",
            Trigger::FilesCompleted => "files_completed",
            Trigger::Continue => "continue",
            Trigger::VerificationPassed => "verification_passed",
            Trigger::Consolidated => "consolidated",
            Trigger::IncidencesFound => "incidences_found",
            Trigger::NoIncidencesFound => "no_incidences_found",
            Trigger::AllIncidencesResolved => "all_incidences_resolved",
            Trigger::Finalize => "finalize",
            Trigger::RequestRecharge => "request_recharge",
            Trigger::ApproveRecharge => "approve_recharge",
            Trigger::ReopenFiles => "reopen_files",
        };
        write!(f, "{name}")
    }
}

/// Transition table for the closing lifecycle.
pub struct ClosingLifecycle;

impl ClosingLifecycle {
    /// Returns the target status, or `None` when the pair is not in the table.
    fn target(current: ClosingStatus, trigger: Trigger) -> Option<ClosingStatus> {
        use ClosingStatus as S;
        use Trigger as T;

        match (current, trigger) {
            (S::Created, T::OpenUploads) => Some(S::FilesPending),
            (S::FilesPending, T::FilesCompleted) => Some(S::FilesComplete),
            (S::FilesComplete, T::Continue) => Some(S::Verifying),
            (S::Verifying, T::VerificationPassed) => Some(S::VerifiedNoDiscrepancies),
            (S::VerifiedNoDiscrepancies, T::Consolidated) => Some(S::Consolidated),
            (S::Consolidated, T::IncidencesFound) => Some(S::WithIncidences),
            (S::Consolidated, T::NoIncidencesFound) => Some(S::WithoutIncidences),
            (S::WithIncidences, T::AllIncidencesResolved) => Some(S::IncidencesResolved),
            (S::IncidencesResolved | S::WithoutIncidences, T::Finalize) => Some(S::Finalized),
            (s, T::RequestRecharge) if s.is_post_consolidation() => Some(S::RechargeRequested),
            (S::RechargeRequested, T::ApproveRecharge) => Some(S::RechargeApproved),
            (S::RechargeApproved, T::ReopenFiles) => Some(S::FilesPending),
            _ => None,
        }
    }

    pub fn can_transition(current: ClosingStatus, trigger: Trigger) -> bool {
        Self::target(current, trigger).is_some()
    }

    pub fn next_state(current: ClosingStatus, trigger: Trigger) -> Result<ClosingStatus> {
        Self::target(current, trigger).ok_or_else(|| {
            CloseError::IllegalTransition(format!("cannot apply {trigger} while {current}"))
        })
    }

    /// Triggers that are legal from `current`, in declaration order.
    pub fn available(current: ClosingStatus) -> Vec<Trigger> {
        ALL_TRIGGERS
            .iter()
            .copied()
            .filter(|t| Self::can_transition(current, *t))
            .collect()
    }
}

const ALL_TRIGGERS: [Trigger; 12] = [
    Trigger::OpenUploads,
    Trigger::FilesCompleted,
    Trigger::Continue,
    Trigger::VerificationPassed,
    Trigger::Consolidated,
    Trigger::IncidencesFound,
    Trigger::NoIncidencesFound,
    Trigger::AllIncidencesResolved,
    Trigger::Finalize,
    Trigger::RequestRecharge,
    Trigger::ApproveRecharge,
    Trigger::ReopenFiles,
];
