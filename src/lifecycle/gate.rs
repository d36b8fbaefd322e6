//! Section unlocking and auto-advance derivation.
//!
//! Everything here is a pure function of the closing status and the observed
//! [`SectionStates`]; the workflow feeds job results in and applies whatever
//! trigger [`SectionGate::should_auto_advance`] returns.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::status::{ClosingStatus, Trigger};
use crate::incidence::Incidence;

/// Independent stages of the closing screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionId {
    /// Payroll book upload.
    UploadA,
    /// Movements / novelties upload.
    UploadB,
    Verification,
    Incidences,
}

impl SectionId {
    pub const UPLOADS: [SectionId; 2] = [SectionId::UploadA, SectionId::UploadB];
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SectionId::UploadA => "upload-a",
            SectionId::UploadB => "upload-b",
            SectionId::Verification => "verification",
            SectionId::Incidences => "incidences",
        };
        write!(f, "{name}")
    }
}

/// Processing status of one tracked sub-item (usually an uploaded file).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Loading,
    Processed,
    Error,
}

/// Actionable vs resolved incidence counts. Informational records are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidenceTally {
    pub actionable: usize,
    pub resolved: usize,
}

impl IncidenceTally {
    pub fn from_incidences(incidences: &[Incidence]) -> Self {
        let actionable: Vec<_> = incidences.iter().filter(|i| !i.informational).collect();
        Self {
            actionable: actionable.len(),
            resolved: actionable.iter().filter(|i| i.state().is_resolved()).count(),
        }
    }

    pub fn all_resolved(&self) -> bool {
        self.resolved == self.actionable
    }
}

/// Everything the gate knows about the sections of one closing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectionStates {
    items: BTreeMap<SectionId, BTreeMap<String, ItemStatus>>,
    /// Discrepancy count reported by the last verification job.
    pub discrepancies: Option<u32>,
    /// Set once an incidence generation result has been observed.
    pub incidences: Option<IncidenceTally>,
}

impl SectionStates {
    pub fn track(&mut self, section: SectionId, item_id: impl Into<String>, status: ItemStatus) {
        self.items
            .entry(section)
            .or_default()
            .insert(item_id.into(), status);
    }

    pub fn items(&self, section: SectionId) -> impl Iterator<Item = (&str, ItemStatus)> {
        self.items
            .get(&section)
            .into_iter()
            .flat_map(|m| m.iter().map(|(id, s)| (id.as_str(), *s)))
    }

    pub fn has_uploads(&self) -> bool {
        SectionId::UPLOADS
            .iter()
            .any(|s| self.items(*s).next().is_some())
    }

    pub fn is_complete(&self, section: SectionId) -> bool {
        match section {
            SectionId::UploadA | SectionId::UploadB => {
                items_complete(self.items(section).map(|(_, s)| s))
            }
            SectionId::Verification => self.discrepancies == Some(0),
            SectionId::Incidences => self.incidences.is_some_and(|t| t.all_resolved()),
        }
    }

    pub fn uploads_complete(&self) -> bool {
        SectionId::UPLOADS.iter().all(|s| self.is_complete(*s))
    }

    /// Forgets upload, verification and incidence observations after a recharge.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Complete iff at least one item is tracked and every item is processed.
pub fn items_complete(items: impl IntoIterator<Item = ItemStatus>) -> bool {
    let mut any = false;
    for status in items {
        if status != ItemStatus::Processed {
            return false;
        }
        any = true;
    }
    any
}

pub struct SectionGate;

impl SectionGate {
    pub fn unlocked_sections(status: ClosingStatus) -> BTreeSet<SectionId> {
        use ClosingStatus as S;
        use SectionId::*;

        let unlocked: &[SectionId] = match status {
            S::Created | S::FilesPending | S::FilesComplete | S::RechargeApproved => {
                &[UploadA, UploadB]
            }
            S::Verifying => &[UploadA, UploadB, Verification],
            S::VerifiedNoDiscrepancies => &[Verification],
            S::Consolidated | S::WithIncidences | S::WithoutIncidences | S::IncidencesResolved => {
                &[Incidences]
            }
            S::RechargeRequested | S::Finalized => &[],
        };
        unlocked.iter().copied().collect()
    }

    pub fn is_unlocked(status: ClosingStatus, section: SectionId) -> bool {
        Self::unlocked_sections(status).contains(&section)
    }

    /// Guard for the user "continue" action.
    pub fn continue_allowed(status: ClosingStatus, sections: &SectionStates) -> bool {
        status == ClosingStatus::FilesComplete && sections.uploads_complete()
    }

    /// The system trigger the lifecycle should fire now, if any.
    pub fn should_auto_advance(status: ClosingStatus, sections: &SectionStates) -> Option<Trigger> {
        use ClosingStatus as S;

        match status {
            S::Created if sections.has_uploads() => Some(Trigger::OpenUploads),
            S::FilesPending if sections.uploads_complete() => Some(Trigger::FilesCompleted),
            S::Verifying if sections.discrepancies == Some(0) && sections.uploads_complete() => {
                Some(Trigger::VerificationPassed)
            }
            S::Consolidated => sections.incidences.map(|t| {
                if t.actionable == 0 {
                    Trigger::NoIncidencesFound
                } else {
                    Trigger::IncidencesFound
                }
            }),
            S::WithIncidences if sections.incidences.is_some_and(|t| t.all_resolved()) => {
                Some(Trigger::AllIncidencesResolved)
            }
            S::RechargeApproved => Some(Trigger::ReopenFiles),
            _ => None,
        }
    }
}
