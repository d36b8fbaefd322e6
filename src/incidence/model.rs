use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::aggregate::{Priority, variation_pct};
use crate::error::Result;

/// How the backend compared the two periods to produce an incidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonKind {
    /// One employee, one concept.
    Individual,
    /// Whole-concept totals.
    Aggregate,
    /// Produced by the previous detection engine; never grouped.
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Analyst,
    Supervisor,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Analyst => write!(f, "analyst"),
            Role::Supervisor => write!(f, "supervisor"),
            Role::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    Justification,
    Query,
    Approval,
    Rejection,
}

impl fmt::Display for ResolutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionKind::Justification => write!(f, "justification"),
            ResolutionKind::Query => write!(f, "query"),
            ResolutionKind::Approval => write!(f, "approval"),
            ResolutionKind::Rejection => write!(f, "rejection"),
        }
    }
}

/// Metadata of a file attached to a resolution. The upload itself happens elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_name: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// One append-only event in an incidence conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub id: String,
    pub kind: ResolutionKind,
    pub author: Role,
    #[serde(default)]
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
}

/// A detected difference between the current and the prior payroll period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incidence {
    pub id: String,
    #[serde(default)]
    pub closing_id: String,
    pub kind: ComparisonKind,
    pub concept_type: String,
    pub concept_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<String>,
    pub prior_amount: Decimal,
    pub current_amount: Decimal,
    /// Variation reported by the backend, used verbatim when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_pct: Option<Decimal>,
    /// Notices that need no action (e.g. a new hire was reported).
    #[serde(default)]
    pub informational: bool,
    /// Authoritative conversation status as reported by the backend.
    #[serde(default, rename = "status", skip_serializing_if = "Option::is_none")]
    pub backend_status: Option<String>,
    #[serde(default)]
    pub resolutions: Vec<Resolution>,
}

impl Incidence {
    pub fn variation_pct(&self) -> Result<Decimal> {
        match self.delta_pct {
            Some(delta) => Ok(delta),
            None => variation_pct(self.prior_amount, self.current_amount),
        }
    }

    pub fn priority(&self) -> Result<Priority> {
        self.variation_pct().map(Priority::from_delta)
    }

    /// Most recent resolution by creation time; ties go to the later entry.
    pub fn last_resolution(&self) -> Option<&Resolution> {
        self.resolutions.iter().max_by_key(|r| r.created_at)
    }

    /// Orders resolutions by creation time, keeping arrival order for ties.
    pub fn sort_resolutions(&mut self) {
        self.resolutions.sort_by_key(|r| r.created_at);
    }
}
