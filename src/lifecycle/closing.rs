use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::status::{ClosingLifecycle, ClosingStatus, Trigger};
use crate::error::Result;

/// One applied lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: ClosingStatus,
    pub to: ClosingStatus,
    pub trigger: Trigger,
    pub at: DateTime<Utc>,
}

/// The payroll closing of one client for one period.
///
/// `status` is only written through [`Closing::apply`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Closing {
    pub id: String,
    pub client_id: String,
    /// Period in `YYYY-MM` form.
    pub period: String,
    status: ClosingStatus,
    #[serde(default)]
    history: Vec<TransitionRecord>,
}

impl Closing {
    pub fn new(id: impl Into<String>, client_id: impl Into<String>, period: impl Into<String>) -> Self {
        Self::with_status(id, client_id, period, ClosingStatus::Created)
    }

    /// Rebuilds a closing whose status was reported by the backend.
    pub fn with_status(
        id: impl Into<String>,
        client_id: impl Into<String>,
        period: impl Into<String>,
        status: ClosingStatus,
    ) -> Self {
        Self {
            id: id.into(),
            client_id: client_id.into(),
            period: period.into(),
            status,
            history: Vec::new(),
        }
    }

    pub fn status(&self) -> ClosingStatus {
        self.status
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    pub fn is_frozen(&self) -> bool {
        self.status.is_terminal()
    }

    /// Applies `trigger`, recording the transition. Illegal triggers leave the closing untouched.
    pub fn apply(&mut self, trigger: Trigger) -> Result<ClosingStatus> {
        let next = ClosingLifecycle::next_state(self.status, trigger)?;
        info!(
            closing = %self.id,
            from = %self.status,
            to = %next,
            %trigger,
            "closing transition"
        );
        self.history.push(TransitionRecord {
            from: self.status,
            to: next,
            trigger,
            at: Utc::now(),
        });
        self.status = next;
        Ok(next)
    }
}
