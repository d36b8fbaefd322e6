//! Request and response bodies of the closing backend.

use serde::{Deserialize, Serialize};

use crate::incidence::Resolution;
use crate::jobs::JobKind;

/// Backend answer to any resolution-producing call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionAck {
    pub resolution: Resolution,
    /// Conversation status after the append, when the backend reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    pub kind: JobKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub task_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incidence::{ResolutionKind, Role};

    #[test]
    fn submit_request_omits_missing_subject() {
        let req = SubmitJobRequest {
            kind: JobKind::GenerateIncidences,
            subject: None,
        };
        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            r#"{"kind":"generate_incidences"}"#
        );
    }

    #[test]
    fn ack_without_status() {
        let ack: ResolutionAck = serde_json::from_str(
            r#"{"resolution":{"id":"r-9","kind":"query","author":"supervisor",
                "comment":"which employees?","created_at":"2026-10-01T09:00:00Z"}}"#,
        )
        .unwrap();
        assert_eq!(ack.resolution.kind, ResolutionKind::Query);
        assert_eq!(ack.resolution.author, Role::Supervisor);
        assert!(ack.status.is_none());
    }
}
