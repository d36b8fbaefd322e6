mod aggregate;
mod conversation;
mod model;

pub use aggregate::{
    AggregatedView, GroupKey, GroupOrder, GroupSummary, IncidenceGroup, Priority, PriorityCounts,
    SummarySource, group_incidences, variation_pct,
};
pub use conversation::{AttachmentPolicy, ConversationState, ResolutionDraft, StatusMismatch};
pub use model::{Attachment, ComparisonKind, Incidence, Resolution, ResolutionKind, Role};
