mod poller;
mod types;

pub use poller::{JobPoller, PollHandle};
pub use types::{
    JobHandle, JobKind, JobOutcome, JobState, JobStatusReport, OperationKey, PollConfig, PollState,
};
