//! Client-side core of a monthly payroll closing: the closing lifecycle,
//! section gating, the analyst/supervisor incidence conversation, incidence
//! grouping and polling of long-running backend jobs.

pub mod api;
pub mod config;
pub mod demo;
pub mod error;
pub mod incidence;
pub mod jobs;
pub mod lifecycle;
pub mod workflow;

pub use error::{CloseError, Result};
pub use workflow::{ClosingWorkflow, JobEvent};
