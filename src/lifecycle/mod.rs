mod closing;
mod gate;
mod status;

pub use closing::{Closing, TransitionRecord};
pub use gate::{IncidenceTally, ItemStatus, SectionGate, SectionId, SectionStates, items_complete};
pub use status::{ClosingLifecycle, ClosingStatus, Trigger, TriggerOrigin};
