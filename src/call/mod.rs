//! Call data model (§3) and the process-wide active-call registry (§4.7/C7).

pub mod model;
pub mod registry;

pub use model::{Call, CallMode, CustomParams, Speaker, TranscriptEntry, TurnId};
pub use registry::{CallHandle, CallRegistry, CallSummary, TakeoverError};
