pub mod error;
pub mod forward;
pub mod orchestrator;

pub use error::RelayError;
pub use orchestrator::{RelayOrchestrator, RelayOutcome};
