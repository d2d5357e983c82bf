//! Child process handling.
//!
//! - `launcher` - command line construction and spawning
//! - `readiness` - scanning stdout for the readiness line
//! - `output` - background threads that watch and drain the child's pipes

mod launcher;
mod output;
mod readiness;

pub use launcher::{launch_args, LaunchSpec};
pub use output::{recv_outcome, OutputForwarder};
pub use readiness::{ReadinessDetector, ReadyOutcome};
