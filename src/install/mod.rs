//! Package installation: preconditions, the external installer, outcomes.

pub mod battery;
pub mod external;
pub mod failure;
pub mod orchestrator;
pub mod outcome;
