//! Session logging: timestamped text log, JSONL events, rotation and persistence.

pub mod copy;
pub mod jsonl;
pub mod rotate;
pub mod session;
