//! Session orchestration: context, arguments, retries, interactive flows,
//! the runner, and finalization.

pub mod args;
pub mod context;
pub mod finalizer;
pub mod interactive;
pub mod retry;
pub mod runner;
pub mod terminal;
pub mod testbed;
