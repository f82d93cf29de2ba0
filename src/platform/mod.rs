//! Platform abstraction: volumes, properties and block-device primitives.

pub mod block;
pub mod pal;
