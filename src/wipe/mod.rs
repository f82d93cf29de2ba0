//! Destructive flows: volume erase, secure partition wipe, A/B wipe packages.

pub mod ab;
pub mod erase;
pub mod secure;
