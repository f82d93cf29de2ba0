//! Cross-reboot command persistence: control block, command queue, resolution.

pub mod command_queue;
pub mod control_block;
pub mod resolver;
