//! Interactive surface: device capability, screen, menus, and prompts.

pub mod device;
pub mod dispatcher;
pub mod menu;
pub mod prompts;
pub mod screen;
