#![deny(unsafe_code)]

//! Recovery control plane: the maintenance mode a device boots into to
//! install updates, wipe volumes, and hand control back to the bootloader.
//!
//! One session resolves its command (invocation, then the bootloader control
//! block, then the on-disk command queue), carries out at most one operation,
//! optionally drops into a menu, finalizes, and asks init for a power action.
//! Commands are persisted before anything destructive runs, so a power loss
//! at any point resumes the same work on the next boot.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use recovery_control::prelude::*;
//! ```
//!
//! Every external collaborator sits behind a trait. [`session::testbed`]
//! wires a whole session to directory-backed and in-memory doubles:
//!
//! ```rust,no_run
//! use recovery_control::session::runner::SessionRunner;
//! use recovery_control::session::testbed::Testbed;
//!
//! let tb = Testbed::at(std::path::Path::new("/tmp/rcv")).unwrap();
//! let mut ctx = tb.context();
//! let end = SessionRunner::new(&mut ctx).run(&["recovery".into(), "--wipe_cache".into()]);
//! println!("{end:?}");
//! ```

pub mod prelude;

pub mod bootloader;
pub mod core;
pub mod install;
pub mod logger;
pub mod platform;
pub mod session;
pub mod ui;
pub mod wipe;
