//! openmux engine crate.
//!
//! This library provides the data-plane core of the multiplexer:
//! - PTY hosting and the emulator worker pool (survives per-pane churn)
//! - VT emulation with dirty-row deltas and tiered scrollback
//! - Master-stack workspace layouts and persisted, switchable sessions
//! - The aggregate cross-session PTY index with git metadata

pub mod aggregate;
pub mod bus;
pub mod config;
pub mod error;
pub mod git;
pub mod input;
pub mod layout;
pub mod pool;
pub mod pty;
pub mod scrollback;
pub mod session;
pub mod term;

pub use config::Config;
pub use error::{Error, Result};
