// src/lib.rs
//! POSIX process lifecycle control and double-fork daemonization.
//!
//! The facade re-exports the member crates: [`error`] for structured,
//! fork-crossing errors, [`proc`] for fork orchestration and wait-status
//! handling, and [`daemon`] for the double-fork daemonizer itself.

pub mod error {
    pub use ::errors::*;
}

pub mod proc {
    pub use ::process::*;
}

pub mod daemon {
    pub use ::daemon::*;
}

pub use ::daemon::{DaemonConfig, DaemonController, DaemonHandle, Daemonizer, daemonize};
pub use ::errors::{Error, Result};
pub use ::process::{ExitStatus, ForkController, Forker, Pid, ProcessHandle, Signal, SyncChannel};
