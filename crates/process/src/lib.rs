// crates/process/src/lib.rs
//! POSIX process lifecycle primitives: fork orchestration with pluggable
//! controllers, wait-status decoding, and a pipe-based parent/child
//! rendezvous.

pub mod exit_status;
pub mod forker;
pub mod handle;
pub mod sync;

pub use exit_status::ExitStatus;
pub use forker::{ForkController, Forker};
pub use handle::ProcessHandle;
pub use sync::SyncChannel;

pub use nix::sys::signal::Signal;
pub use nix::unistd::Pid;

/// Process id of the calling process.
pub fn current_pid() -> Pid {
    nix::unistd::getpid()
}

/// Process id of the caller's parent.
pub fn parent_pid() -> Pid {
    nix::unistd::getppid()
}
