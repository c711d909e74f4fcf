// crates/daemon/src/lib.rs
//! Double-fork daemonization.
//!
//! A [`DaemonController`] supplies the daemon's body plus optional hooks
//! on the caller side; a [`DaemonConfig`] describes the daemon's
//! environment. [`daemonize`] forks twice, detaches the grandchild into
//! its own session, applies the configuration and blocks the caller
//! until the daemon reports readiness, returning a [`DaemonHandle`]
//! carrying its PID. Errors raised anywhere, including inside the
//! daemon before readiness, are serialized back to the caller with
//! their cause chain intact.

mod config;
mod controller;
mod daemonizer;
mod resources;
mod stage1;
mod stage2;
mod wire;

pub use config::DaemonConfig;
pub use controller::{DaemonController, DaemonHandle};
pub use daemonizer::{Daemonizer, daemonize};
