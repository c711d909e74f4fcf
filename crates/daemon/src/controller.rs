// crates/daemon/src/controller.rs
//! Caller-facing daemonization hooks and the handle on a live daemon.

use errors::{Error, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// Hooks driven by [`Daemonizer::daemonize`](crate::Daemonizer::daemonize).
///
/// `predaemonize` runs in the caller before any fork; a failure aborts
/// the whole attempt. `postdaemonize` runs in the caller once the daemon
/// has reported readiness and receives the populated handle.
/// `daemonized_child` runs inside the fully detached daemon and is its
/// main body; its return value becomes the daemon's exit code and an
/// error return is reported as exit code 1.
pub trait DaemonController {
    fn predaemonize(&mut self) -> Result<()> {
        Ok(())
    }

    fn postdaemonize(&mut self, _daemon: &mut DaemonHandle) -> Result<()> {
        Ok(())
    }

    fn daemonized_child(&mut self) -> Result<i32>;

    fn boxed_clone(&self) -> Box<dyn DaemonController>;
}

/// Handle on a running daemon.
///
/// Unlike a [`process::ProcessHandle`] there is no wait obligation: the
/// daemon is reparented to init, so the handle is only a PID carrier and
/// may be dropped at any time.
#[derive(Debug, Default)]
pub struct DaemonHandle {
    pid: Option<Pid>,
}

impl DaemonHandle {
    pub fn new() -> Self {
        DaemonHandle { pid: None }
    }

    pub fn valid(&self) -> bool {
        self.pid.is_some()
    }

    /// Pid of the daemon. Panics when the handle was never populated.
    pub fn pid(&self) -> Pid {
        match self.pid {
            Some(pid) => pid,
            None => panic!("queried an unpopulated daemon handle"),
        }
    }

    pub(crate) fn set_pid(&mut self, pid: Pid) {
        self.pid = Some(pid);
    }

    /// Send a signal to the daemon.
    pub fn kill(&self, signal: Signal) -> Result<()> {
        signal::kill(self.pid(), signal).map_err(|errno| Error::posix(errno as i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_handle_is_invalid() {
        assert!(!DaemonHandle::new().valid());
    }

    #[test]
    #[should_panic(expected = "unpopulated daemon handle")]
    fn pid_of_invalid_handle_panics() {
        let _ = DaemonHandle::new().pid();
    }

    #[test]
    fn populated_handle_exposes_the_pid() {
        let mut handle = DaemonHandle::new();
        handle.set_pid(Pid::from_raw(4242));
        assert!(handle.valid());
        assert_eq!(handle.pid().as_raw(), 4242);
    }
}
