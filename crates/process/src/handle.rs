// crates/process/src/handle.rs
//! Owning handle on a forked child process.

use errors::{Error, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::warn;

use crate::exit_status::ExitStatus;

/// Handle on a child process obtained from a fork.
///
/// An attached handle owns the obligation to collect the child's exit
/// status. The handle detaches once a wait observes termination, or
/// explicitly via [`detach`](Self::detach); dropping a still-attached
/// handle leaks a zombie and trips a debug assertion.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<Pid>,
}

impl ProcessHandle {
    pub(crate) fn attached(pid: Pid) -> Self {
        ProcessHandle { pid: Some(pid) }
    }

    /// Handle attached to nothing.
    pub fn unattached() -> Self {
        ProcessHandle { pid: None }
    }

    pub fn is_attached(&self) -> bool {
        self.pid.is_some()
    }

    /// Pid of the attached child. Panics when unattached.
    pub fn pid(&self) -> Pid {
        self.expect_attached()
    }

    /// Give up the wait obligation without collecting the child.
    pub fn detach(&mut self) {
        self.pid = None;
    }

    fn expect_attached(&self) -> Pid {
        match self.pid {
            Some(pid) => pid,
            None => panic!("operation requires an attached process handle"),
        }
    }

    /// Wait on the attached child.
    ///
    /// With `nonblocking` set, an invalid status is returned when the child
    /// has not changed state yet. `report_stopped` and `report_continued`
    /// additionally surface stop and continuation events. The handle
    /// detaches when the collected status describes a termination.
    pub fn join(
        &mut self,
        nonblocking: bool,
        report_stopped: bool,
        report_continued: bool,
    ) -> Result<ExitStatus> {
        let pid = self.expect_attached();
        let mut options = 0;
        if nonblocking {
            options |= libc::WNOHANG;
        }
        if report_stopped {
            options |= libc::WUNTRACED;
        }
        if report_continued {
            options |= libc::WCONTINUED;
        }
        let mut raw: libc::c_int = 0;
        // SAFETY: waitpid writes the status word through a valid pointer.
        let rc = unsafe { libc::waitpid(pid.as_raw(), &mut raw, options) };
        if rc == 0 && nonblocking {
            return Ok(ExitStatus::invalid());
        }
        if rc != pid.as_raw() {
            return Err(Error::posix(std::io::Error::last_os_error().raw_os_error().unwrap_or(0)));
        }
        let status = ExitStatus::from_raw(raw);
        if status.terminated() {
            self.pid = None;
        }
        Ok(status)
    }

    /// Block until the attached child terminates.
    pub fn join_blocking(&mut self) -> Result<ExitStatus> {
        self.join(false, false, false)
    }

    /// Send a signal to the attached child.
    pub fn kill(&self, signal: Signal) -> Result<()> {
        let pid = self.expect_attached();
        signal::kill(pid, signal).map_err(|errno| Error::posix(errno as i32))
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.is_attached() {
            warn!(pid = self.pid.map(Pid::as_raw), "dropping an attached process handle");
            debug_assert!(!self.is_attached(), "process handle dropped while attached");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unattached_handle_reports_unattached() {
        let handle = ProcessHandle::unattached();
        assert!(!handle.is_attached());
    }

    #[test]
    #[should_panic(expected = "attached process handle")]
    fn pid_of_unattached_handle_panics() {
        let _ = ProcessHandle::unattached().pid();
    }

    #[test]
    fn detach_clears_attachment() {
        let mut handle = ProcessHandle::attached(Pid::from_raw(12345));
        assert!(handle.is_attached());
        assert_eq!(handle.pid().as_raw(), 12345);
        handle.detach();
        assert!(!handle.is_attached());
    }
}
