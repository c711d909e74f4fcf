// crates/process/src/forker.rs
//! Fork orchestration around a pluggable controller.

use std::panic::{self, AssertUnwindSafe};
use std::process;

use errors::Result;
use tracing::debug;

use crate::exit_status::FAILURE;
use crate::handle::ProcessHandle;

/// Hooks driven by [`Forker::spawn`] around a single fork.
///
/// `prefork` runs in the parent before the fork; a failure there aborts
/// the spawn. `postfork` runs in the parent after a successful fork and
/// receives the attached handle on the child. `child` runs inside the
/// child and its return value becomes the child's exit code; the child
/// never returns from `spawn`.
pub trait ForkController {
    fn prefork(&mut self) -> Result<()> {
        Ok(())
    }

    fn postfork(&mut self, _child: &mut ProcessHandle) -> Result<()> {
        Ok(())
    }

    fn child(&mut self) -> i32;

    fn boxed_clone(&self) -> Box<dyn ForkController>;
}

/// Runs a [`ForkController`] through one fork.
pub struct Forker {
    controller: Box<dyn ForkController>,
}

impl Forker {
    pub fn new(controller: &dyn ForkController) -> Self {
        Forker {
            controller: controller.boxed_clone(),
        }
    }

    /// Fork once. In the parent, returns the handle on the child after the
    /// controller's `postfork` hook has run. In the child, runs the
    /// controller's `child` hook and exits the process with its return
    /// value; a panic in the hook exits with [`FAILURE`].
    pub fn spawn(&mut self) -> Result<ProcessHandle> {
        self.controller.prefork()?;
        // SAFETY: single-threaded fork discipline; the child only runs
        // controller code and then exits without returning.
        let pid = unsafe { libc::fork() };
        if pid < 0 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            return Err(errors::Error::posix(errno));
        }
        if pid == 0 {
            let code = panic::catch_unwind(AssertUnwindSafe(|| self.controller.child()))
                .unwrap_or(FAILURE);
            process::exit(code);
        }
        debug!(child = pid, "forked");
        let mut handle = ProcessHandle::attached(nix::unistd::Pid::from_raw(pid));
        self.controller.postfork(&mut handle)?;
        Ok(handle)
    }
}
