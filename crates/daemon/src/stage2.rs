// crates/daemon/src/stage2.rs
//! Second fork stage: the intermediate child forks the daemon, waits for
//! its readiness token and escalates to killing it when the caller-side
//! protocol fails.

use std::cell::RefCell;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use errors::{Error, ProcessErrno, Result};
use process::exit_status::FAILURE;
use process::{ForkController, ProcessHandle, Signal, SyncChannel};
use tracing::{debug, warn};

use crate::resources::{PipeEnd, PipeId, Resources};

pub(crate) struct SecondStage {
    resources: Rc<RefCell<Resources>>,
    sync: Option<SyncChannel>,
    saved_sigchld: Option<libc::sigaction>,
}

impl SecondStage {
    pub(crate) fn new(resources: Rc<RefCell<Resources>>) -> Self {
        SecondStage {
            resources,
            sync: None,
            saved_sigchld: None,
        }
    }

    fn sync(&mut self) -> &mut SyncChannel {
        match self.sync.as_mut() {
            Some(sync) => sync,
            None => panic!("second stage used before its sync channel exists"),
        }
    }

    /// Block until the daemon reports readiness, watching for its death.
    ///
    /// The wait is interruptible: SIGCHLD breaks the read with `EINTR`,
    /// and the daemon's exit closes its end of the channel, which
    /// surfaces as end-of-file. Either way the daemon is polled; a
    /// collected exit means it died before becoming ready.
    fn wait_for_daemon_ready(&mut self, daemon: &mut ProcessHandle) -> Result<()> {
        loop {
            match self.sync().wait_for_child() {
                Ok(()) => return Ok(()),
                Err(err) if err.errno() == Some(libc::EINTR) || err.errno() == Some(0) => {
                    let status = daemon.join(true, false, false)?;
                    if status.valid() {
                        debug!("daemon died before reporting readiness");
                        return Err(Error::process(ProcessErrno::DaemonError));
                    }
                    thread::sleep(Duration::from_millis(10));
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn child_body(&mut self) -> Result<i32> {
        self.resources
            .borrow_mut()
            .close_pipe_end(PipeId::Child, PipeEnd::Write);
        let mut excluded = Vec::new();
        if let Some(fd) = self.sync().read_fd() {
            excluded.push(fd);
        }
        if let Some(fd) = self.sync().write_fd() {
            excluded.push(fd);
        }
        self.resources.borrow_mut().daemon_init(&excluded)?;
        let pid = process::current_pid();
        self.resources.borrow_mut().report_pid(PipeId::Daemon, pid)?;
        self.resources.borrow_mut().finalize();
        self.sync().unblock_parent()?;
        self.sync().finalize();
        self.resources.borrow_mut().controller().daemonized_child()
    }
}

impl ForkController for SecondStage {
    /// Runs in the intermediate child before the daemon fork.
    fn prefork(&mut self) -> Result<()> {
        {
            let mut resources = self.resources.borrow_mut();
            resources.close_pipe_end(PipeId::Child, PipeEnd::Read);
            resources.close_pipe_end(PipeId::Daemon, PipeEnd::Read);
        }
        self.sync = Some(SyncChannel::new()?);
        self.saved_sigchld = Some(install_sigchld_interrupt()?);
        Ok(())
    }

    /// Runs in the intermediate child after the daemon fork.
    fn postfork(&mut self, daemon: &mut ProcessHandle) -> Result<()> {
        self.resources
            .borrow_mut()
            .close_pipe_end(PipeId::Daemon, PipeEnd::Write);
        // Closing this side's token write end makes the daemon's death
        // observable as end-of-file instead of an indefinite block.
        self.sync().close_write_end();
        let outcome = self.wait_for_daemon_ready(daemon);
        if let Some(saved) = self.saved_sigchld.take() {
            restore_sigchld(&saved);
        }
        self.sync().finalize();
        match outcome {
            Ok(()) => {
                self.resources
                    .borrow_mut()
                    .close_pipe_end(PipeId::Child, PipeEnd::Write);
                Ok(())
            }
            Err(err) => {
                if daemon.is_attached() {
                    if let Err(abort_err) = abort_child(daemon) {
                        warn!(%abort_err, "failed to abort the unready daemon");
                    }
                    if daemon.is_attached() {
                        daemon.detach();
                    }
                }
                Err(err)
            }
        }
    }

    /// Runs in the daemon. Failures are flattened to an exit code after
    /// being reported through the daemon's result pipe.
    fn child(&mut self) -> i32 {
        match panic::catch_unwind(AssertUnwindSafe(|| self.child_body())) {
            Ok(Ok(code)) => code,
            Ok(Err(err)) => {
                let mut resources = self.resources.borrow_mut();
                resources.report_error(PipeId::Daemon, &err);
                resources.finalize();
                drop(resources);
                if let Some(sync) = self.sync.as_mut() {
                    sync.finalize();
                }
                FAILURE
            }
            Err(_) => {
                let mut resources = self.resources.borrow_mut();
                resources.report_unknown_error(PipeId::Daemon);
                resources.finalize();
                drop(resources);
                if let Some(sync) = self.sync.as_mut() {
                    sync.finalize();
                }
                FAILURE
            }
        }
    }

    fn boxed_clone(&self) -> Box<dyn ForkController> {
        Box::new(SecondStage::new(Rc::clone(&self.resources)))
    }
}

extern "C" fn sigchld_interrupt(_signal: libc::c_int) {}

/// Install a no-op SIGCHLD handler without `SA_RESTART`, so a child's
/// death interrupts blocking reads. Returns the previous disposition.
fn install_sigchld_interrupt() -> Result<libc::sigaction> {
    // SAFETY: the handler is async-signal-safe (it does nothing) and the
    // action struct is fully initialized before the call.
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = sigchld_interrupt as extern "C" fn(libc::c_int) as libc::sighandler_t;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = 0;
        let mut previous: libc::sigaction = mem::zeroed();
        if libc::sigaction(libc::SIGCHLD, &action, &mut previous) != 0 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            return Err(Error::posix(errno));
        }
        Ok(previous)
    }
}

fn restore_sigchld(saved: &libc::sigaction) {
    // SAFETY: restoring an action previously returned by sigaction.
    unsafe {
        libc::sigaction(libc::SIGCHLD, saved, ptr::null_mut());
    }
}

/// Escalating shutdown of a child that must not survive: SIGTERM with a
/// grace period, a second longer grace period, then SIGKILL with a
/// blocking collection.
pub(crate) fn abort_child(child: &mut ProcessHandle) -> Result<()> {
    warn!(pid = child.pid().as_raw(), "aborting child");
    child.kill(Signal::SIGTERM)?;
    thread::sleep(Duration::from_secs(1));
    if child.join(true, false, false)?.valid() {
        return Ok(());
    }
    thread::sleep(Duration::from_secs(5));
    if child.join(true, false, false)?.valid() {
        return Ok(());
    }
    child.kill(Signal::SIGKILL)?;
    child.join_blocking()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use process::Forker;
    use serial_test::serial;
    use std::time::Instant;

    /// Ignores SIGTERM and signals readiness before blocking forever.
    struct IgnoreTerm {
        ready: Rc<RefCell<SyncChannel>>,
    }

    impl ForkController for IgnoreTerm {
        fn child(&mut self) -> i32 {
            // SAFETY: plain disposition change in a freshly forked child.
            unsafe {
                libc::signal(libc::SIGTERM, libc::SIG_IGN);
            }
            if self.ready.borrow_mut().unblock_parent().is_err() {
                return FAILURE;
            }
            loop {
                thread::sleep(Duration::from_secs(60));
            }
        }

        fn boxed_clone(&self) -> Box<dyn ForkController> {
            Box::new(IgnoreTerm {
                ready: Rc::clone(&self.ready),
            })
        }
    }

    #[derive(Clone)]
    struct Sleeper;

    impl ForkController for Sleeper {
        fn child(&mut self) -> i32 {
            loop {
                thread::sleep(Duration::from_secs(60));
            }
        }

        fn boxed_clone(&self) -> Box<dyn ForkController> {
            Box::new(self.clone())
        }
    }

    #[test]
    #[serial]
    fn abort_terminates_a_cooperative_child_quickly() {
        let mut handle = Forker::new(&Sleeper).spawn().unwrap();
        let started = Instant::now();
        abort_child(&mut handle).unwrap();
        assert!(!handle.is_attached());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn abort_escalates_to_sigkill_for_a_stubborn_child() {
        let ready = Rc::new(RefCell::new(SyncChannel::new().unwrap()));
        let mut handle = Forker::new(&IgnoreTerm {
            ready: Rc::clone(&ready),
        })
        .spawn()
        .unwrap();
        ready.borrow_mut().wait_for_child().unwrap();
        let started = Instant::now();
        abort_child(&mut handle).unwrap();
        assert!(!handle.is_attached());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(6));
        assert!(elapsed < Duration::from_secs(30));
    }
}
