// crates/daemon/src/daemonizer.rs
//! Caller-side entry point of the double fork.

use std::cell::RefCell;
use std::rc::Rc;

use errors::Result;
use process::Forker;
use tracing::debug;

use crate::config::DaemonConfig;
use crate::controller::{DaemonController, DaemonHandle};
use crate::resources::Resources;
use crate::stage1::FirstStage;

/// Drives a [`DaemonController`] through the double fork.
///
/// The caller forks an intermediate child, which creates a new session
/// and forks the daemon; the intermediate child exits once the daemon
/// has reported readiness, leaving the daemon owned by init. Failures
/// anywhere along the way travel back to the caller as structured
/// errors.
pub struct Daemonizer {
    resources: Rc<RefCell<Resources>>,
}

impl Daemonizer {
    pub fn new(controller: &dyn DaemonController, config: DaemonConfig) -> Self {
        Daemonizer {
            resources: Rc::new(RefCell::new(Resources::new(controller, config))),
        }
    }

    /// Daemonize, populating `handle` with the daemon's PID on success.
    /// The caller's copies of the result pipes are released on every
    /// path.
    pub fn daemonize(&mut self, handle: &mut DaemonHandle) -> Result<()> {
        let outcome = self.run(handle);
        self.resources.borrow_mut().finalize();
        outcome
    }

    fn run(&mut self, handle: &mut DaemonHandle) -> Result<()> {
        self.resources.borrow_mut().controller().predaemonize()?;
        self.resources.borrow_mut().parent_side_init()?;
        debug!("starting the double fork");
        let intermediate = Forker::new(&FirstStage::new(Rc::clone(&self.resources))).spawn()?;
        // The first stage reaps the intermediate child in its postfork
        // hook, so the handle comes back detached.
        debug_assert!(!intermediate.is_attached());
        drop(intermediate);
        let pid = match self.resources.borrow().daemon_pid() {
            Some(pid) => pid,
            None => panic!("double fork succeeded without a daemon PID"),
        };
        handle.set_pid(pid);
        debug!(daemon = pid.as_raw(), "daemon is ready");
        self.resources.borrow_mut().controller().postdaemonize(handle)
    }
}

/// Daemonize `controller` with `config` and return the handle on the
/// ready daemon. This call returns only in the original process; the
/// daemon lives on inside [`DaemonController::daemonized_child`].
pub fn daemonize(
    controller: &dyn DaemonController,
    config: DaemonConfig,
) -> Result<DaemonHandle> {
    let mut handle = DaemonHandle::new();
    Daemonizer::new(controller, config).daemonize(&mut handle)?;
    Ok(handle)
}
