// crates/daemon/src/stage1.rs
//! First fork stage: the caller forks the intermediate child and collects
//! the overall outcome through the result pipes.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use errors::{Category, Error, ProcessErrno, Result};
use process::exit_status::{FAILURE, SUCCESS};
use process::{ForkController, Forker, ProcessHandle};
use tracing::debug;

use crate::resources::{PipeEnd, PipeId, Resources};
use crate::stage2::SecondStage;

pub(crate) struct FirstStage {
    resources: Rc<RefCell<Resources>>,
}

impl FirstStage {
    pub(crate) fn new(resources: Rc<RefCell<Resources>>) -> Self {
        FirstStage { resources }
    }

    /// Rebuild the failure the forked processes reported. The
    /// intermediate child's record leads; when it says the daemon failed,
    /// the daemon's own record becomes the cause.
    fn collect_failure(&mut self) -> Error {
        let mut resources = self.resources.borrow_mut();
        let child_err = match resources.retrieve_error(PipeId::Child) {
            Ok(err) => err,
            // Died without reporting, most likely killed by a signal.
            Err(_) => return Error::process(ProcessErrno::DaemonError),
        };
        if child_err.category() == Category::Process
            && child_err.code() == ProcessErrno::DaemonError as u32
        {
            if let Ok(daemon_err) = resources.retrieve_error(PipeId::Daemon) {
                return child_err.with_cause(daemon_err);
            }
        }
        child_err
    }

    fn child_body(&mut self) -> Result<i32> {
        self.resources.borrow_mut().intermediate_child_init()?;
        let mut daemon = Forker::new(&SecondStage::new(Rc::clone(&self.resources))).spawn()?;
        self.resources.borrow_mut().finalize();
        // The daemon is reparented to init; nobody waits on it here.
        daemon.detach();
        Ok(SUCCESS)
    }
}

impl ForkController for FirstStage {
    /// Runs in the caller: both result pipes must exist before any fork.
    fn prefork(&mut self) -> Result<()> {
        let mut resources = self.resources.borrow_mut();
        resources.create_pipe(PipeId::Child)?;
        resources.create_pipe(PipeId::Daemon)?;
        Ok(())
    }

    /// Runs in the caller: reap the intermediate child and read either
    /// the daemon's PID or the reported failure.
    fn postfork(&mut self, intermediate: &mut ProcessHandle) -> Result<()> {
        {
            let mut resources = self.resources.borrow_mut();
            resources.close_pipe_end(PipeId::Child, PipeEnd::Write);
            resources.close_pipe_end(PipeId::Daemon, PipeEnd::Write);
        }
        let status = intermediate.join_blocking()?;
        if !status.exited() || status.code() != SUCCESS {
            debug!("intermediate child failed");
            return Err(self.collect_failure());
        }
        self.resources.borrow_mut().retrieve_pid(PipeId::Daemon)?;
        Ok(())
    }

    /// Runs in the intermediate child.
    fn child(&mut self) -> i32 {
        match panic::catch_unwind(AssertUnwindSafe(|| self.child_body())) {
            Ok(Ok(code)) => code,
            Ok(Err(err)) => {
                let mut resources = self.resources.borrow_mut();
                resources.report_error(PipeId::Child, &err);
                resources.finalize();
                FAILURE
            }
            Err(_) => {
                let mut resources = self.resources.borrow_mut();
                resources.report_unknown_error(PipeId::Child);
                resources.finalize();
                FAILURE
            }
        }
    }

    fn boxed_clone(&self) -> Box<dyn ForkController> {
        Box::new(FirstStage::new(Rc::clone(&self.resources)))
    }
}
