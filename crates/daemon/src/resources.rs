// crates/daemon/src/resources.rs
//! State shared by the daemonization stages.
//!
//! Holds the caller's controller and configuration, the two result pipes
//! the forked processes report through, the signal dispositions captured
//! in the caller, and the descriptor limit used when the daemon sweeps
//! its inherited descriptors.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::mem;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::ptr;

use errors::{Error, ProcessErrno, Result};
use nix::sys::resource::{self, Resource};
use nix::sys::stat::Mode;
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::config::DaemonConfig;
use crate::controller::DaemonController;
use crate::wire;

/// Highest signal number the disposition snapshot covers.
const SIGNAL_MAX: libc::c_int = 64;

/// Descriptor sweep bound used when the hard limit is unlimited.
const FALLBACK_NOFILE: u64 = 1024;

/// The two result pipes, named after the process that writes to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipeId {
    /// Written by the intermediate child, read by the caller.
    Child = 0,
    /// Written by the daemon, read first by the intermediate child's
    /// sibling logic and finally by the caller.
    Daemon = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipeEnd {
    Read,
    Write,
}

#[derive(Debug, Default)]
struct RcPipe {
    reader: Option<File>,
    writer: Option<File>,
}

struct SavedDisposition {
    signal: libc::c_int,
    action: libc::sigaction,
}

pub(crate) struct Resources {
    controller: Box<dyn DaemonController>,
    config: DaemonConfig,
    pipes: [RcPipe; 2],
    saved_signals: Vec<SavedDisposition>,
    nofile_limit: u64,
    daemon_pid: Option<Pid>,
}

impl Resources {
    pub(crate) fn new(controller: &dyn DaemonController, config: DaemonConfig) -> Self {
        Resources {
            controller: controller.boxed_clone(),
            config,
            pipes: [RcPipe::default(), RcPipe::default()],
            saved_signals: Vec::new(),
            nofile_limit: FALLBACK_NOFILE,
            daemon_pid: None,
        }
    }

    pub(crate) fn controller(&mut self) -> &mut dyn DaemonController {
        self.controller.as_mut()
    }

    pub(crate) fn daemon_pid(&self) -> Option<Pid> {
        self.daemon_pid
    }

    /// Runs in the caller before the first fork: ignore every catchable
    /// signal for the duration of the double fork, saving the previous
    /// dispositions for [`finalize`](Self::finalize) and for the daemon,
    /// and size the descriptor sweep from the hard NOFILE limit.
    /// SIGCHLD goes to its default disposition instead of being ignored,
    /// which would change the wait semantics the stages rely on.
    pub(crate) fn parent_side_init(&mut self) -> Result<()> {
        self.saved_signals.clear();
        for signal in 1..=SIGNAL_MAX {
            if signal == libc::SIGKILL || signal == libc::SIGSTOP {
                continue;
            }
            // SAFETY: SIG_IGN and SIG_DFL are valid dispositions for
            // every catchable signal; failures for numbers the platform
            // rejects are tolerated and such signals simply stay put.
            let mut action: libc::sigaction = unsafe { mem::zeroed() };
            action.sa_sigaction = if signal == libc::SIGCHLD {
                libc::SIG_DFL
            } else {
                libc::SIG_IGN
            };
            unsafe {
                libc::sigemptyset(&mut action.sa_mask);
            }
            let mut previous: libc::sigaction = unsafe { mem::zeroed() };
            let rc = unsafe { libc::sigaction(signal, &action, &mut previous) };
            if rc == 0 {
                self.saved_signals.push(SavedDisposition {
                    signal,
                    action: previous,
                });
            }
        }
        let (_, hard) = resource::getrlimit(Resource::RLIMIT_NOFILE)
            .map_err(|errno| Error::posix(errno as i32))?;
        self.nofile_limit = if hard == libc::RLIM_INFINITY {
            FALLBACK_NOFILE
        } else {
            hard
        };
        debug!(
            signals = self.saved_signals.len(),
            nofile = self.nofile_limit,
            "captured caller state"
        );
        Ok(())
    }

    /// Runs in the intermediate child: detach from the caller's session.
    pub(crate) fn intermediate_child_init(&mut self) -> Result<()> {
        nix::unistd::setsid().map_err(|errno| Error::posix(errno as i32))?;
        Ok(())
    }

    /// Runs in the grandchild: apply every configured daemon property.
    /// `excluded_fds` stay open through the descriptor sweep.
    pub(crate) fn daemon_init(&mut self, excluded_fds: &[RawFd]) -> Result<()> {
        nix::sys::stat::umask(Mode::empty());
        if let Some(dir) = self.config.working_dir.clone() {
            nix::unistd::chdir(&dir).map_err(|errno| Error::posix(errno as i32))?;
        }
        self.close_open_descriptors(excluded_fds);
        self.redirect_standard_streams()?;
        if let Some(path) = self.config.pid_file.clone() {
            self.write_pid_file(&path)?;
        }
        if self.config.reset_signals {
            self.reset_signal_dispositions();
        } else {
            self.restore_signal_dispositions();
        }
        // The daemon's dispositions are now final; finalize must not
        // restore the caller's on top of them.
        self.saved_signals.clear();
        Ok(())
    }

    /// Close every inherited descriptor above the standard streams,
    /// keeping the result pipes and the explicitly excluded descriptors.
    fn close_open_descriptors(&self, excluded_fds: &[RawFd]) {
        let mut keep: Vec<RawFd> = excluded_fds.to_vec();
        for pipe in &self.pipes {
            if let Some(reader) = &pipe.reader {
                keep.push(reader.as_raw_fd());
            }
            if let Some(writer) = &pipe.writer {
                keep.push(writer.as_raw_fd());
            }
        }
        let sweep_end = self.nofile_limit.min(RawFd::MAX as u64) as RawFd;
        for fd in 3..sweep_end {
            if keep.contains(&fd) {
                continue;
            }
            // SAFETY: closing descriptors this process owns; EBADF for
            // never-opened slots is the expected common case.
            unsafe {
                libc::close(fd);
            }
        }
    }

    /// Point the standard streams at their configured targets. Each
    /// distinct target path is opened once and shared across streams.
    fn redirect_standard_streams(&self) -> Result<()> {
        let targets = [
            (libc::STDIN_FILENO, self.config.stdin.as_deref()),
            (libc::STDOUT_FILENO, self.config.stdout.as_deref()),
            (libc::STDERR_FILENO, self.config.stderr.as_deref()),
        ];
        let mut opened: HashMap<&Path, File> = HashMap::new();
        for (stream_fd, target) in targets {
            let Some(path) = target else { continue };
            if !opened.contains_key(path) {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(path)
                    .map_err(|err| Error::posix(err.raw_os_error().unwrap_or(0)))?;
                opened.insert(path, file);
            }
            let target_fd = opened[path].as_raw_fd();
            // SAFETY: both descriptors are valid; dup2 replaces the
            // standard stream atomically.
            let rc = unsafe { libc::dup2(target_fd, stream_fd) };
            if rc < 0 {
                let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
                return Err(Error::posix(errno));
            }
        }
        Ok(())
    }

    /// Create, lock, truncate and fill the PID file. The descriptor is
    /// deliberately leaked so the kernel holds the lock for the daemon's
    /// whole lifetime.
    fn write_pid_file(&self, path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(self.config.pid_file_mode)
            .open(path)
            .map_err(|err| Error::posix(err.raw_os_error().unwrap_or(0)))?;
        // SAFETY: flock describes a whole-file write lock on a
        // descriptor this process owns.
        let mut lock: libc::flock = unsafe { mem::zeroed() };
        lock.l_type = libc::F_WRLCK as libc::c_short;
        lock.l_whence = libc::SEEK_SET as libc::c_short;
        let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETLK, &lock) };
        if rc < 0 {
            return Err(Error::process(ProcessErrno::PidfileLocked));
        }
        file.set_len(0)
            .map_err(|err| Error::posix(err.raw_os_error().unwrap_or(0)))?;
        writeln!(file, "{}", process::current_pid().as_raw())
            .map_err(|err| Error::posix(err.raw_os_error().unwrap_or(0)))?;
        file.flush()
            .map_err(|err| Error::posix(err.raw_os_error().unwrap_or(0)))?;
        mem::forget(file);
        Ok(())
    }

    /// Reset every snapshotted signal to its default disposition.
    fn reset_signal_dispositions(&self) {
        // SAFETY: SIG_DFL with an empty mask is valid for every signal
        // in the snapshot; failures are tolerated like in the snapshot.
        let mut action: libc::sigaction = unsafe { mem::zeroed() };
        action.sa_sigaction = libc::SIG_DFL;
        unsafe {
            libc::sigemptyset(&mut action.sa_mask);
        }
        for saved in &self.saved_signals {
            unsafe {
                libc::sigaction(saved.signal, &action, ptr::null_mut());
            }
        }
    }

    /// Put back the dispositions captured in the caller, dropping
    /// whatever the daemonization window installed over them.
    fn restore_signal_dispositions(&self) {
        for saved in &self.saved_signals {
            // SAFETY: restoring an action previously obtained from
            // sigaction for the same signal.
            unsafe {
                libc::sigaction(saved.signal, &saved.action, ptr::null_mut());
            }
        }
    }

    pub(crate) fn create_pipe(&mut self, id: PipeId) -> Result<()> {
        let pipe = &mut self.pipes[id as usize];
        assert!(
            pipe.reader.is_none() && pipe.writer.is_none(),
            "result pipe created twice"
        );
        let (read_end, write_end) =
            nix::unistd::pipe().map_err(|errno| Error::posix(errno as i32))?;
        pipe.reader = Some(File::from(read_end));
        pipe.writer = Some(File::from(write_end));
        Ok(())
    }

    pub(crate) fn close_pipe_end(&mut self, id: PipeId, end: PipeEnd) {
        let pipe = &mut self.pipes[id as usize];
        match end {
            PipeEnd::Read => pipe.reader = None,
            PipeEnd::Write => pipe.writer = None,
        }
    }

    pub(crate) fn report_pid(&mut self, id: PipeId, pid: Pid) -> Result<()> {
        let writer = match self.pipes[id as usize].writer.as_mut() {
            Some(writer) => writer,
            None => panic!("reported through a result pipe without a write end"),
        };
        wire::write_pid(writer, pid.as_raw())
    }

    /// Read a PID record; the daemon pipe's record also becomes the
    /// remembered daemon PID.
    pub(crate) fn retrieve_pid(&mut self, id: PipeId) -> Result<Pid> {
        let reader = match self.pipes[id as usize].reader.as_mut() {
            Some(reader) => reader,
            None => panic!("retrieved from a result pipe without a read end"),
        };
        let pid = Pid::from_raw(wire::read_pid(reader)?);
        if id == PipeId::Daemon {
            self.daemon_pid = Some(pid);
        }
        Ok(pid)
    }

    /// Best-effort error report. A missing or broken write end is logged
    /// and swallowed so reporting never turns into a second failure.
    pub(crate) fn report_error(&mut self, id: PipeId, error: &Error) {
        match self.pipes[id as usize].writer.as_mut() {
            Some(writer) => {
                if let Err(report_err) = wire::write_error(writer, error) {
                    warn!(%report_err, "failed to report an error through the result pipe");
                }
            }
            None => warn!(%error, "no result pipe to report an error through"),
        }
    }

    /// Report a placeholder for a failure that produced no [`Error`],
    /// typically a caught panic.
    pub(crate) fn report_unknown_error(&mut self, id: PipeId) {
        let error = Error::from_parts(
            errors::Kind::Runtime,
            errors::Category::Unknown,
            errors::UNKNOWN_CODE,
            None,
            String::new(),
            0,
            0,
            0,
        );
        self.report_error(id, &error);
    }

    pub(crate) fn retrieve_error(&mut self, id: PipeId) -> Result<Error> {
        let reader = match self.pipes[id as usize].reader.as_mut() {
            Some(reader) => reader,
            None => panic!("retrieved from a result pipe without a read end"),
        };
        wire::read_error(reader)
    }

    /// Close both result pipes and put the caller's signal dispositions
    /// back. Safe to call repeatedly and from every process that
    /// inherited the resources.
    pub(crate) fn finalize(&mut self) {
        for pipe in &mut self.pipes {
            pipe.reader = None;
            pipe.writer = None;
        }
        self.restore_signal_dispositions();
        self.saved_signals.clear();
    }
}

impl Drop for Resources {
    fn drop(&mut self) {
        self.finalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct NullCtl;

    impl DaemonController for NullCtl {
        fn daemonized_child(&mut self) -> Result<i32> {
            Ok(0)
        }

        fn boxed_clone(&self) -> Box<dyn DaemonController> {
            Box::new(self.clone())
        }
    }

    fn resources() -> Resources {
        Resources::new(&NullCtl, DaemonConfig::default())
    }

    #[test]
    fn pid_record_round_trips_through_a_pipe() {
        let mut res = resources();
        res.create_pipe(PipeId::Daemon).unwrap();
        res.report_pid(PipeId::Daemon, Pid::from_raw(777)).unwrap();
        let pid = res.retrieve_pid(PipeId::Daemon).unwrap();
        assert_eq!(pid.as_raw(), 777);
        assert_eq!(res.daemon_pid(), Some(pid));
    }

    #[test]
    fn error_report_round_trips_through_a_pipe() {
        let mut res = resources();
        res.create_pipe(PipeId::Child).unwrap();
        let original = Error::posix(13);
        res.report_error(PipeId::Child, &original);
        let rebuilt = res.retrieve_error(PipeId::Child).unwrap();
        assert_eq!(rebuilt.code(), ProcessErrno::PosixSystem as u32);
        assert_eq!(rebuilt.errno(), Some(13));
        assert_eq!(rebuilt.file(), "");
        assert_eq!(rebuilt.line(), original.line());
    }

    #[test]
    fn reporting_without_a_pipe_is_swallowed() {
        let mut res = resources();
        res.report_error(PipeId::Child, &Error::posix(1));
        res.report_unknown_error(PipeId::Daemon);
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut res = resources();
        res.create_pipe(PipeId::Child).unwrap();
        res.create_pipe(PipeId::Daemon).unwrap();
        res.finalize();
        res.finalize();
    }

    #[test]
    #[serial_test::serial]
    fn parent_side_init_saves_dispositions_and_finalize_restores() {
        let mut res = resources();
        res.parent_side_init().unwrap();
        assert!(!res.saved_signals.is_empty());
        assert!(res.nofile_limit > 0);
        assert!(res.saved_signals.iter().all(|s| s.signal != libc::SIGKILL));
        res.finalize();
        assert!(res.saved_signals.is_empty());
    }
}
