// crates/daemon/tests/daemonize.rs

use std::fs;
use std::thread;
use std::time::Duration;

use daemon::{DaemonConfig, DaemonController, DaemonHandle, daemonize};
use errors::{Category, Error, ProcessErrno, Result};
use process::Signal;
use serial_test::serial;

#[derive(Clone)]
struct ExitImmediately;

impl DaemonController for ExitImmediately {
    fn daemonized_child(&mut self) -> Result<i32> {
        Ok(0)
    }

    fn boxed_clone(&self) -> Box<dyn DaemonController> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
struct LingerFor(u64);

impl DaemonController for LingerFor {
    fn daemonized_child(&mut self) -> Result<i32> {
        thread::sleep(Duration::from_secs(self.0));
        Ok(0)
    }

    fn boxed_clone(&self) -> Box<dyn DaemonController> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
struct FailingPredaemonize;

impl DaemonController for FailingPredaemonize {
    fn predaemonize(&mut self) -> Result<()> {
        Err(Error::posix(libc::EPERM))
    }

    fn daemonized_child(&mut self) -> Result<i32> {
        Ok(0)
    }

    fn boxed_clone(&self) -> Box<dyn DaemonController> {
        Box::new(self.clone())
    }
}

#[test]
#[serial]
fn daemonize_yields_a_detached_daemon() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("app.pid");
    let config = DaemonConfig::new().pid_file(&pid_file);

    let handle = daemonize(&LingerFor(2), config).unwrap();
    assert!(handle.valid());
    assert_ne!(handle.pid(), process::current_pid());

    let contents = fs::read_to_string(&pid_file).unwrap();
    assert_eq!(contents, format!("{}\n", handle.pid().as_raw()));
}

#[test]
#[serial]
fn daemon_failure_before_readiness_reaches_the_caller() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("does-not-exist");
    let config = DaemonConfig::new().working_dir(&missing);

    let err = daemonize(&ExitImmediately, config).unwrap_err();
    assert_eq!(err.category(), Category::Process);
    assert_eq!(err.code(), ProcessErrno::DaemonError as u32);

    let cause = err.cause().unwrap();
    assert_eq!(cause.category(), Category::Process);
    assert_eq!(cause.code(), ProcessErrno::PosixSystem as u32);
    assert_eq!(cause.errno(), Some(libc::ENOENT));
    assert_eq!(cause.file(), "");
}

#[test]
#[serial]
fn pid_file_contention_reports_locked() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("contended.pid");

    let first = daemonize(&LingerFor(30), DaemonConfig::new().pid_file(&pid_file)).unwrap();
    let before = fs::read_to_string(&pid_file).unwrap();

    let err = daemonize(&ExitImmediately, DaemonConfig::new().pid_file(&pid_file)).unwrap_err();
    assert_eq!(err.code(), ProcessErrno::DaemonError as u32);
    let cause = err.cause().unwrap();
    assert_eq!(cause.code(), ProcessErrno::PidfileLocked as u32);

    let after = fs::read_to_string(&pid_file).unwrap();
    assert_eq!(before, after);

    first.kill(Signal::SIGKILL).unwrap();
}

#[test]
#[serial]
fn predaemonize_failure_short_circuits() {
    let err = daemonize(&FailingPredaemonize, DaemonConfig::new()).unwrap_err();
    assert_eq!(err.category(), Category::Process);
    assert_eq!(err.code(), ProcessErrno::PosixSystem as u32);
    assert_eq!(err.errno(), Some(libc::EPERM));
}

#[test]
#[serial]
fn handle_can_be_populated_only_once_daemonized() {
    let handle = DaemonHandle::new();
    assert!(!handle.valid());
}
