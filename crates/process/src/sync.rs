// crates/process/src/sync.rs
//! One-shot pipe rendezvous between a parent and a child.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};

use errors::{Error, Result};

const SYNC_TOKEN: u8 = 42;

/// A pipe carrying a single readiness token.
///
/// Created before a fork so both sides inherit it; each side then closes
/// the end it does not use. One side blocks in [`wait`](Self::wait) until
/// the other calls [`unblock`](Self::unblock). The read is deliberately a
/// single system call so that interruption and end-of-file surface to the
/// caller instead of being retried.
#[derive(Debug)]
pub struct SyncChannel {
    reader: Option<File>,
    writer: Option<File>,
}

impl SyncChannel {
    pub fn new() -> Result<Self> {
        let (read_end, write_end) =
            nix::unistd::pipe().map_err(|errno| Error::posix(errno as i32))?;
        Ok(SyncChannel {
            reader: Some(File::from(read_end)),
            writer: Some(File::from(write_end)),
        })
    }

    /// Block until the peer writes the token.
    ///
    /// End-of-file, meaning every write end is closed without a token
    /// being sent, is reported as a POSIX error with errno zero.
    /// Interruption by a signal surfaces as an error with `EINTR`.
    pub fn wait(&mut self) -> Result<()> {
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => panic!("waited on a sync channel without a read end"),
        };
        let mut token = [0u8; 1];
        match reader.read(&mut token) {
            Ok(0) => Err(Error::posix(0)),
            Ok(_) => {
                assert!(token[0] == SYNC_TOKEN, "unexpected sync channel token");
                Ok(())
            }
            Err(err) => Err(Error::posix(err.raw_os_error().unwrap_or(0))),
        }
    }

    /// Release a peer blocked in [`wait`](Self::wait).
    pub fn unblock(&mut self) -> Result<()> {
        let writer = match self.writer.as_mut() {
            Some(writer) => writer,
            None => panic!("unblocked a sync channel without a write end"),
        };
        writer
            .write_all(&[SYNC_TOKEN])
            .map_err(|err| Error::posix(err.raw_os_error().unwrap_or(0)))
    }

    /// Drop the write end so a peer's pending or future wait observes
    /// end-of-file once no other write end remains open.
    pub fn close_write_end(&mut self) {
        self.writer = None;
    }

    /// Drop the read end.
    pub fn close_read_end(&mut self) {
        self.reader = None;
    }

    /// Close both ends.
    pub fn finalize(&mut self) {
        self.reader = None;
        self.writer = None;
    }

    pub fn read_fd(&self) -> Option<RawFd> {
        self.reader.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn write_fd(&self) -> Option<RawFd> {
        self.writer.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Child-side name for [`wait`](Self::wait).
    pub fn wait_for_parent(&mut self) -> Result<()> {
        self.wait()
    }

    /// Parent-side name for [`unblock`](Self::unblock).
    pub fn unblock_child(&mut self) -> Result<()> {
        self.unblock()
    }

    /// Parent-side name for [`wait`](Self::wait).
    pub fn wait_for_child(&mut self) -> Result<()> {
        self.wait()
    }

    /// Child-side name for [`unblock`](Self::unblock).
    pub fn unblock_parent(&mut self) -> Result<()> {
        self.unblock()
    }
}
