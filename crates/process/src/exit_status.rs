// crates/process/src/exit_status.rs
//! Decoded `waitpid` status words.

/// Conventional exit code of a successful child.
pub const SUCCESS: i32 = 0;
/// Conventional exit code of a failed child.
pub const FAILURE: i32 = 1;

/// A raw wait status word, or the invalid placeholder produced when no
/// status has been collected yet.
///
/// All predicate accessors panic on an invalid status; callers check
/// [`ExitStatus::valid`] first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    raw: Option<i32>,
}

impl ExitStatus {
    pub(crate) fn from_raw(raw: i32) -> Self {
        ExitStatus { raw: Some(raw) }
    }

    pub(crate) fn invalid() -> Self {
        ExitStatus { raw: None }
    }

    pub fn valid(&self) -> bool {
        self.raw.is_some()
    }

    fn word(&self) -> i32 {
        match self.raw {
            Some(raw) => raw,
            None => panic!("queried an invalid exit status"),
        }
    }

    /// The child terminated by calling `_exit` or returning from `main`.
    pub fn exited(&self) -> bool {
        libc::WIFEXITED(self.word())
    }

    /// Exit code of a normally terminated child. Meaningful only when
    /// [`exited`](Self::exited) holds.
    pub fn code(&self) -> i32 {
        libc::WEXITSTATUS(self.word())
    }

    /// The child was terminated by a signal.
    pub fn signaled(&self) -> bool {
        libc::WIFSIGNALED(self.word())
    }

    /// Number of the terminating signal. Meaningful only when
    /// [`signaled`](Self::signaled) holds.
    pub fn term_signal(&self) -> i32 {
        libc::WTERMSIG(self.word())
    }

    /// The terminating signal produced a core dump. Meaningful only when
    /// [`signaled`](Self::signaled) holds.
    pub fn core_dumped(&self) -> bool {
        libc::WCOREDUMP(self.word())
    }

    /// The child is currently stopped.
    pub fn stopped(&self) -> bool {
        libc::WIFSTOPPED(self.word())
    }

    /// Number of the stopping signal. Meaningful only when
    /// [`stopped`](Self::stopped) holds.
    pub fn stop_signal(&self) -> i32 {
        libc::WSTOPSIG(self.word())
    }

    /// The child resumed after a stop.
    pub fn continued(&self) -> bool {
        libc::WIFCONTINUED(self.word())
    }

    /// The status word describes a terminated child, not a stop or a
    /// continuation.
    pub fn terminated(&self) -> bool {
        self.exited() || self.signaled()
    }

    /// The undecoded status word.
    pub fn raw(&self) -> i32 {
        self.word()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_word_decodes_code() {
        let status = ExitStatus::from_raw(42 << 8);
        assert!(status.valid());
        assert!(status.exited());
        assert!(!status.signaled());
        assert!(!status.stopped());
        assert!(!status.continued());
        assert!(status.terminated());
        assert_eq!(status.code(), 42);
        assert_eq!(status.raw(), 42 << 8);
    }

    #[test]
    fn signal_word_decodes_signal() {
        let status = ExitStatus::from_raw(libc::SIGKILL);
        assert!(status.signaled());
        assert!(!status.exited());
        assert!(status.terminated());
        assert_eq!(status.term_signal(), libc::SIGKILL);
        assert!(!status.core_dumped());
    }

    #[test]
    fn invalid_status_reports_invalid() {
        let status = ExitStatus::invalid();
        assert!(!status.valid());
    }

    #[test]
    #[should_panic(expected = "invalid exit status")]
    fn querying_invalid_status_panics() {
        let _ = ExitStatus::invalid().exited();
    }
}
