// crates/errors/src/lib.rs
//! Structured errors designed to survive a trip across a fork boundary.
//!
//! An [`Error`] carries a kind, a category, a category-specific numeric
//! code, an optionally captured OS errno, its source location, a timestamp
//! and an optional chained cause. Everything except the source file path
//! can be serialized into a flat record and faithfully rebuilt in another
//! process; reconstruction substitutes an empty file path.

use std::error;
use std::fmt;
use std::panic::Location;
use std::time::{SystemTime, UNIX_EPOCH};

/// Broad failure class, mirroring the logic/runtime split of the standard
/// exception taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Kind {
    Logic = 0,
    Runtime = 1,
}

/// Subsystem that classified the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Category {
    Unknown = 0,
    Assert = 1,
    Process = 2,
}

/// Error codes of the [`Category::Process`] category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ProcessErrno {
    Unknown = 0,
    /// A failing OS call; the captured errno travels with the error.
    PosixSystem = 1,
    /// Reserved for non-POSIX lower-level failures. Defined in the wire
    /// format for completeness; no call site raises it.
    LibSystem = 2,
    /// The daemon died or failed before completing its readiness
    /// handshake, as observed by its direct parent.
    DaemonError = 3,
    /// The PID file is already locked by another process.
    PidfileLocked = 4,
}

impl ProcessErrno {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(ProcessErrno::Unknown),
            1 => Some(ProcessErrno::PosixSystem),
            2 => Some(ProcessErrno::LibSystem),
            3 => Some(ProcessErrno::DaemonError),
            4 => Some(ProcessErrno::PidfileLocked),
            _ => None,
        }
    }
}

/// Code of the [`Category::Unknown`] fallback classification.
pub const UNKNOWN_CODE: u32 = 0;

#[derive(Debug, Clone)]
pub struct Error {
    kind: Kind,
    category: Category,
    code: u32,
    errno: Option<i32>,
    file: String,
    line: u32,
    seconds: i64,
    microseconds: i64,
    cause: Option<Box<Error>>,
}

pub type Result<T> = std::result::Result<T, Error>;

fn timestamp() -> (i64, i64) {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_secs() as i64, i64::from(d.subsec_micros())),
        Err(_) => (0, 0),
    }
}

impl Error {
    /// New error stamped with the caller's source location and the current
    /// time.
    #[track_caller]
    pub fn new(kind: Kind, category: Category, code: u32) -> Self {
        let location = Location::caller();
        let (seconds, microseconds) = timestamp();
        Error {
            kind,
            category,
            code,
            errno: None,
            file: location.file().to_string(),
            line: location.line(),
            seconds,
            microseconds,
            cause: None,
        }
    }

    #[track_caller]
    pub fn logic(category: Category, code: u32) -> Self {
        Error::new(Kind::Logic, category, code)
    }

    #[track_caller]
    pub fn runtime(category: Category, code: u32) -> Self {
        Error::new(Kind::Runtime, category, code)
    }

    /// Runtime error of the process category.
    #[track_caller]
    pub fn process(code: ProcessErrno) -> Self {
        Error::new(Kind::Runtime, Category::Process, code as u32)
    }

    /// Runtime POSIX_SYSTEM error carrying the given errno.
    #[track_caller]
    pub fn posix(errno: i32) -> Self {
        Error::process(ProcessErrno::PosixSystem).with_errno(errno)
    }

    /// Rebuild an error from explicit parts, typically the fields of a
    /// deserialized wire record. Nothing is stamped implicitly.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        kind: Kind,
        category: Category,
        code: u32,
        errno: Option<i32>,
        file: String,
        line: u32,
        seconds: i64,
        microseconds: i64,
    ) -> Self {
        Error {
            kind,
            category,
            code,
            errno,
            file,
            line,
            seconds,
            microseconds,
            cause: None,
        }
    }

    pub fn with_errno(mut self, errno: i32) -> Self {
        self.errno = Some(errno);
        self
    }

    pub fn with_cause(mut self, cause: Error) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn errno(&self) -> Option<i32> {
        self.errno
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn microseconds(&self) -> i64 {
        self.microseconds
    }

    pub fn cause(&self) -> Option<&Error> {
        self.cause.as_deref()
    }

    /// Innermost error of the cause chain; `self` when there is none.
    pub fn root_cause(&self) -> &Error {
        let mut current = self;
        while let Some(cause) = current.cause() {
            current = cause;
        }
        current
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            Kind::Logic => "logic",
            Kind::Runtime => "runtime",
        };
        let category = match self.category {
            Category::Unknown => "unknown",
            Category::Assert => "assert",
            Category::Process => "process",
        };
        write!(f, "{kind} error [{category}/{}]", self.code)?;
        if let Some(errno) = self.errno {
            write!(f, " (errno {errno})")?;
        }
        if !self.file.is_empty() {
            write!(f, " at {}:{}", self.file, self.line)?;
        }
        Ok(())
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.cause.as_ref().map(|c| c.as_ref() as &(dyn error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn posix_constructor_captures_location_and_errno() {
        let err = Error::posix(13);
        assert_eq!(err.kind(), Kind::Runtime);
        assert_eq!(err.category(), Category::Process);
        assert_eq!(err.code(), ProcessErrno::PosixSystem as u32);
        assert_eq!(err.errno(), Some(13));
        assert!(err.file().ends_with("lib.rs"));
        assert_ne!(err.line(), 0);
        assert_ne!(err.seconds(), 0);
    }

    #[test]
    fn cause_chain_resolves_to_innermost() {
        let inner = Error::posix(2);
        let outer = Error::process(ProcessErrno::DaemonError).with_cause(inner);
        assert_eq!(outer.code(), ProcessErrno::DaemonError as u32);
        let root = outer.root_cause();
        assert_eq!(root.code(), ProcessErrno::PosixSystem as u32);
        assert_eq!(root.errno(), Some(2));
        assert!(outer.source().is_some());
    }

    #[test]
    fn from_parts_stamps_nothing() {
        let err = Error::from_parts(
            Kind::Logic,
            Category::Assert,
            7,
            None,
            String::new(),
            0,
            0,
            0,
        );
        assert_eq!(err.kind(), Kind::Logic);
        assert_eq!(err.file(), "");
        assert_eq!(err.line(), 0);
        assert_eq!(err.seconds(), 0);
    }

    #[test]
    fn process_errno_round_trips_raw_values() {
        for code in [
            ProcessErrno::Unknown,
            ProcessErrno::PosixSystem,
            ProcessErrno::LibSystem,
            ProcessErrno::DaemonError,
            ProcessErrno::PidfileLocked,
        ] {
            assert_eq!(ProcessErrno::from_raw(code as u32), Some(code));
        }
        assert_eq!(ProcessErrno::from_raw(99), None);
    }
}
