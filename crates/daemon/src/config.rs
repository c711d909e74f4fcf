// crates/daemon/src/config.rs
//! Daemonization options.

use std::path::PathBuf;

/// Options applied while turning the grandchild into a daemon.
///
/// By default no PID file is written, the working directory is left
/// alone, the three standard streams are redirected to `/dev/null` and
/// inherited signal dispositions are reset to their defaults.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub(crate) pid_file: Option<PathBuf>,
    pub(crate) pid_file_mode: u32,
    pub(crate) working_dir: Option<PathBuf>,
    pub(crate) stdin: Option<PathBuf>,
    pub(crate) stdout: Option<PathBuf>,
    pub(crate) stderr: Option<PathBuf>,
    pub(crate) reset_signals: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            pid_file: None,
            pid_file_mode: 0o644,
            working_dir: None,
            stdin: Some(PathBuf::from("/dev/null")),
            stdout: Some(PathBuf::from("/dev/null")),
            stderr: Some(PathBuf::from("/dev/null")),
            reset_signals: true,
        }
    }
}

impl DaemonConfig {
    pub fn new() -> Self {
        DaemonConfig::default()
    }

    /// Write and lock a PID file at the given path.
    pub fn pid_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pid_file = Some(path.into());
        self
    }

    /// Creation mode of the PID file.
    pub fn pid_file_mode(mut self, mode: u32) -> Self {
        self.pid_file_mode = mode;
        self
    }

    /// Change the daemon's working directory.
    pub fn working_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(path.into());
        self
    }

    /// Redirect standard input; `None` leaves it untouched.
    pub fn stdin(mut self, path: Option<PathBuf>) -> Self {
        self.stdin = path;
        self
    }

    /// Redirect standard output; `None` leaves it untouched.
    pub fn stdout(mut self, path: Option<PathBuf>) -> Self {
        self.stdout = path;
        self
    }

    /// Redirect standard error; `None` leaves it untouched.
    pub fn stderr(mut self, path: Option<PathBuf>) -> Self {
        self.stderr = path;
        self
    }

    /// Whether the daemon resets inherited signal dispositions to their
    /// defaults.
    pub fn reset_signals(mut self, reset: bool) -> Self {
        self.reset_signals = reset;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn defaults_redirect_streams_to_dev_null() {
        let config = DaemonConfig::default();
        assert!(config.pid_file.is_none());
        assert_eq!(config.pid_file_mode, 0o644);
        assert!(config.working_dir.is_none());
        assert_eq!(config.stdin.as_deref(), Some(Path::new("/dev/null")));
        assert_eq!(config.stdout.as_deref(), Some(Path::new("/dev/null")));
        assert_eq!(config.stderr.as_deref(), Some(Path::new("/dev/null")));
        assert!(config.reset_signals);
    }

    #[test]
    fn builders_chain() {
        let config = DaemonConfig::new()
            .pid_file("/run/app.pid")
            .pid_file_mode(0o600)
            .working_dir("/")
            .stderr(Some(PathBuf::from("/var/log/app.err")))
            .reset_signals(false);
        assert_eq!(config.pid_file.as_deref(), Some(Path::new("/run/app.pid")));
        assert_eq!(config.pid_file_mode, 0o600);
        assert_eq!(config.working_dir.as_deref(), Some(Path::new("/")));
        assert_eq!(config.stderr.as_deref(), Some(Path::new("/var/log/app.err")));
        assert!(!config.reset_signals);
    }
}
