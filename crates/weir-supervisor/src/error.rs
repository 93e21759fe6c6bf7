#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to acquire lock file {path}: {source}")]
    Lock { path: std::path::PathBuf, source: std::io::Error },
    #[error("failed to write pidfile {path}: {source}")]
    PidFile { path: std::path::PathBuf, source: std::io::Error },
    #[error("fork() failed: {0}")]
    Fork(std::io::Error),
    #[error("another instance is already running (pid {0})")]
    AlreadyRunning(libc::pid_t),
    #[error("no running instance found (pidfile {0:?} missing or stale)")]
    NotRunning(std::path::PathBuf),
    #[error("failed to send signal {signal} to pid {pid}: {source}")]
    Signal { pid: libc::pid_t, signal: libc::c_int, source: std::io::Error },
}
