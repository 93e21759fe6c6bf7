//! Pidfile and its sibling lockfile (§6 "Persisted state"). The lockfile is
//! advisory-locked for the duration of bootstrap so two masters can never
//! race to bind the same listeners; the pidfile itself is just the ASCII
//! decimal PID, read by `weir-ctl` to find the master to signal.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use crate::error::SupervisorError;

pub struct LockGuard {
    _file: File,
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Acquires an exclusive, non-blocking advisory lock on `lock_path`,
/// failing with [`SupervisorError::AlreadyRunning`] if another master
/// already holds it (§4.8 "Bootstrap").
pub fn acquire_lock(lock_path: &Path, pidfile_path: &Path) -> Result<LockGuard, SupervisorError> {
    if let Some(parent) = lock_path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(lock_path)
        .map_err(|source| SupervisorError::Lock { path: lock_path.to_path_buf(), source })?;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        let existing = read_pid(pidfile_path).unwrap_or(0);
        return Err(SupervisorError::AlreadyRunning(existing));
    }
    Ok(LockGuard { _file: file, path: lock_path.to_path_buf() })
}

pub fn write_pid(pidfile_path: &Path, pid: libc::pid_t) -> Result<(), SupervisorError> {
    if let Some(parent) = pidfile_path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let mut file = File::create(pidfile_path)
        .map_err(|source| SupervisorError::PidFile { path: pidfile_path.to_path_buf(), source })?;
    write!(file, "{pid}")
        .map_err(|source| SupervisorError::PidFile { path: pidfile_path.to_path_buf(), source })
}

pub fn read_pid(pidfile_path: &Path) -> Option<libc::pid_t> {
    let mut contents = String::new();
    File::open(pidfile_path).ok()?.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

/// Removes the pidfile; called once the monitor loop confirms no children
/// remain (§4.8 "Monitor loop").
pub fn remove_pid(pidfile_path: &Path) {
    let _ = fs::remove_file(pidfile_path);
}

/// A running master is one whose pidfile names a live, signalable process.
pub fn is_running(pidfile_path: &Path) -> Option<libc::pid_t> {
    let pid = read_pid(pidfile_path)?;
    let rc = unsafe { libc::kill(pid, 0) };
    (rc == 0).then_some(pid)
}

/// Sends `signal` to the master named by `pidfile_path` (`weir-ctl`'s entire
/// job, per §6: "CLI → master signals children").
pub fn signal(pidfile_path: &Path, signal: libc::c_int) -> Result<libc::pid_t, SupervisorError> {
    let pid = is_running(pidfile_path).ok_or_else(|| SupervisorError::NotRunning(pidfile_path.to_path_buf()))?;
    let rc = unsafe { libc::kill(pid, signal) };
    if rc != 0 {
        return Err(SupervisorError::Signal { pid, signal, source: std::io::Error::last_os_error() });
    }
    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weir.pid");
        write_pid(&path, 4242).unwrap();
        assert_eq!(read_pid(&path), Some(4242));
    }

    #[test]
    fn second_lock_acquisition_fails_while_first_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("weir.pid.lock");
        let pid_path = dir.path().join("weir.pid");
        write_pid(&pid_path, std::process::id() as libc::pid_t).unwrap();

        let _first = acquire_lock(&lock_path, &pid_path).unwrap();
        let second = acquire_lock(&lock_path, &pid_path);
        assert!(second.is_err());
    }
}
