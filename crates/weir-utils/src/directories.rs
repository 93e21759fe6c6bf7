use std::path::PathBuf;

use directories::BaseDirs;
use tracing::warn;

pub fn local_share_dir<S: AsRef<str>>(app_name: S) -> PathBuf {
    let Some(base_dirs) = BaseDirs::new() else {
        warn!("couldn't find basedirs, storing runtime state in /tmp/<app_name>");
        return PathBuf::from(format!("/tmp/{}", app_name.as_ref()));
    };
    base_dirs.data_dir().join(app_name.as_ref())
}

pub fn data_dir<S: AsRef<str>>(app_name: S) -> PathBuf {
    local_share_dir(app_name).join("data")
}

pub fn logs_dir<S: AsRef<str>>(app_name: S) -> PathBuf {
    local_share_dir(app_name).join("logs")
}

pub fn run_dir<S: AsRef<str>>(app_name: S) -> PathBuf {
    local_share_dir(app_name).join("run")
}

/// ASCII decimal master PID, per the persisted-state contract.
pub fn pid_file<S: AsRef<str>>(app_name: S) -> PathBuf {
    run_dir(&app_name).join(format!("{}.pid", app_name.as_ref()))
}

/// Sibling of the pidfile, advisory-locked during master bootstrap.
pub fn lock_file<S: AsRef<str>>(app_name: S) -> PathBuf {
    run_dir(&app_name).join(format!("{}.pid.lock", app_name.as_ref()))
}

/// Human-readable statistics dump, appended to by workers.
pub fn status_file<S: AsRef<str>>(app_name: S) -> PathBuf {
    run_dir(&app_name).join(format!("{}.status", app_name.as_ref()))
}

pub fn session_dir<S: AsRef<str>>(app_name: S) -> PathBuf {
    local_share_dir(app_name).join("sessions")
}
