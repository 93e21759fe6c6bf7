//! Master process supervisor (C9, §4.8): forks one worker per
//! `(listener, slot)` pair, tracks exits, respawns unless shutting down,
//! and turns signals into the state machine `STARTING -> RUNNING ->
//! {RELOADING -> RUNNING} | SHUTDOWN`.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tracing::{info, warn};

use crate::error::SupervisorError;
use crate::pidfile::{self, LockGuard};
use crate::signals::{MasterSignal, MasterSignalFlags};
use crate::statusfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Starting,
    Running,
    Reloading,
    Shutdown,
}

/// Which `(listener, slot)` a forked child is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerSlot {
    pub listener: usize,
    pub slot: usize,
}

/// One listener's worker pool, as the master sees it: just a count and
/// whether it participates in hot reload.
#[derive(Debug, Clone)]
pub struct ListenerPool {
    pub name: String,
    pub worker_count: usize,
    pub reloadable: bool,
}

/// User-supplied worker body, run in the child immediately after `fork()`
/// and expected to call `std::process::exit` itself (the event loop's
/// `run()` return value becomes the exit code).
pub trait WorkerEntry: Send + Sync {
    fn run(&self, slot: WorkerSlot) -> i32;
}

impl<F> WorkerEntry for F
where
    F: Fn(WorkerSlot) -> i32 + Send + Sync,
{
    fn run(&self, slot: WorkerSlot) -> i32 {
        self(slot)
    }
}

pub struct Master {
    state: SupervisorState,
    pools: Vec<ListenerPool>,
    children: HashMap<libc::pid_t, WorkerSlot>,
    exit_counts: HashMap<i32, u64>,
    pidfile_path: PathBuf,
    statusfile_path: PathBuf,
    stop_timeout: Duration,
    stop_deadline: Option<Instant>,
    stop_is_forceful: bool,
    start_time: SystemTime,
    signals: MasterSignalFlags,
    reload_queue: VecDeque<libc::pid_t>,
    reload_in_flight: Option<libc::pid_t>,
    reload_signal: libc::c_int,
    _lock: LockGuard,
}

impl Master {
    /// Bootstraps the master (§4.8 "Bootstrap"): acquires the lockfile,
    /// writes the pidfile, installs signal handlers, and forks the initial
    /// worker pool.
    pub fn bootstrap(
        pidfile_path: &Path,
        lockfile_path: &Path,
        statusfile_path: &Path,
        pools: Vec<ListenerPool>,
        worker_entry: &Arc<dyn WorkerEntry>,
        stop_timeout: Duration,
    ) -> Result<Self, SupervisorError> {
        let lock = pidfile::acquire_lock(lockfile_path, pidfile_path)?;
        pidfile::write_pid(pidfile_path, std::process::id() as libc::pid_t)?;
        let signals = MasterSignalFlags::install();

        let mut master = Self {
            state: SupervisorState::Starting,
            pools,
            children: HashMap::new(),
            exit_counts: HashMap::new(),
            pidfile_path: pidfile_path.to_path_buf(),
            statusfile_path: statusfile_path.to_path_buf(),
            stop_timeout,
            stop_deadline: None,
            stop_is_forceful: false,
            start_time: SystemTime::now(),
            signals,
            reload_queue: VecDeque::new(),
            reload_in_flight: None,
            reload_signal: libc::SIGUSR1,
            _lock: lock,
        };

        for pool_idx in 0..master.pools.len() {
            for slot in 0..master.pools[pool_idx].worker_count {
                master.fork_worker(pool_idx, slot, worker_entry)?;
            }
        }
        master.state = SupervisorState::Running;
        info!(workers = master.children.len(), "master bootstrapped");
        Ok(master)
    }

    fn fork_worker(
        &mut self,
        pool_idx: usize,
        slot: usize,
        worker_entry: &Arc<dyn WorkerEntry>,
    ) -> Result<(), SupervisorError> {
        let pid = unsafe { libc::fork() };
        if pid < 0 {
            return Err(SupervisorError::Fork(std::io::Error::last_os_error()));
        }
        if pid == 0 {
            let code = worker_entry.run(WorkerSlot { listener: pool_idx, slot });
            std::process::exit(code);
        }
        self.children.insert(pid, WorkerSlot { listener: pool_idx, slot });
        Ok(())
    }

    /// Runs the monitor loop until shutdown completes, returning the exit
    /// code the process should use (§4.8 "Monitor loop").
    pub fn run(&mut self, worker_entry: Arc<dyn WorkerEntry>) -> i32 {
        loop {
            for signal in self.signals.take_fired() {
                self.handle_signal(signal);
            }

            if let Some(deadline) = self.stop_deadline {
                if Instant::now() >= deadline {
                    self.stop_deadline = None;
                    if self.stop_is_forceful {
                        warn!("stop timeout elapsed, sending SIGKILL to remaining workers");
                        for &pid in self.children.keys() {
                            unsafe {
                                libc::kill(pid, libc::SIGKILL);
                            }
                        }
                    } else {
                        warn!(
                            remaining = self.children.len(),
                            "graceful stop timeout elapsed, exiting without SIGKILL"
                        );
                        pidfile::remove_pid(&self.pidfile_path);
                        return 0;
                    }
                }
            }

            self.reap(&worker_entry);

            if self.state == SupervisorState::Shutdown && self.children.is_empty() {
                pidfile::remove_pid(&self.pidfile_path);
                info!("all workers exited, master shutting down");
                return 0;
            }

            std::thread::sleep(Duration::from_millis(100));
        }
    }

    fn handle_signal(&mut self, signal: MasterSignal) {
        match signal {
            MasterSignal::ImmediateStop => self.begin_shutdown(libc::SIGINT, true),
            MasterSignal::GracefulStop => self.begin_shutdown(libc::SIGQUIT, false),
            MasterSignal::Reload => self.begin_reload(libc::SIGUSR1),
            MasterSignal::GracefulReload => self.begin_reload(libc::SIGUSR2),
            MasterSignal::StatusDump => self.dump_status(false),
            MasterSignal::ConnectionDump => self.dump_status(true),
        }
    }

    /// `forceful` picks between the two distinct stop rows of §4.8:
    /// `SIGINT`/`SIGTERM` escalate to `SIGKILL` once `stop_timeout` elapses,
    /// `SIGQUIT` never does — a graceful stop that times out just exits.
    fn begin_shutdown(&mut self, child_signal: libc::c_int, forceful: bool) {
        info!(state = ?self.state, forceful, "master stopping");
        self.state = SupervisorState::Shutdown;
        self.stop_deadline = Some(Instant::now() + self.stop_timeout);
        self.stop_is_forceful = forceful;
        for &pid in self.children.keys() {
            unsafe {
                libc::kill(pid, child_signal);
            }
        }
    }

    fn begin_reload(&mut self, child_signal: libc::c_int) {
        if self.state == SupervisorState::Shutdown {
            return;
        }
        info!("master reloading");
        self.state = SupervisorState::Reloading;
        self.reload_signal = child_signal;
        self.reload_queue = self
            .children
            .iter()
            .filter(|(_, slot)| self.pools[slot.listener].reloadable)
            .map(|(&pid, _)| pid)
            .collect();
        self.advance_reload();
    }

    fn advance_reload(&mut self) {
        if self.reload_in_flight.is_some() {
            return;
        }
        match self.reload_queue.pop_front() {
            Some(pid) => {
                unsafe {
                    libc::kill(pid, self.reload_signal);
                }
                self.reload_in_flight = Some(pid);
            }
            None => self.state = SupervisorState::Running,
        }
    }

    fn dump_status(&self, connections: bool) {
        let exit_counts: Vec<(i32, u64)> = self.exit_counts.iter().map(|(&k, &v)| (k, v)).collect();
        if let Err(e) = statusfile::write_header(
            &self.statusfile_path,
            self.start_time,
            self.pools.len(),
            self.children.len(),
            &exit_counts,
        ) {
            warn!("failed to write statusfile header: {e}");
        }
        for &pid in self.children.keys() {
            // Ask each child to append its own row; SIGIOT/SIGIO are
            // re-sent per child since the master only knows PIDs, not the
            // live connection/statistics state each worker holds.
            let sig = if connections { libc::SIGIO } else { libc::SIGABRT };
            unsafe {
                libc::kill(pid, sig);
            }
        }
    }

    fn reap(&mut self, worker_entry: &Arc<dyn WorkerEntry>) {
        loop {
            let mut status: libc::c_int = 0;
            let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
            if pid <= 0 {
                break;
            }
            let Some(slot) = self.children.remove(&pid) else { continue };

            let exit_code = if libc::WIFEXITED(status) {
                libc::WEXITSTATUS(status)
            } else {
                -libc::WTERMSIG(status)
            };
            *self.exit_counts.entry(exit_code).or_insert(0) += 1;

            if self.reload_in_flight == Some(pid) {
                self.reload_in_flight = None;
                if self.state != SupervisorState::Shutdown {
                    let _ = self.fork_worker(slot.listener, slot.slot, worker_entry);
                }
                self.advance_reload();
                continue;
            }

            if self.state != SupervisorState::Shutdown {
                if let Err(e) = self.fork_worker(slot.listener, slot.slot, worker_entry) {
                    warn!("failed to respawn worker {slot:?}: {e}");
                }
            }
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_entry_closures_implement_the_trait() {
        let entry: Arc<dyn WorkerEntry> = Arc::new(|slot: WorkerSlot| slot.slot as i32);
        assert_eq!(entry.run(WorkerSlot { listener: 0, slot: 3 }), 3);
    }
}
