//! Master/worker process supervision (C9, §4.8): forking, pidfile/lockfile
//! bookkeeping, the statusfile format, and master/worker signal handling.

pub mod error;
pub mod master;
pub mod pidfile;
pub mod signals;
pub mod statusfile;
pub mod worker;

pub use error::SupervisorError;
pub use master::{ListenerPool, Master, SupervisorState, WorkerEntry, WorkerSlot};
pub use pidfile::{LockGuard, acquire_lock, is_running, read_pid, remove_pid, signal, write_pid};
pub use signals::{MasterSignal, MasterSignalFlags};
pub use statusfile::{ConnectionRow, ProcessStats, append_connection_row, append_process_row, write_header};
pub use worker::drop_privileges;
