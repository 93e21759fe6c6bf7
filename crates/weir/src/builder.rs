//! Programmatic configuration surface (§4.11): `ServerBuilder::bind`
//! appends a listener spec, `ServerBuilder::run` hands the finished list to
//! [`weir_supervisor::Master::bootstrap`].

use std::sync::Arc;
use std::time::Duration;

use weir_protocol::StatefulProtocol;
use weir_supervisor::{ListenerPool, Master, WorkerSlot};

use crate::error::ConfigError;
use crate::listener::{ErasedListener, ListenerSpec, Transport};

pub struct ServerBuilder {
    app_name: String,
    listeners: Vec<Arc<dyn ErasedListener>>,
    stop_timeout: Duration,
}

impl ServerBuilder {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self { app_name: app_name.into(), listeners: Vec::new(), stop_timeout: Duration::from_secs(2) }
    }

    /// §5 "Cancellation and timeouts": how long a graceful stop waits
    /// before escalating to `SIGKILL`.
    pub fn stop_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn bind<P: StatefulProtocol>(&mut self, spec: ListenerSpec<P>) -> &mut Self {
        self.listeners.push(Arc::new(spec));
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for listener in &self.listeners {
            if listener.transport() == Transport::Ssl && !listener.has_tls() {
                return Err(ConfigError::MissingTlsConfig(listener.name().to_string()));
            }
            if listener.worker_count() == 0 {
                return Err(ConfigError::ZeroWorkers(listener.name().to_string()));
            }
        }
        Ok(())
    }

    /// Validates every listener spec without starting anything (§3 "Config
    /// error type").
    pub fn build(&self) -> Result<(), ConfigError> {
        self.validate()
    }

    /// Bootstraps the master supervisor and blocks in its monitor loop
    /// until every worker has exited (§4.8, §4.11).
    pub fn run(self) -> Result<i32, ConfigError> {
        self.validate()?;

        let pools: Vec<ListenerPool> = self
            .listeners
            .iter()
            .map(|l| ListenerPool {
                name: l.name().to_string(),
                worker_count: l.worker_count(),
                reloadable: l.reloadable(),
            })
            .collect();

        let app = self.app_name.clone();
        let statusfile = weir_utils::directories::status_file(&app);
        let listeners = self.listeners.clone();
        let entry: Arc<dyn weir_supervisor::WorkerEntry> = Arc::new(move |slot: WorkerSlot| {
            listeners[slot.listener].run_worker(slot.slot, &statusfile)
        });

        let mut master = Master::bootstrap(
            &weir_utils::directories::pid_file(&app),
            &weir_utils::directories::lock_file(&app),
            &weir_utils::directories::status_file(&app),
            pools,
            &entry,
            self.stop_timeout,
        )?;

        Ok(master.run(entry))
    }
}
