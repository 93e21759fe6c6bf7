//! Configuration validation errors (§3 "Config error type"), surfaced from
//! [`crate::ServerBuilder::run`] rather than panicking.

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("listener {0:?} uses transport Ssl but has no TlsConfig")]
    MissingTlsConfig(String),
    #[error("listener {0:?} has worker count 0")]
    ZeroWorkers(String),
    #[error(transparent)]
    Supervisor(#[from] weir_supervisor::SupervisorError),
}
