//! Programmatic entry point for building a multi-process network server
//! (C8, §4.11): construct one or more [`ListenerSpec`] values, hand them to
//! a [`ServerBuilder`], and call [`ServerBuilder::run`] to fork the master
//! supervisor's worker pool.

mod builder;
mod error;
mod listener;
mod worker;

pub use builder::ServerBuilder;
pub use error::ConfigError;
pub use listener::{Callbacks, ConnId, ErasedListener, ListenerSpec, SocketSpec, TlsConfig, Transport};

pub use weir_net as net;
pub use weir_protocol as protocol;
pub use weir_supervisor as supervisor;
pub use weir_timing as timing;
pub use weir_utils as utils;
