//! Listener configuration (C8, §3 "Listener"): a bound address, its
//! protocol, worker count, and the user callback set.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use weir_protocol::StatefulProtocol;

pub type ConnId = weir_net::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
    Unix,
    Ssl,
}

#[derive(Debug, Clone)]
pub enum SocketSpec {
    Inet(SocketAddr),
    Unix(PathBuf),
}

/// Certificate/key pair for a `Ssl` listener (§4.9).
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

type EventCallback<P> = Box<dyn Fn(&mut weir_net::EventLoop<P>, ConnId) + Send + Sync>;
type MessageCallback<P> =
    Box<dyn Fn(&mut weir_net::EventLoop<P>, ConnId, <P as StatefulProtocol>::Message) + Send + Sync>;
type ErrorCallback<P> = Box<dyn Fn(&mut weir_net::EventLoop<P>, ConnId, String) + Send + Sync>;
type LifecycleCallback = Box<dyn Fn() + Send + Sync>;

/// The user callback set (§3 "Listener", attribute `callbacks`).
pub struct Callbacks<P: StatefulProtocol> {
    pub on_start: Option<LifecycleCallback>,
    pub on_connect: Option<EventCallback<P>>,
    pub on_message: Option<MessageCallback<P>>,
    pub on_close: Option<EventCallback<P>>,
    pub on_error: Option<ErrorCallback<P>>,
    pub on_buffer_full: Option<EventCallback<P>>,
    pub on_buffer_drain: Option<EventCallback<P>>,
    pub on_stop: Option<LifecycleCallback>,
    pub on_reload: Option<LifecycleCallback>,
    pub on_exit: Option<Box<dyn Fn(i32) + Send + Sync>>,
    pub on_ws_connect: Option<EventCallback<P>>,
    pub on_ws_ping: Option<EventCallback<P>>,
    pub on_ws_pong: Option<EventCallback<P>>,
    pub on_ws_close: Option<EventCallback<P>>,
}

impl<P: StatefulProtocol> Default for Callbacks<P> {
    fn default() -> Self {
        Self {
            on_start: None,
            on_connect: None,
            on_message: None,
            on_close: None,
            on_error: None,
            on_buffer_full: None,
            on_buffer_drain: None,
            on_stop: None,
            on_reload: None,
            on_exit: None,
            on_ws_connect: None,
            on_ws_ping: None,
            on_ws_pong: None,
            on_ws_close: None,
        }
    }
}

/// One `(transport, address, protocol)` triple and everything a worker
/// needs to serve it (§3 "Listener").
pub struct ListenerSpec<P: StatefulProtocol> {
    pub name: String,
    pub transport: Transport,
    pub address: SocketSpec,
    pub protocol: Arc<P>,
    pub count: usize,
    pub reloadable: bool,
    pub reuse_port: bool,
    pub user: Option<String>,
    pub group: Option<String>,
    pub tls: Option<TlsConfig>,
    pub max_package_size: usize,
    pub max_send_buffer_size: usize,
    pub callbacks: Callbacks<P>,
}

impl<P: StatefulProtocol> ListenerSpec<P> {
    pub fn new(name: impl Into<String>, transport: Transport, address: SocketSpec, protocol: P) -> Self {
        Self {
            name: name.into(),
            transport,
            address,
            protocol: Arc::new(protocol),
            count: 1,
            reloadable: true,
            reuse_port: false,
            user: None,
            group: None,
            tls: None,
            max_package_size: weir_net::DEFAULT_MAX_PACKAGE_SIZE,
            max_send_buffer_size: weir_net::DEFAULT_MAX_SEND_BUFFER_SIZE,
            callbacks: Callbacks::default(),
        }
    }

    pub fn count(mut self, count: usize) -> Self {
        self.count = count.max(1);
        self
    }

    pub fn reloadable(mut self, reloadable: bool) -> Self {
        self.reloadable = reloadable;
        self
    }

    pub fn reuse_port(mut self, reuse_port: bool) -> Self {
        self.reuse_port = reuse_port;
        self
    }

    pub fn user(mut self, user: impl Into<String>, group: Option<String>) -> Self {
        self.user = Some(user.into());
        self.group = group;
        self
    }

    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn callbacks(mut self, callbacks: Callbacks<P>) -> Self {
        self.callbacks = callbacks;
        self
    }
}

/// Type-erased view of a [`ListenerSpec`] so [`crate::ServerBuilder`] can
/// hold listeners of different protocols in one list, and so
/// `weir-supervisor`'s fork pool (which knows nothing about `P`) can still
/// drive each worker.
pub trait ErasedListener: Send + Sync {
    fn name(&self) -> &str;
    fn transport(&self) -> Transport;
    fn worker_count(&self) -> usize;
    fn reloadable(&self) -> bool;
    fn has_tls(&self) -> bool;
    fn run_worker(&self, slot: usize, statusfile: &Path) -> i32;
}

impl<P: StatefulProtocol> ErasedListener for ListenerSpec<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn transport(&self) -> Transport {
        self.transport
    }

    fn worker_count(&self) -> usize {
        self.count
    }

    fn reloadable(&self) -> bool {
        self.reloadable
    }

    fn has_tls(&self) -> bool {
        self.tls.is_some()
    }

    fn run_worker(&self, slot: usize, statusfile: &Path) -> i32 {
        crate::worker::run(self, slot, statusfile)
    }
}
