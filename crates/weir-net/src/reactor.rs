use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use mio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use mio::{Events, Interest, Poll, Token};
use rustls::ServerConnection;
use tracing::{debug, error, info, warn};
use weir_protocol::StatefulProtocol;
use weir_timing::{Duration, Instant};

use crate::conn::{ConnEvent, Connection};
use crate::timer::{Recurrence, TimerId, TimerWheel};
use crate::tls::TlsStream;

type TlsTcpStream = TlsStream<TcpStream, ServerConnection>;

/// A signal the loop watches for (§4.1 "onSignal"); the master supervisor
/// and workers both register handlers of their own for this same set
/// (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Int,
    Term,
    Quit,
    Hup,
    Usr1,
    Usr2,
    /// `SIGIOT` (status dump request, §4.8).
    Iot,
    /// `SIGIO` (connection dump request, §4.8).
    Io,
}

impl Signal {
    fn raw(self) -> libc::c_int {
        match self {
            Signal::Int => signal_hook::consts::SIGINT,
            Signal::Term => signal_hook::consts::SIGTERM,
            Signal::Quit => signal_hook::consts::SIGQUIT,
            Signal::Hup => signal_hook::consts::SIGHUP,
            Signal::Usr1 => signal_hook::consts::SIGUSR1,
            Signal::Usr2 => signal_hook::consts::SIGUSR2,
            Signal::Iot => libc::SIGABRT,
            Signal::Io => signal_hook::consts::SIGIO,
        }
    }

    const ALL: [Signal; 8] = [
        Signal::Int,
        Signal::Term,
        Signal::Quit,
        Signal::Hup,
        Signal::Usr1,
        Signal::Usr2,
        Signal::Iot,
        Signal::Io,
    ];
}

/// Registers every tracked signal into its own atomic flag, one
/// `AtomicUsize` per signal, checked once per tick rather than acted on
/// inside the handler itself. Public so a standalone poll loop outside
/// [`EventLoop`] (a UDP worker, which has no listener/connection slots to
/// manage) can still use the same signal vocabulary.
pub struct SignalFlags {
    flags: HashMap<Signal, Arc<AtomicUsize>>,
}

impl SignalFlags {
    pub fn install() -> Self {
        let mut flags = HashMap::new();
        for &sig in &Signal::ALL {
            let flag = Arc::new(AtomicUsize::new(0));
            if let Err(e) = signal_hook::flag::register_usize(sig.raw(), Arc::clone(&flag), 1) {
                warn!("could not install handler for {sig:?}: {e}");
            }
            flags.insert(sig, flag);
        }
        unsafe {
            libc::signal(signal_hook::consts::SIGPIPE, libc::SIG_IGN);
        }
        Self { flags }
    }

    pub fn take_fired(&self) -> Vec<Signal> {
        self.flags
            .iter()
            .filter(|(_, flag)| flag.swap(0, Ordering::SeqCst) != 0)
            .map(|(sig, _)| *sig)
            .collect()
    }
}

/// One suspended logical task (§4.1 "Suspension"): the only user-facing
/// concurrency primitive. `suspend()` registers a slot; `resume`/`throw`
/// from elsewhere queues the resumer as a microtask.
pub struct Suspensions {
    next_id: u64,
    live: HashMap<u64, bool>,
}

impl Default for Suspensions {
    fn default() -> Self {
        Self { next_id: 0, live: HashMap::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SuspensionId(pub u64);

impl Suspensions {
    fn register(&mut self) -> SuspensionId {
        let id = self.next_id;
        self.next_id += 1;
        self.live.insert(id, true);
        SuspensionId(id)
    }

    /// Spurious resumes on an already-resolved or unknown suspension are
    /// silently ignored, per §4.1.
    fn is_live(&self, id: SuspensionId) -> bool {
        self.live.get(&id.0).copied().unwrap_or(false)
    }

    fn resolve(&mut self, id: SuspensionId) {
        self.live.remove(&id.0);
    }
}

type Microtask = Box<dyn FnOnce() + Send>;

/// Where an accepted connection came from; Unix-domain peers carry no
/// address worth reporting (§4.3 "UDP is simpler" applies the same idea to
/// Unix sockets: the transport differs, the framing contract does not).
#[derive(Debug, Clone, Copy)]
pub enum PeerAddr {
    Tcp(SocketAddr),
    Unix,
}

/// Either stream kind a [`Connection`] can wrap, so one `Slot` map can hold
/// both TCP and Unix-domain connections under the same `Token` space.
enum AnyConn<P: StatefulProtocol> {
    Tcp(Connection<TcpStream, P>),
    Unix(Connection<UnixStream, P>),
    Tls(Connection<TlsTcpStream, P>),
}

impl<P: StatefulProtocol> AnyConn<P> {
    fn on_readable<F: FnMut(ConnEvent<P::Message>)>(&mut self, on_event: F) {
        match self {
            AnyConn::Tcp(c) => c.on_readable(on_event),
            AnyConn::Unix(c) => c.on_readable(on_event),
            AnyConn::Tls(c) => c.on_readable(on_event),
        }
    }

    fn on_writable(&mut self) -> crate::buffer::Edge {
        match self {
            AnyConn::Tcp(c) => c.on_writable(),
            AnyConn::Unix(c) => c.on_writable(),
            AnyConn::Tls(c) => c.on_writable(),
        }
    }

    fn send(&mut self, msg: P::Message) -> bool {
        match self {
            AnyConn::Tcp(c) => c.send(msg),
            AnyConn::Unix(c) => c.send(msg),
            AnyConn::Tls(c) => c.send(msg),
        }
    }

    fn close(&mut self) {
        match self {
            AnyConn::Tcp(c) => c.close(),
            AnyConn::Unix(c) => c.close(),
            AnyConn::Tls(c) => c.close(),
        }
    }

    fn status(&self) -> crate::conn::ConnStatus {
        match self {
            AnyConn::Tcp(c) => c.status,
            AnyConn::Unix(c) => c.status,
            AnyConn::Tls(c) => c.status,
        }
    }

    fn deregister(&mut self, poll: &Poll) {
        let _ = match self {
            AnyConn::Tcp(c) => poll.registry().deregister(c.inner_mut()),
            AnyConn::Unix(c) => poll.registry().deregister(c.inner_mut()),
            AnyConn::Tls(c) => poll.registry().deregister(c.inner_mut().inner_mut()),
        };
    }

    fn snapshot(&self) -> ConnectionSnapshot {
        let (transport, c) = match self {
            AnyConn::Tcp(c) => ("tcp", c as &dyn ConnectionFields),
            AnyConn::Unix(c) => ("unix", c as &dyn ConnectionFields),
            AnyConn::Tls(c) => ("tls", c as &dyn ConnectionFields),
        };
        ConnectionSnapshot {
            id: c.id(),
            transport,
            peer_addr: c.peer_addr(),
            status: c.status(),
            stats: c.stats(),
            recv_q: c.recv_q(),
            send_q: c.send_q(),
        }
    }
}

/// Narrow accessor seam so [`AnyConn::snapshot`] can read a connection's
/// book-keeping fields without caring which stream type it wraps.
trait ConnectionFields {
    fn id(&self) -> u64;
    fn peer_addr(&self) -> Option<SocketAddr>;
    fn status(&self) -> crate::conn::ConnStatus;
    fn stats(&self) -> crate::conn::ConnStats;
    fn recv_q(&self) -> usize;
    fn send_q(&self) -> usize;
}

impl<S: std::io::Read + std::io::Write, P: StatefulProtocol> ConnectionFields for Connection<S, P> {
    fn id(&self) -> u64 {
        self.id
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    fn status(&self) -> crate::conn::ConnStatus {
        self.status
    }

    fn stats(&self) -> crate::conn::ConnStats {
        self.stats
    }

    fn recv_q(&self) -> usize {
        self.recv_queue_len()
    }

    fn send_q(&self) -> usize {
        self.send_queue_len()
    }
}

/// One connection's book-keeping, for a status/connection dump (§6).
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub id: u64,
    pub transport: &'static str,
    pub peer_addr: Option<SocketAddr>,
    pub status: crate::conn::ConnStatus,
    pub stats: crate::conn::ConnStats,
    pub recv_q: usize,
    pub send_q: usize,
}

enum Slot<P: StatefulProtocol> {
    TcpListener { listener: TcpListener, protocol: Arc<P> },
    UnixListener { listener: UnixListener, protocol: Arc<P> },
    TlsListener { listener: TcpListener, protocol: Arc<P>, tls_config: Arc<rustls::ServerConfig> },
    Connection(AnyConn<P>),
}

/// Outcome of a single [`EventLoop::tick`].
pub enum Tick {
    Normal,
    StopRequested,
    Fatal(String),
}

/// Events the loop surfaces to the driving application per tick.
pub enum LoopEvent<M> {
    Accept { listener: Token, conn: Token, peer_addr: PeerAddr },
    Message { conn: Token, message: M },
    BufferFull { conn: Token },
    BufferDrain { conn: Token },
    Closed { conn: Token },
    Signal(Signal),
    TimerFired(TimerId),
}

/// Single-threaded cooperative reactor (C1): I/O readiness via `mio`,
/// timers, signals, a microtask queue, and suspensions. One instance per
/// worker process.
pub struct EventLoop<P: StatefulProtocol> {
    poll: Poll,
    events: Events,
    slots: HashMap<Token, Slot<P>>,
    next_token: usize,
    next_conn_id: u64,
    timers: TimerWheel,
    signals: SignalFlags,
    microtasks: VecDeque<Microtask>,
    deferred: VecDeque<Microtask>,
    pub suspensions: Suspensions,
    running: bool,
}

impl<P: StatefulProtocol> EventLoop<P> {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(256),
            slots: HashMap::new(),
            next_token: 0,
            next_conn_id: 0,
            timers: TimerWheel::default(),
            signals: SignalFlags::install(),
            microtasks: VecDeque::new(),
            deferred: VecDeque::new(),
            suspensions: Suspensions::default(),
            running: true,
        })
    }

    fn alloc_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    pub fn listen_tcp(&mut self, addr: SocketAddr, protocol: Arc<P>) -> std::io::Result<Token> {
        let mut listener = TcpListener::bind(addr)?;
        let token = self.alloc_token();
        self.poll.registry().register(&mut listener, token, Interest::READABLE)?;
        self.slots.insert(token, Slot::TcpListener { listener, protocol });
        info!(?addr, "listening");
        Ok(token)
    }

    /// Binds a Unix-domain listener. The caller is responsible for
    /// removing a stale socket file at `path` before rebinding (the master
    /// process does this once per reload, not the loop).
    pub fn listen_unix(&mut self, path: &std::path::Path, protocol: Arc<P>) -> std::io::Result<Token> {
        let mut listener = UnixListener::bind(path)?;
        let token = self.alloc_token();
        self.poll.registry().register(&mut listener, token, Interest::READABLE)?;
        self.slots.insert(token, Slot::UnixListener { listener, protocol });
        info!(?path, "listening");
        Ok(token)
    }

    /// Binds a TLS listener (§4.9 C12): every accepted stream performs a
    /// non-blocking handshake via `tls_config` before any bytes reach
    /// `protocol.feed`.
    pub fn listen_tls(
        &mut self,
        addr: SocketAddr,
        protocol: Arc<P>,
        tls_config: Arc<rustls::ServerConfig>,
    ) -> std::io::Result<Token> {
        let mut listener = TcpListener::bind(addr)?;
        let token = self.alloc_token();
        self.poll.registry().register(&mut listener, token, Interest::READABLE)?;
        self.slots.insert(token, Slot::TlsListener { listener, protocol, tls_config });
        info!(?addr, "listening (tls)");
        Ok(token)
    }

    /// Schedules a one-shot timer (§4.1 `delay`).
    pub fn delay(&mut self, after: Duration) -> TimerId {
        self.timers.schedule(after, Recurrence::Once)
    }

    /// Schedules a persistent timer (§4.1 `repeat`, §4.2).
    pub fn repeat(&mut self, every: Duration) -> TimerId {
        self.timers.schedule(every, Recurrence::Persistent(every))
    }

    pub fn off_timer(&mut self, id: TimerId) {
        self.timers.cancel(id);
    }

    /// Queues a microtask that runs before the next I/O poll, in FIFO order
    /// (§4.1 `queue`).
    pub fn queue(&mut self, task: impl FnOnce() + Send + 'static) {
        self.microtasks.push_back(Box::new(task));
    }

    /// Queues a task for the *start of the next tick*, after the current
    /// tick's microtasks have all run (§4.1 `defer`).
    pub fn defer(&mut self, task: impl FnOnce() + Send + 'static) {
        self.deferred.push_back(Box::new(task));
    }

    pub fn suspend(&mut self) -> SuspensionId {
        self.suspensions.register()
    }

    /// Resumes a suspended task by queueing its continuation as a
    /// microtask; ignored if the suspension already resolved.
    pub fn resume(&mut self, id: SuspensionId, on_resume: impl FnOnce() + Send + 'static) {
        if !self.suspensions.is_live(id) {
            return;
        }
        self.suspensions.resolve(id);
        self.queue(on_resume);
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn send(&mut self, token: Token, message: P::Message) -> bool {
        match self.slots.get_mut(&token) {
            Some(Slot::Connection(conn)) => conn.send(message),
            _ => false,
        }
    }

    pub fn close(&mut self, token: Token) {
        if let Some(Slot::Connection(mut conn)) = self.slots.remove(&token) {
            conn.close();
            conn.deregister(&self.poll);
        }
    }

    /// Stops accepting new connections on a listener without touching any
    /// already-established connection (graceful stop, §4.8).
    pub fn stop_listening(&mut self, token: Token) {
        match self.slots.remove(&token) {
            Some(Slot::TcpListener { mut listener, .. }) => {
                let _ = self.poll.registry().deregister(&mut listener);
            }
            Some(Slot::UnixListener { mut listener, .. }) => {
                let _ = self.poll.registry().deregister(&mut listener);
            }
            Some(Slot::TlsListener { mut listener, .. }) => {
                let _ = self.poll.registry().deregister(&mut listener);
            }
            other => {
                if let Some(slot) = other {
                    self.slots.insert(token, slot);
                }
            }
        }
    }

    /// Number of live connections, excluding listeners (used to detect
    /// "drained" for graceful stop).
    pub fn connection_count(&self) -> usize {
        self.slots.values().filter(|s| matches!(s, Slot::Connection(_))).count()
    }

    /// Per-connection book-keeping for a status/connection dump (§6
    /// "Persisted state").
    pub fn connections(&self) -> Vec<(Token, ConnectionSnapshot)> {
        self.slots
            .iter()
            .filter_map(|(token, slot)| match slot {
                Slot::Connection(conn) => Some((*token, conn.snapshot())),
                _ => None,
            })
            .collect()
    }

    /// Runs one full tick: drains microtasks, computes a poll timeout from
    /// the nearest timer deadline, polls I/O, then dispatches everything
    /// that became ready (§4.1 "Tick algorithm").
    pub fn tick<F>(&mut self, mut on_event: F) -> Tick
    where
        F: FnMut(&mut Self, LoopEvent<P::Message>),
    {
        for task in self.deferred.drain(..) {
            self.microtasks.push_back(task);
        }
        while let Some(task) = self.microtasks.pop_front() {
            task();
        }

        for sig in self.signals.take_fired() {
            on_event(self, LoopEvent::Signal(sig));
        }

        let now = Instant::now();
        let timeout = if !self.deferred.is_empty() {
            // Deferred work is waiting for the next tick; don't block.
            Some(std::time::Duration::ZERO)
        } else {
            match self.timers.next_deadline(now) {
                Some(d) => Some(d.into()),
                None => Some(std::time::Duration::from_millis(100)),
            }
        };

        if let Err(e) = self.poll.poll(&mut self.events, timeout) {
            if e.kind() != std::io::ErrorKind::Interrupted {
                error!("poll error: {e}");
                return Tick::Fatal(e.to_string());
            }
        }

        let ready_tokens: Vec<Token> = self.events.iter().map(|e| e.token()).collect();
        for token in ready_tokens {
            self.dispatch_io(token, &mut on_event);
        }

        for id in self.timers.take_due(Instant::now()) {
            on_event(self, LoopEvent::TimerFired(id));
        }

        if !self.running {
            return Tick::StopRequested;
        }
        Tick::Normal
    }

    /// Runs ticks until [`stop`](Self::stop) is called or a tick reports a
    /// fatal poll error (§4.1 `run`/`stop`).
    pub fn run<F>(&mut self, mut on_event: F) -> Result<(), String>
    where
        F: FnMut(&mut Self, LoopEvent<P::Message>),
    {
        loop {
            match self.tick(&mut on_event) {
                Tick::Normal => continue,
                Tick::StopRequested => return Ok(()),
                Tick::Fatal(reason) => return Err(reason),
            }
        }
    }

    fn dispatch_io<F>(&mut self, token: Token, on_event: &mut F)
    where
        F: FnMut(&mut Self, LoopEvent<P::Message>),
    {
        let Some(slot) = self.slots.get(&token) else { return };
        if matches!(slot, Slot::Connection(_)) {
            self.dispatch_connection(token, on_event);
            return;
        }
        let Some(mut slot) = self.slots.remove(&token) else { return };
        match &mut slot {
            Slot::TcpListener { listener, protocol } => {
                let protocol = Arc::clone(protocol);
                loop {
                    match listener.accept() {
                        Ok((mut stream, peer_addr)) => {
                            let conn_token = self.alloc_token();
                            if let Err(e) = self.poll.registry().register(
                                &mut stream,
                                conn_token,
                                Interest::READABLE.add(Interest::WRITABLE),
                            ) {
                                warn!("failed to register accepted stream: {e}");
                                continue;
                            }
                            let id = self.next_conn_id;
                            self.next_conn_id += 1;
                            let conn = Connection::new(id, stream, Some(peer_addr), Arc::clone(&protocol));
                            self.slots.insert(conn_token, Slot::Connection(AnyConn::Tcp(conn)));
                            on_event(
                                self,
                                LoopEvent::Accept {
                                    listener: token,
                                    conn: conn_token,
                                    peer_addr: PeerAddr::Tcp(peer_addr),
                                },
                            );
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            debug!("accept error: {e}");
                            break;
                        }
                    }
                }
            }
            Slot::UnixListener { listener, protocol } => {
                let protocol = Arc::clone(protocol);
                loop {
                    match listener.accept() {
                        Ok((mut stream, _)) => {
                            let conn_token = self.alloc_token();
                            if let Err(e) = self.poll.registry().register(
                                &mut stream,
                                conn_token,
                                Interest::READABLE.add(Interest::WRITABLE),
                            ) {
                                warn!("failed to register accepted unix stream: {e}");
                                continue;
                            }
                            let id = self.next_conn_id;
                            self.next_conn_id += 1;
                            let conn = Connection::new(id, stream, None, Arc::clone(&protocol));
                            self.slots.insert(conn_token, Slot::Connection(AnyConn::Unix(conn)));
                            on_event(
                                self,
                                LoopEvent::Accept {
                                    listener: token,
                                    conn: conn_token,
                                    peer_addr: PeerAddr::Unix,
                                },
                            );
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            debug!("unix accept error: {e}");
                            break;
                        }
                    }
                }
            }
            Slot::TlsListener { listener, protocol, tls_config } => {
                let protocol = Arc::clone(protocol);
                let tls_config = Arc::clone(tls_config);
                loop {
                    match listener.accept() {
                        Ok((mut stream, peer_addr)) => {
                            let conn_token = self.alloc_token();
                            if let Err(e) = self.poll.registry().register(
                                &mut stream,
                                conn_token,
                                Interest::READABLE.add(Interest::WRITABLE),
                            ) {
                                warn!("failed to register accepted tls stream: {e}");
                                continue;
                            }
                            let session = match crate::tls::new_server_session(Arc::clone(&tls_config)) {
                                Ok(session) => session,
                                Err(e) => {
                                    warn!("tls session setup failed: {e}");
                                    continue;
                                }
                            };
                            let tls_stream = TlsStream::new(stream, session);
                            let id = self.next_conn_id;
                            self.next_conn_id += 1;
                            let conn =
                                Connection::new(id, tls_stream, Some(peer_addr), Arc::clone(&protocol));
                            self.slots.insert(conn_token, Slot::Connection(AnyConn::Tls(conn)));
                            on_event(
                                self,
                                LoopEvent::Accept {
                                    listener: token,
                                    conn: conn_token,
                                    peer_addr: PeerAddr::Tcp(peer_addr),
                                },
                            );
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            debug!("tls accept error: {e}");
                            break;
                        }
                    }
                }
            }
            Slot::Connection(_) => unreachable!("connection slots are handled above"),
        }
        self.slots.insert(token, slot);
    }

    fn dispatch_connection<F>(&mut self, token: Token, on_event: &mut F)
    where
        F: FnMut(&mut Self, LoopEvent<P::Message>),
    {
        let Some(Slot::Connection(conn)) = self.slots.get_mut(&token) else { return };

        let mut messages = Vec::new();
        let mut protocol_errors = Vec::new();
        let mut peer_closed = false;
        conn.on_readable(|event| match event {
            ConnEvent::Message(m) => messages.push(m),
            ConnEvent::ProtocolError(reason) => protocol_errors.push(reason),
            ConnEvent::PeerClosed => peer_closed = true,
            ConnEvent::BufferFull | ConnEvent::BufferDrain => {}
        });
        let drain_edge = conn.on_writable();

        for message in messages {
            on_event(self, LoopEvent::Message { conn: token, message });
        }
        for reason in protocol_errors {
            warn!(conn = token.0, "closing after protocol error: {reason}");
        }
        match drain_edge {
            crate::buffer::Edge::Full => on_event(self, LoopEvent::BufferFull { conn: token }),
            crate::buffer::Edge::Drained => on_event(self, LoopEvent::BufferDrain { conn: token }),
            crate::buffer::Edge::None => {}
        }

        let should_close = peer_closed
            || matches!(
                self.slots.get(&token),
                Some(Slot::Connection(c)) if c.status() == crate::conn::ConnStatus::Closing
            );
        if should_close {
            self.close(token);
            on_event(self, LoopEvent::Closed { conn: token });
        }
    }
}
