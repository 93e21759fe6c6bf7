//! Per-worker main loop (§4.1, §4.8 "Child signal handling"): binds the
//! listener's socket, runs the event loop, and dispatches callbacks until a
//! stop signal or a reload request ends the process.

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};
use weir_net::{EventLoop, LoopEvent, Signal};
use weir_protocol::StatefulProtocol;
use weir_supervisor::{ConnectionRow, ProcessStats, append_connection_row, append_process_row, drop_privileges};

use crate::listener::{ListenerSpec, SocketSpec, Transport};

/// Runs one worker for `spec`'s `slot`-th copy. Returns the process exit
/// code (0 on a clean stop, nonzero on a fatal event-loop error).
pub fn run<P: StatefulProtocol>(spec: &ListenerSpec<P>, slot: usize, statusfile: &Path) -> i32 {
    if spec.transport == Transport::Udp {
        return run_udp(spec, slot, statusfile);
    }

    drop_privileges(spec.user.as_deref(), spec.group.as_deref());

    let mut evloop = match EventLoop::<P>::new() {
        Ok(evloop) => evloop,
        Err(e) => {
            error!("worker {} slot {slot}: failed to create event loop: {e}", spec.name);
            return 1;
        }
    };

    let listener_token = match bind(&mut evloop, spec) {
        Ok(token) => token,
        Err(e) => {
            error!("worker {} slot {slot}: bind failed: {e}", spec.name);
            return 1;
        }
    };

    if let Some(on_start) = &spec.callbacks.on_start {
        on_start();
    }
    info!(listener = spec.name, slot, "worker started");

    let mut draining = false;
    let result =
        evloop.run(|evloop, event| dispatch(evloop, spec, event, listener_token, statusfile, &mut draining));

    let exit_code = match result {
        Ok(()) => 0,
        Err(reason) => {
            error!("worker {} slot {slot} stopped: {reason}", spec.name);
            1
        }
    };

    if let Some(on_stop) = &spec.callbacks.on_stop {
        on_stop();
    }
    if let Some(on_exit) = &spec.callbacks.on_exit {
        on_exit(exit_code);
    }
    exit_code
}

fn bind<P: StatefulProtocol>(
    evloop: &mut EventLoop<P>,
    spec: &ListenerSpec<P>,
) -> std::io::Result<weir_net::Token> {
    match (&spec.address, spec.transport) {
        (SocketSpec::Inet(addr), Transport::Tcp) => evloop.listen_tcp(*addr, Arc::clone(&spec.protocol)),
        (SocketSpec::Inet(addr), Transport::Ssl) => {
            let tls = spec.tls.as_ref().expect("ConfigError::MissingTlsConfig already validated at build()");
            let config = weir_net::tls::build_server_config(&tls.cert_path, &tls.key_path)
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            evloop.listen_tls(*addr, Arc::clone(&spec.protocol), config)
        }
        (SocketSpec::Unix(path), Transport::Unix) => {
            let _ = std::fs::remove_file(path);
            evloop.listen_unix(path, Arc::clone(&spec.protocol))
        }
        (SocketSpec::Inet(_), Transport::Udp) => {
            Err(std::io::Error::other("Udp listeners are served by weir::worker::run_udp, not run"))
        }
        (addr, transport) => {
            Err(std::io::Error::other(format!("address {addr:?} is incompatible with transport {transport:?}")))
        }
    }
}

/// Runs a UDP listener (§4.3 "UDP is simpler"): no backpressure, no
/// persistent per-peer state, so this bypasses [`EventLoop`] entirely and
/// polls the bare socket itself. Only the lifecycle callbacks
/// (`onStart`/`onStop`/`onReload`/`onExit`) apply — `onMessage` has no
/// connection handle to hang a reply off, since the protocol's own
/// `raw_reply` already answers each datagram in place.
fn run_udp<P: StatefulProtocol>(spec: &ListenerSpec<P>, slot: usize, statusfile: &Path) -> i32 {
    drop_privileges(spec.user.as_deref(), spec.group.as_deref());

    let addr = match &spec.address {
        SocketSpec::Inet(addr) => *addr,
        SocketSpec::Unix(_) => {
            error!("worker {} slot {slot}: udp requires an inet address", spec.name);
            return 1;
        }
    };

    let mut endpoint = match weir_net::udp::UdpEndpoint::bind(addr, Arc::clone(&spec.protocol)) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            error!("worker {} slot {slot}: udp bind failed: {e}", spec.name);
            return 1;
        }
    };

    let mut poll = match mio::Poll::new() {
        Ok(poll) => poll,
        Err(e) => {
            error!("worker {} slot {slot}: failed to create poller: {e}", spec.name);
            return 1;
        }
    };
    const UDP_TOKEN: mio::Token = mio::Token(0);
    if let Err(e) = endpoint.register(&poll, UDP_TOKEN) {
        error!("worker {} slot {slot}: failed to register udp socket: {e}", spec.name);
        return 1;
    }

    let signals = weir_net::SignalFlags::install();

    if let Some(on_start) = &spec.callbacks.on_start {
        on_start();
    }
    info!(listener = spec.name, slot, "udp worker started");

    let mut events = mio::Events::with_capacity(128);
    let mut datagrams_seen: u64 = 0;
    let exit_code = 'outer: loop {
        if let Err(e) = poll.poll(&mut events, Some(std::time::Duration::from_millis(200))) {
            if e.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            error!("worker {} slot {slot}: poll error: {e}", spec.name);
            break 0;
        }

        for event in &events {
            if event.token() == UDP_TOKEN && event.is_readable() {
                endpoint.on_readable(|udp_event| match udp_event {
                    weir_net::UdpEvent::Message { .. } => {
                        datagrams_seen += 1;
                    }
                    weir_net::UdpEvent::ProtocolError { peer, reason } => {
                        warn!(listener = spec.name, ?peer, "udp protocol error: {reason}");
                    }
                });
            }
        }

        for signal in signals.take_fired() {
            match signal {
                weir_net::Signal::Int | weir_net::Signal::Term | weir_net::Signal::Quit => {
                    info!(listener = spec.name, "udp worker stopping");
                    break 'outer 0;
                }
                weir_net::Signal::Usr1 | weir_net::Signal::Usr2 => {
                    if let Some(on_reload) = &spec.callbacks.on_reload {
                        on_reload();
                    }
                    break 'outer 0;
                }
                weir_net::Signal::Iot => {
                    let row = ProcessStats {
                        pid: std::process::id() as libc::pid_t,
                        memory_rss_kb: resident_memory_kb(),
                        listen: listen_string(spec),
                        server_name: spec.name.clone(),
                        connections: 0,
                        send_fail: 0,
                        timers: 0,
                        total_request: datagrams_seen,
                        qps: 0,
                        status: "running".to_string(),
                    };
                    if let Err(e) = append_process_row(statusfile, &row) {
                        warn!(listener = spec.name, "failed to append status row: {e}");
                    }
                }
                weir_net::Signal::Io | weir_net::Signal::Hup => {}
            }
        }
    };

    if let Some(on_stop) = &spec.callbacks.on_stop {
        on_stop();
    }
    if let Some(on_exit) = &spec.callbacks.on_exit {
        on_exit(exit_code);
    }
    exit_code
}

fn dispatch<P: StatefulProtocol>(
    evloop: &mut EventLoop<P>,
    spec: &ListenerSpec<P>,
    event: LoopEvent<P::Message>,
    listener_token: weir_net::Token,
    statusfile: &Path,
    draining: &mut bool,
) {
    match event {
        LoopEvent::Accept { conn, .. } => {
            if let Some(on_connect) = &spec.callbacks.on_connect {
                on_connect(evloop, conn);
            }
        }
        LoopEvent::Message { conn, message } => {
            if let Some(on_message) = &spec.callbacks.on_message {
                on_message(evloop, conn, message);
            }
        }
        LoopEvent::BufferFull { conn } => {
            if let Some(cb) = &spec.callbacks.on_buffer_full {
                cb(evloop, conn);
            }
        }
        LoopEvent::BufferDrain { conn } => {
            if let Some(cb) = &spec.callbacks.on_buffer_drain {
                cb(evloop, conn);
            }
        }
        LoopEvent::Closed { conn } => {
            if let Some(on_close) = &spec.callbacks.on_close {
                on_close(evloop, conn);
            }
            if *draining && evloop.connection_count() == 0 {
                evloop.stop();
            }
        }
        LoopEvent::Signal(Signal::Int) | LoopEvent::Signal(Signal::Term) => {
            info!(listener = spec.name, "immediate stop");
            evloop.stop();
        }
        LoopEvent::Signal(Signal::Quit) => {
            info!(listener = spec.name, "graceful stop: draining connections");
            evloop.stop_listening(listener_token);
            *draining = true;
            if evloop.connection_count() == 0 {
                evloop.stop();
            }
        }
        LoopEvent::Signal(Signal::Usr1) => {
            if let Some(on_reload) = &spec.callbacks.on_reload {
                on_reload();
            }
            info!(listener = spec.name, "reload requested, exiting for respawn");
            evloop.stop();
        }
        LoopEvent::Signal(Signal::Usr2) => {
            if let Some(on_reload) = &spec.callbacks.on_reload {
                on_reload();
            }
            evloop.stop();
        }
        LoopEvent::Signal(Signal::Iot) => {
            let row = process_row(spec, evloop);
            if let Err(e) = append_process_row(statusfile, &row) {
                warn!(listener = spec.name, "failed to append status row: {e}");
            }
        }
        LoopEvent::Signal(Signal::Io) => {
            for row in connection_rows(spec, evloop) {
                if let Err(e) = append_connection_row(statusfile, &row) {
                    warn!(listener = spec.name, "failed to append connection row: {e}");
                    break;
                }
            }
        }
        LoopEvent::Signal(Signal::Hup) => {
            // Only the master acts on SIGHUP (§4.8); a worker never
            // receives it directly.
        }
        LoopEvent::TimerFired(_) => {}
    }
}

fn listen_string<P: StatefulProtocol>(spec: &ListenerSpec<P>) -> String {
    let scheme = match spec.transport {
        Transport::Tcp => "tcp",
        Transport::Udp => "udp",
        Transport::Unix => "unix",
        Transport::Ssl => "tls",
    };
    match &spec.address {
        SocketSpec::Inet(addr) => format!("{scheme}://{addr}"),
        SocketSpec::Unix(path) => format!("{scheme}://{}", path.display()),
    }
}

fn process_row<P: StatefulProtocol>(spec: &ListenerSpec<P>, evloop: &EventLoop<P>) -> ProcessStats {
    let send_fail: u64 = evloop.connections().iter().map(|(_, c)| c.stats.send_fail).sum();
    ProcessStats {
        pid: std::process::id() as libc::pid_t,
        memory_rss_kb: resident_memory_kb(),
        listen: listen_string(spec),
        server_name: spec.name.clone(),
        connections: evloop.connection_count() as u64,
        send_fail,
        timers: 0,
        total_request: 0,
        qps: 0,
        status: "running".to_string(),
    }
}

fn connection_rows<P: StatefulProtocol>(spec: &ListenerSpec<P>, evloop: &EventLoop<P>) -> Vec<ConnectionRow> {
    let pid = std::process::id() as libc::pid_t;
    evloop
        .connections()
        .into_iter()
        .map(|(token, snap)| {
            let (ipv4, ipv6) = match snap.peer_addr {
                Some(std::net::SocketAddr::V4(_)) => (true, false),
                Some(std::net::SocketAddr::V6(_)) => (false, true),
                None => (false, false),
            };
            ConnectionRow {
                pid,
                server: spec.name.clone(),
                cid: token.0 as u64,
                transport: snap.transport.to_string(),
                protocol: std::any::type_name::<P>().to_string(),
                ipv4,
                ipv6,
                recv_q: snap.recv_q,
                send_q: snap.send_q,
                bytes_read: snap.stats.bytes_read,
                bytes_written: snap.stats.bytes_written,
                state: format!("{:?}", snap.status),
                local_addr: listen_string(spec),
                remote_addr: snap.peer_addr.map_or_else(|| "-".to_string(), |a| a.to_string()),
            }
        })
        .collect()
}

/// Resident set size from `/proc/self/status` (Linux only; other
/// platforms report `0`, matching §7's "peripheral" treatment of
/// statistics detail).
fn resident_memory_kb() -> u64 {
    let Ok(contents) = std::fs::read_to_string("/proc/self/status") else {
        return 0;
    };
    contents
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.trim().split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
        .unwrap_or(0)
}
