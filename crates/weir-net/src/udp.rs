//! UDP is simpler than TCP (§4.3 "UDP is simpler"): no send/receive
//! buffers, no partial frames, no backpressure. Each datagram is fed to
//! `protocol.feed` independently and any reply is written back to the
//! sender's address in one shot.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use mio::net::UdpSocket;
use mio::{Interest, Token};
use tracing::{debug, warn};
use weir_protocol::{Outcome, StatefulProtocol};

/// Maximum UDP payload accepted per datagram; larger reads are truncated by
/// the kernel anyway for a single `recv_from`.
const DATAGRAM_BUF_SIZE: usize = 64 * 1024;

/// A bound UDP socket paired with one protocol. Unlike TCP there is no
/// per-peer `ConnState` carried across datagrams by default: each datagram
/// gets a fresh, default-initialized scratch state, since UDP has no
/// connection to hang state off.
pub struct UdpEndpoint<P: StatefulProtocol> {
    socket: UdpSocket,
    protocol: Arc<P>,
    max_package_size: usize,
}

pub enum UdpEvent<M> {
    Message { peer: SocketAddr, message: M },
    ProtocolError { peer: SocketAddr, reason: String },
}

impl<P: StatefulProtocol> UdpEndpoint<P> {
    pub fn bind(addr: SocketAddr, protocol: Arc<P>) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        Ok(Self { socket, protocol, max_package_size: crate::conn::DEFAULT_MAX_PACKAGE_SIZE })
    }

    pub fn register(&mut self, poll: &mio::Poll, token: Token) -> io::Result<()> {
        poll.registry().register(&mut self.socket, token, Interest::READABLE)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Drains every datagram currently queued on the socket, decoding each
    /// independently and replying in place when the protocol produces a
    /// raw reply or an encoded message for the same peer.
    pub fn on_readable<F: FnMut(UdpEvent<P::Message>)>(&mut self, mut on_event: F) {
        let mut buf = [0u8; DATAGRAM_BUF_SIZE];
        loop {
            let (n, peer) = match self.socket.recv_from(&mut buf) {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("udp recv error: {e}");
                    break;
                }
            };
            let mut state = P::ConnState::default();
            match self.protocol.feed(&buf[..n], &mut state, self.max_package_size) {
                Outcome::NeedMore => {
                    // A single datagram that the protocol can't parse in one
                    // shot can never be completed (there is no buffering);
                    // drop it silently.
                }
                Outcome::Fatal(reason) => on_event(UdpEvent::ProtocolError { peer, reason }),
                Outcome::Consumed { message, raw_reply, .. } => {
                    if let Some(reply) = raw_reply {
                        self.send_to(&reply, peer);
                    }
                    if let Some(message) = message {
                        on_event(UdpEvent::Message { peer, message });
                    }
                }
            }
        }
    }

    /// Encodes `msg` and sends it to `peer` in one datagram.
    pub fn send(&mut self, msg: P::Message, peer: SocketAddr) -> bool {
        let mut state = P::ConnState::default();
        let bytes = self.protocol.encode(msg, &mut state);
        self.send_to(&bytes, peer)
    }

    fn send_to(&mut self, data: &[u8], peer: SocketAddr) -> bool {
        match self.socket.send_to(data, peer) {
            Ok(_) => true,
            Err(e) => {
                warn!(?peer, "udp send error: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weir_protocol::TextProtocol;

    #[test]
    fn binds_and_reports_local_addr() {
        let protocol = Arc::new(TextProtocol);
        let endpoint =
            UdpEndpoint::bind("127.0.0.1:0".parse().unwrap(), protocol).expect("bind should succeed");
        assert!(endpoint.local_addr().unwrap().port() > 0);
    }
}
