use std::io::{self, Read, Write};
use std::net::SocketAddr;

use tracing::{debug, warn};
use weir_protocol::{Outcome, StatefulProtocol};

use crate::buffer::{Edge, InBuffer, OutBuffer};

/// Default limits (§4.3 "Properties").
pub const DEFAULT_MAX_PACKAGE_SIZE: usize = 10 * 1024 * 1024;
pub const DEFAULT_MAX_SEND_BUFFER_SIZE: usize = 1024 * 1024;

/// A connection's lifecycle state (§3 "Connection").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    Initial,
    Connecting,
    Established,
    Closing,
    Closed,
}

/// Per-connection counters surfaced in the statistics snapshot (§3 "Ambient
/// additions").
#[derive(Debug, Default, Clone, Copy)]
pub struct ConnStats {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub send_fail: u64,
}

/// What happened as a result of feeding a connection more bytes or trying
/// to drain its outbound buffer.
pub enum ConnEvent<M> {
    Message(M),
    BufferFull,
    BufferDrain,
    /// The protocol declared the connection unusable; it has already been
    /// put into `Closing`.
    ProtocolError(String),
    PeerClosed,
}

/// Non-blocking socket wrapper generic over any `Read + Write` transport
/// (plain TCP, a TLS session, a Unix stream) and any
/// [`StatefulProtocol`] (§3 "Connection", §4.3).
pub struct Connection<S, P: StatefulProtocol> {
    pub id: u64,
    stream: S,
    pub peer_addr: Option<SocketAddr>,
    protocol: std::sync::Arc<P>,
    conn_state: P::ConnState,
    in_buf: InBuffer,
    out_buf: OutBuffer,
    pub status: ConnStatus,
    pub max_package_size: usize,
    pub stats: ConnStats,
}

impl<S, P> Connection<S, P>
where
    S: Read + Write,
    P: StatefulProtocol,
{
    pub fn new(id: u64, stream: S, peer_addr: Option<SocketAddr>, protocol: std::sync::Arc<P>) -> Self {
        Self {
            id,
            stream,
            peer_addr,
            protocol,
            conn_state: P::ConnState::default(),
            in_buf: InBuffer::default(),
            out_buf: OutBuffer::new(DEFAULT_MAX_SEND_BUFFER_SIZE),
            status: ConnStatus::Established,
            max_package_size: DEFAULT_MAX_PACKAGE_SIZE,
            stats: ConnStats::default(),
        }
    }

    pub fn context(&self) -> &P::ConnState {
        &self.conn_state
    }

    pub fn context_mut(&mut self) -> &mut P::ConnState {
        &mut self.conn_state
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.out_buf.is_empty()
    }

    /// Reads whatever is available non-blocking, then runs the
    /// protocol-decode loop over the accumulated bytes, dispatching zero or
    /// more [`ConnEvent::Message`] via `on_event` (§4.3 "Receive path").
    pub fn on_readable<F: FnMut(ConnEvent<P::Message>)>(&mut self, mut on_event: F) {
        let mut chunk = [0u8; 16 * 1024];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.status = ConnStatus::Closing;
                    on_event(ConnEvent::PeerClosed);
                    return;
                }
                Ok(n) => {
                    self.stats.bytes_read += n as u64;
                    self.in_buf.extend(&chunk[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(conn = self.id, "read error: {e}");
                    self.status = ConnStatus::Closing;
                    on_event(ConnEvent::PeerClosed);
                    return;
                }
            }
        }

        self.drain_protocol(&mut on_event);
    }

    fn drain_protocol<F: FnMut(ConnEvent<P::Message>)>(&mut self, on_event: &mut F) {
        loop {
            let outcome =
                self.protocol.feed(self.in_buf.as_slice(), &mut self.conn_state, self.max_package_size);
            match outcome {
                Outcome::NeedMore => break,
                Outcome::Fatal(reason) => {
                    warn!(conn = self.id, "protocol error: {reason}");
                    self.status = ConnStatus::Closing;
                    on_event(ConnEvent::ProtocolError(reason));
                    break;
                }
                Outcome::Consumed { len, message, raw_reply, close_after } => {
                    self.in_buf.consume(len);
                    if let Some(reply) = raw_reply {
                        self.queue_raw(&reply);
                    }
                    if let Some(message) = message {
                        on_event(ConnEvent::Message(message));
                    }
                    if close_after {
                        self.status = ConnStatus::Closing;
                        break;
                    }
                    if len == 0 {
                        // A Consumed outcome must make forward progress; treat a
                        // zero-length consume as NeedMore to avoid spinning.
                        break;
                    }
                }
            }
        }
    }

    /// Encodes `msg` via the protocol and queues/writes the result
    /// (§4.3 "Send path"). Returns `false` once the connection is past
    /// `Established`.
    pub fn send(&mut self, msg: P::Message) -> bool {
        if self.status != ConnStatus::Established {
            return false;
        }
        let bytes = self.protocol.encode(msg, &mut self.conn_state);
        self.queue_raw(&bytes)
    }

    /// Writes `data` to the connection bypassing protocol encoding
    /// (raw=true sends, and raw replies like handshake responses).
    pub fn queue_raw(&mut self, data: &[u8]) -> bool {
        if data.is_empty() {
            return true;
        }
        if self.out_buf.is_empty() {
            match self.stream.write(data) {
                Ok(n) if n == data.len() => return true,
                Ok(n) => {
                    if self.out_buf.push(&data[n..]) == Edge::Full {
                        return true;
                    }
                    return true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.out_buf.push(data);
                    return true;
                }
                Err(e) => {
                    warn!(conn = self.id, "write error: {e}");
                    self.stats.send_fail += 1;
                    self.status = ConnStatus::Closing;
                    return false;
                }
            }
        }
        self.out_buf.push(data);
        true
    }

    /// Tries to drain the outbound buffer; call on a writable readiness
    /// event. Returns the buffer-full/drain edge that fired, if any.
    pub fn on_writable(&mut self) -> Edge {
        if self.out_buf.is_empty() {
            return Edge::None;
        }
        loop {
            let pending = self.out_buf.as_slice();
            if pending.is_empty() {
                return Edge::None;
            }
            match self.stream.write(pending) {
                Ok(0) => return Edge::None,
                Ok(n) => {
                    self.stats.bytes_written += n as u64;
                    let edge = self.out_buf.consume(n);
                    if edge == Edge::Drained {
                        return Edge::Drained;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Edge::None,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(conn = self.id, "write error while draining: {e}");
                    self.status = ConnStatus::Closing;
                    return Edge::None;
                }
            }
        }
    }

    pub fn close(&mut self) {
        self.status = ConnStatus::Closed;
        let _ = self.stream.flush();
    }

    pub fn inner(&self) -> &S {
        &self.stream
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Bytes buffered but not yet parsed into a message (statusfile
    /// `recvQ` column, §6).
    pub fn recv_queue_len(&self) -> usize {
        self.in_buf.len()
    }

    /// Bytes queued for write but not yet flushed (statusfile `sendQ`
    /// column, §6).
    pub fn send_queue_len(&self) -> usize {
        self.out_buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use weir_protocol::TextProtocol;

    #[derive(Default)]
    struct MockStream {
        read_data: VecDeque<u8>,
        written: Vec<u8>,
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.read_data.is_empty() {
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            let n = buf.len().min(self.read_data.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.read_data.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn delivers_decoded_line_messages() {
        let mut stream = MockStream::default();
        stream.read_data.extend(b"hello\nworld\n".iter().copied());
        let protocol = std::sync::Arc::new(TextProtocol);
        let mut conn = Connection::new(1, stream, None, protocol);

        let mut messages = Vec::new();
        conn.on_readable(|event| {
            if let ConnEvent::Message(msg) = event {
                messages.push(msg);
            }
        });
        assert_eq!(messages, vec!["hello".to_string(), "world".to_string()]);
    }

    #[test]
    fn send_writes_immediately_when_buffer_empty() {
        let protocol = std::sync::Arc::new(TextProtocol);
        let mut conn = Connection::new(1, MockStream::default(), None, protocol);
        assert!(conn.send("hi".to_string()));
        assert_eq!(conn.inner().written, b"hi\n");
    }
}
