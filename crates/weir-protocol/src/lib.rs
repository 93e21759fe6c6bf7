//! The pluggable framing contract (§4.4) consumed by the connection layer.
//!
//! In the source system a protocol is "a class with three static methods"
//! dispatched dynamically per connection. Per Design Note §9 this maps onto
//! a small capability trait instead: a `Listener`/`Connection` is generic
//! over one concrete `Protocol` implementation, so framing is resolved
//! statically and the per-connection scratch state the source keeps on an
//! untyped `context` object becomes `Protocol::ConnState`, a typed
//! associated type with no downcasting required.

mod frame;
mod text;

pub use frame::FrameProtocol;
pub use text::TextProtocol;

/// Result of `Protocol::input`: how many bytes make up the next frame, if
/// known yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLen {
    /// Not enough bytes buffered yet; wait for more.
    NeedMore,
    /// The buffered prefix can never be completed into a valid frame.
    Invalid,
    /// Exactly this many bytes (from the start of the buffer) make up the
    /// next complete frame.
    Ready(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame exceeded the configured maximum package size")]
    PackageTooLarge,
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("frame was not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// A pluggable application protocol.
///
/// Implementations are pure with respect to their own fields (registered
/// once on a `Listener` and shared read-only across every connection on
/// that listener); all per-connection mutable state lives in `ConnState`,
/// which the connection layer owns and hands back on every call.
pub trait Protocol: Send + Sync + 'static {
    /// A fully decoded application message.
    type Message: Send;
    /// Per-connection protocol-private scratch state (handshake flags,
    /// partial frame buffers, mask keys, ...).
    type ConnState: Default + Send;

    /// Returns the expected length of the next frame, or a sentinel saying
    /// "need more bytes" / "this can never be a valid frame".
    fn input(&self, buf: &[u8], state: &mut Self::ConnState, max_package_size: usize) -> FrameLen;

    /// Parses exactly the first `len` bytes of `buf`, where `len` is
    /// whatever `input` most recently returned as `Ready(len)`.
    fn decode(
        &self,
        buf: &[u8],
        state: &mut Self::ConnState,
    ) -> Result<Self::Message, ProtocolError>;

    /// Serializes a message to bytes ready to hand to the connection's
    /// outbound buffer.
    fn encode(&self, msg: Self::Message, state: &mut Self::ConnState) -> Vec<u8>;
}

/// Result of feeding more bytes to a [`StatefulProtocol`].
#[derive(Debug)]
pub enum Outcome<M> {
    /// Not enough bytes buffered yet.
    NeedMore,
    /// The connection must be closed; the protocol error has already been
    /// accounted for (e.g. an HTTP 400/413 queued as `raw_reply`).
    Fatal(String),
    /// Exactly `len` bytes were consumed from the front of the buffer.
    /// `message` carries a decoded application message, if any (a
    /// handshake step produces none). `raw_reply`, if present, is written
    /// to the connection verbatim and bypasses `encode` (HTTP upgrade
    /// responses, WebSocket control-frame echoes). `close_after` requests
    /// the connection be closed once `raw_reply` has drained (a malformed
    /// handshake's informational page, for instance).
    Consumed { len: usize, message: Option<M>, raw_reply: Option<Vec<u8>>, close_after: bool },
}

/// The richer framing contract actually used by the connection layer.
///
/// [`Protocol`] (Text, Frame, and user protocols) covers the common case of
/// "parse one message, nothing else happens". HTTP and WebSocket need more:
/// a handshake that writes bytes the user's handler never sees, and
/// control-frame auto-replies. `StatefulProtocol` is the superset that
/// accommodates both; every `Protocol` gets one for free via the blanket
/// implementation below, so the connection layer only needs to be generic
/// over this one trait.
pub trait StatefulProtocol: Send + Sync + 'static {
    type Message: Send;
    type ConnState: Default + Send;

    fn feed(&self, buf: &[u8], state: &mut Self::ConnState, max_package_size: usize)
    -> Outcome<Self::Message>;

    fn encode(&self, msg: Self::Message, state: &mut Self::ConnState) -> Vec<u8>;
}

impl<P: Protocol> StatefulProtocol for P {
    type Message = P::Message;
    type ConnState = P::ConnState;

    fn feed(
        &self,
        buf: &[u8],
        state: &mut Self::ConnState,
        max_package_size: usize,
    ) -> Outcome<Self::Message> {
        match Protocol::input(self, buf, state, max_package_size) {
            FrameLen::NeedMore => Outcome::NeedMore,
            FrameLen::Invalid => Outcome::Fatal("malformed frame".to_string()),
            FrameLen::Ready(len) if len > max_package_size => {
                Outcome::Fatal("package exceeded max_package_size".to_string())
            }
            FrameLen::Ready(len) => match Protocol::decode(self, &buf[..len], state) {
                Ok(message) => Outcome::Consumed {
                    len,
                    message: Some(message),
                    raw_reply: None,
                    close_after: false,
                },
                Err(e) => Outcome::Fatal(e.to_string()),
            },
        }
    }

    fn encode(&self, msg: Self::Message, state: &mut Self::ConnState) -> Vec<u8> {
        Protocol::encode(self, msg, state)
    }
}
