//! Non-blocking I/O reactor (C1), connection wrapper (C3), timer wheel
//! (C2), and UDP/TLS transports shared by every worker process (§4.1-§4.3,
//! §4.6 C12).

pub mod buffer;
pub mod conn;
pub mod reactor;
pub mod timer;
pub mod tls;
pub mod udp;

pub use buffer::{Edge, InBuffer, OutBuffer};
pub use conn::{ConnEvent, ConnStats, ConnStatus, Connection, DEFAULT_MAX_PACKAGE_SIZE, DEFAULT_MAX_SEND_BUFFER_SIZE};
pub use mio::Token;
pub use reactor::{
    ConnectionSnapshot, EventLoop, LoopEvent, PeerAddr, Signal, SignalFlags, SuspensionId, Suspensions, Tick,
};
pub use timer::TimerId;
pub use tls::{TlsError, TlsStream};
pub use udp::{UdpEndpoint, UdpEvent};
