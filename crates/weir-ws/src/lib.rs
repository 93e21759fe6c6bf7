//! RFC 6455 WebSocket framing, as a server-side and client-side
//! [`weir_protocol::StatefulProtocol`] (§4.6).

mod client;
mod error;
mod frame;
mod handshake;
mod message;
mod server;

pub use client::{build_ping_frame, ClientHandshakeStep, WebSocketClient, WsClientState};
pub use error::WsError;
pub use frame::{apply_mask, compose, parse_header, FrameHeader, Opcode, ParseError};
pub use handshake::{
    build_client_request, build_malformed_handshake_page, build_switching_protocols,
    compute_accept, generate_client_key, parse_client_key, verify_server_accept,
};
pub use message::{BinaryType, WsMessage};
pub use server::{HandshakeStep, WebSocketServer, WsServerState};
