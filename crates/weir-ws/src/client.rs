use tracing::warn;
use weir_protocol::{Outcome, StatefulProtocol};

use crate::{
    error::WsError,
    frame::{self, Opcode, ParseError},
    handshake,
    message::{BinaryType, WsMessage},
};

fn fatal<M>(err: WsError) -> Outcome<M> {
    warn!(%err, "websocket connection rejected");
    Outcome::Fatal(err.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientHandshakeStep {
    #[default]
    AwaitingResponse,
    Complete,
}

#[derive(Debug)]
pub struct WsClientState {
    pub handshake: ClientHandshakeStep,
    pub binary_type: BinaryType,
    /// The key this client sent, needed to verify the server's `Accept`.
    pub client_key: String,
    fragment_opcode: Option<Opcode>,
    fragment_buf: Vec<u8>,
}

impl Default for WsClientState {
    fn default() -> Self {
        Self {
            handshake: ClientHandshakeStep::default(),
            binary_type: BinaryType::default(),
            client_key: handshake::generate_client_key(),
            fragment_opcode: None,
            fragment_buf: Vec::new(),
        }
    }
}

impl WsClientState {
    /// Builds a fresh state already carrying the key it expects to see
    /// echoed back in `Sec-WebSocket-Accept`, for a request built from
    /// `handshake::build_client_request(host, path, &state.client_key)`.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Outbound WebSocket client per §4.6: sends a masked upgrade request,
/// verifies the server's accept key, then exchanges masked data frames and
/// periodic ping control frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketClient;

impl WebSocketClient {
    pub fn new() -> Self {
        Self
    }
}

impl StatefulProtocol for WebSocketClient {
    type Message = WsMessage;
    type ConnState = WsClientState;

    fn feed(
        &self,
        buf: &[u8],
        state: &mut WsClientState,
        max_package_size: usize,
    ) -> Outcome<WsMessage> {
        if state.handshake != ClientHandshakeStep::Complete {
            return feed_handshake(buf, state);
        }
        feed_frame(buf, state, max_package_size)
    }

    fn encode(&self, msg: WsMessage, state: &mut WsClientState) -> Vec<u8> {
        let (opcode, payload) = encode_message(msg, state.binary_type);
        let mask_key = random_mask_key();
        frame::compose(opcode, &payload, Some(mask_key))
    }
}

fn random_mask_key() -> [u8; 4] {
    use rand::RngCore;
    let mut key = [0u8; 4];
    rand::rng().fill_bytes(&mut key);
    key
}

fn feed_handshake(buf: &[u8], state: &mut WsClientState) -> Outcome<WsMessage> {
    let Some(header_end) = memchr::memmem::find(buf, b"\r\n\r\n").map(|pos| pos + 4) else {
        return Outcome::NeedMore;
    };
    let head = String::from_utf8_lossy(&buf[..header_end]);
    if handshake::verify_server_accept(&head, &state.client_key) {
        state.handshake = ClientHandshakeStep::Complete;
        Outcome::Consumed {
            len: header_end,
            message: Some(WsMessage::Open),
            raw_reply: None,
            close_after: false,
        }
    } else {
        fatal(WsError::AcceptMismatch)
    }
}

fn feed_frame(buf: &[u8], state: &mut WsClientState, max_package_size: usize) -> Outcome<WsMessage> {
    let header = match frame::parse_header(buf) {
        Ok(h) => h,
        Err(ParseError::NeedMore) => return Outcome::NeedMore,
        Err(ParseError::Invalid) => return fatal(WsError::MalformedFrame),
        Err(ParseError::NotMasked) => unreachable!("client never checks the server mask bit"),
    };
    if header.masked {
        return fatal(WsError::MaskedServerFrame);
    }
    let total_len = header.total_len();
    if buf.len() < total_len {
        return Outcome::NeedMore;
    }
    let payload = buf[header.payload_offset..total_len].to_vec();

    match header.opcode {
        Opcode::Close => {
            let (code, reason) = if payload.len() >= 2 {
                let code = u16::from_be_bytes([payload[0], payload[1]]);
                let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
                (Some(code), reason)
            } else {
                (None, String::new())
            };
            Outcome::Consumed {
                len: total_len,
                message: Some(WsMessage::Close { code, reason }),
                raw_reply: None,
                close_after: true,
            }
        }
        Opcode::Ping => Outcome::Consumed {
            len: total_len,
            message: None,
            raw_reply: Some(frame::compose(Opcode::Pong, &payload, Some(random_mask_key()))),
            close_after: false,
        },
        Opcode::Pong => Outcome::Consumed {
            len: total_len,
            message: Some(WsMessage::Pong(payload)),
            raw_reply: None,
            close_after: false,
        },
        Opcode::Text | Opcode::Binary => {
            if header.fin {
                Outcome::Consumed {
                    len: total_len,
                    message: Some(decode_data(header.opcode, payload)),
                    raw_reply: None,
                    close_after: false,
                }
            } else {
                state.fragment_opcode = Some(header.opcode);
                state.fragment_buf = payload;
                Outcome::Consumed { len: total_len, message: None, raw_reply: None, close_after: false }
            }
        }
        Opcode::Continuation => {
            let Some(opcode) = state.fragment_opcode else {
                return fatal(WsError::UnexpectedContinuation);
            };
            state.fragment_buf.extend_from_slice(&payload);
            if state.fragment_buf.len() > max_package_size {
                return fatal(WsError::FragmentTooLarge);
            }
            if header.fin {
                let assembled = std::mem::take(&mut state.fragment_buf);
                state.fragment_opcode = None;
                Outcome::Consumed {
                    len: total_len,
                    message: Some(decode_data(opcode, assembled)),
                    raw_reply: None,
                    close_after: false,
                }
            } else {
                Outcome::Consumed { len: total_len, message: None, raw_reply: None, close_after: false }
            }
        }
    }
}

fn decode_data(opcode: Opcode, payload: Vec<u8>) -> WsMessage {
    match opcode {
        Opcode::Text => WsMessage::Text(String::from_utf8_lossy(&payload).into_owned()),
        _ => WsMessage::Binary(payload),
    }
}

fn encode_message(msg: WsMessage, binary_type: BinaryType) -> (Opcode, Vec<u8>) {
    match msg {
        WsMessage::Text(s) => (Opcode::Text, s.into_bytes()),
        WsMessage::Binary(b) => {
            let _ = binary_type;
            (Opcode::Binary, b)
        }
        WsMessage::Ping(p) => (Opcode::Ping, p),
        WsMessage::Pong(p) => (Opcode::Pong, p),
        WsMessage::Close { code, reason } => {
            let mut payload = Vec::new();
            if let Some(code) = code {
                payload.extend_from_slice(&code.to_be_bytes());
                payload.extend_from_slice(reason.as_bytes());
            }
            (Opcode::Close, payload)
        }
        WsMessage::Open => (Opcode::Binary, Vec::new()),
    }
}

/// Builds a ping frame ready to hand to the connection's outbound buffer,
/// for the client's periodic keepalive timer.
pub fn build_ping_frame() -> Vec<u8> {
    frame::compose(Opcode::Ping, &[], Some(random_mask_key()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_round_trip_with_server() {
        let client_proto = WebSocketClient::new();
        let mut state = WsClientState::new();
        let request = handshake::build_client_request("example.test", "/ws", &state.client_key);
        assert!(String::from_utf8_lossy(&request).starts_with("GET /ws"));

        let response = handshake::build_switching_protocols(&state.client_key, "");
        match client_proto.feed(&response, &mut state, 1 << 20) {
            Outcome::Consumed { message: Some(WsMessage::Open), .. } => {}
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(state.handshake, ClientHandshakeStep::Complete);
    }

    #[test]
    fn rejects_bad_accept_key() {
        let client_proto = WebSocketClient::new();
        let mut state = WsClientState::new();
        let response = handshake::build_switching_protocols("not-the-right-key", "");
        match client_proto.feed(&response, &mut state, 1024) {
            Outcome::Fatal(_) => {}
            other => panic!("expected Fatal, got {other:?}"),
        }
    }

    #[test]
    fn outgoing_text_frame_is_masked() {
        let client_proto = WebSocketClient::new();
        let mut state = WsClientState { handshake: ClientHandshakeStep::Complete, ..WsClientState::new() };
        let encoded = client_proto.encode(WsMessage::Text("hi".into()), &mut state);
        let header = frame::parse_header(&encoded).unwrap();
        assert!(header.masked);
    }

    #[test]
    fn server_frame_must_be_unmasked() {
        let client_proto = WebSocketClient::new();
        let mut state = WsClientState { handshake: ClientHandshakeStep::Complete, ..WsClientState::new() };
        let masked = frame::compose(Opcode::Text, b"x", Some([1, 2, 3, 4]));
        match client_proto.feed(&masked, &mut state, 1024) {
            Outcome::Fatal(_) => {}
            other => panic!("expected Fatal, got {other:?}"),
        }
    }
}
