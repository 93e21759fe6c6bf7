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

/// Handshake progress, per §3's WebSocket connection context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeStep {
    #[default]
    None,
    Complete,
}

/// Largest handshake request header block we'll buffer before giving up.
const MAX_HANDSHAKE_BYTES: usize = 16 * 1024;

#[derive(Debug, Default)]
pub struct WsServerState {
    pub handshake: HandshakeStep,
    pub binary_type: BinaryType,
    fragment_opcode: Option<Opcode>,
    fragment_buf: Vec<u8>,
    /// Extra headers a user's `on_ws_connect` callback queued to be echoed
    /// back in the `101` response (mirrors the source's ability to attach
    /// response headers before the handshake completes).
    pub extra_response_headers: String,
}

/// Server-side WebSocket protocol: handshake (§4.6) then RFC 6455 framing.
///
/// `auto_pong` controls whether an unhandled `Ping` is echoed as `Pong`
/// automatically (true) or surfaced to the user as a message (false) —
/// matches "echo as pong unless user handler present".
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketServer {
    pub auto_pong: bool,
}

impl WebSocketServer {
    pub fn new() -> Self {
        Self { auto_pong: true }
    }
}

impl StatefulProtocol for WebSocketServer {
    type Message = WsMessage;
    type ConnState = WsServerState;

    fn feed(
        &self,
        buf: &[u8],
        state: &mut WsServerState,
        max_package_size: usize,
    ) -> Outcome<WsMessage> {
        if state.handshake != HandshakeStep::Complete {
            return feed_handshake(buf, state);
        }
        feed_frame(buf, state, max_package_size, self.auto_pong)
    }

    fn encode(&self, msg: WsMessage, state: &mut WsServerState) -> Vec<u8> {
        let (opcode, payload) = encode_message(msg, state.binary_type);
        frame::compose(opcode, &payload, None)
    }
}

fn feed_handshake(buf: &[u8], state: &mut WsServerState) -> Outcome<WsMessage> {
    let Some(header_end) = find_double_crlf(buf) else {
        if buf.len() > MAX_HANDSHAKE_BYTES {
            return Outcome::Consumed {
                len: buf.len().min(MAX_HANDSHAKE_BYTES),
                message: None,
                raw_reply: Some(handshake::build_malformed_handshake_page()),
                close_after: true,
            };
        }
        return Outcome::NeedMore;
    };

    let head = String::from_utf8_lossy(&buf[..header_end]);
    match handshake::parse_client_key(&head) {
        Some(key) => {
            let response =
                handshake::build_switching_protocols(key, &state.extra_response_headers);
            state.handshake = HandshakeStep::Complete;
            Outcome::Consumed {
                len: header_end,
                message: Some(WsMessage::Open),
                raw_reply: Some(response),
                close_after: false,
            }
        }
        None => {
            warn!(err = %WsError::BadHandshake, "websocket handshake rejected");
            Outcome::Consumed {
                len: header_end,
                message: None,
                raw_reply: Some(handshake::build_malformed_handshake_page()),
                close_after: true,
            }
        }
    }
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    memchr::memmem::find(buf, b"\r\n\r\n").map(|pos| pos + 4)
}

fn feed_frame(
    buf: &[u8],
    state: &mut WsServerState,
    max_package_size: usize,
    auto_pong: bool,
) -> Outcome<WsMessage> {
    let header = match frame::parse_header(buf) {
        Ok(h) => h,
        Err(ParseError::NeedMore) => return Outcome::NeedMore,
        Err(ParseError::Invalid) => return fatal(WsError::MalformedFrame),
        Err(ParseError::NotMasked) => return fatal(WsError::UnmaskedClientFrame),
    };
    if !header.masked {
        return fatal(WsError::UnmaskedClientFrame);
    }
    let total_len = header.total_len();
    if buf.len() < total_len {
        return Outcome::NeedMore;
    }

    let mut payload = buf[header.payload_offset..total_len].to_vec();
    frame::apply_mask(&mut payload, header.mask_key);

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
                raw_reply: Some(frame::compose(Opcode::Close, &payload, None)),
                close_after: true,
            }
        }
        Opcode::Ping => Outcome::Consumed {
            len: total_len,
            message: if auto_pong { None } else { Some(WsMessage::Ping(payload.clone())) },
            raw_reply: auto_pong.then(|| frame::compose(Opcode::Pong, &payload, None)),
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
                let message = decode_data(header.opcode, payload);
                Outcome::Consumed { len: total_len, message: Some(message), raw_reply: None, close_after: false }
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
                let message = decode_data(opcode, assembled);
                Outcome::Consumed { len: total_len, message: Some(message), raw_reply: None, close_after: false }
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

#[cfg(test)]
mod tests {
    use super::*;

    fn client_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
        frame::compose(opcode, payload, Some([0x11, 0x22, 0x33, 0x44]))
    }

    #[test]
    fn handshake_then_echo() {
        let proto = WebSocketServer::new();
        let mut state = WsServerState::default();
        let req = b"GET /ws HTTP/1.1\r\nHost: x\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";
        match proto.feed(req, &mut state, 1 << 20) {
            Outcome::Consumed { message: Some(WsMessage::Open), raw_reply: Some(resp), .. } => {
                let resp = String::from_utf8(resp).unwrap();
                assert!(resp.contains("101 Switching Protocols"));
                assert!(resp.contains("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(state.handshake, HandshakeStep::Complete);
    }

    #[test]
    fn fragmented_text_message_reassembles() {
        let proto = WebSocketServer::new();
        let mut state = WsServerState { handshake: HandshakeStep::Complete, ..Default::default() };

        let first = frame_with_fin(false, Opcode::Text, b"He");
        let second = frame_with_fin(true, Opcode::Continuation, b"llo");

        match proto.feed(&first, &mut state, 1024) {
            Outcome::Consumed { message: None, len, .. } => assert_eq!(len, first.len()),
            other => panic!("unexpected {other:?}"),
        }
        match proto.feed(&second, &mut state, 1024) {
            Outcome::Consumed { message: Some(WsMessage::Text(s)), .. } => assert_eq!(s, "Hello"),
            other => panic!("unexpected {other:?}"),
        }
    }

    fn frame_with_fin(fin: bool, opcode: Opcode, payload: &[u8]) -> Vec<u8> {
        let mut frame = client_frame(opcode, payload);
        if !fin {
            frame[0] &= 0x7F;
        }
        frame
    }

    #[test]
    fn unmasked_client_frame_is_rejected() {
        let proto = WebSocketServer::new();
        let mut state = WsServerState { handshake: HandshakeStep::Complete, ..Default::default() };
        let frame = frame::compose(Opcode::Text, b"hi", None);
        match proto.feed(&frame, &mut state, 1024) {
            Outcome::Fatal(_) => {}
            other => panic!("expected Fatal, got {other:?}"),
        }
    }

    #[test]
    fn ping_is_echoed_as_pong_by_default() {
        let proto = WebSocketServer::new();
        let mut state = WsServerState { handshake: HandshakeStep::Complete, ..Default::default() };
        let frame = client_frame(Opcode::Ping, b"abc");
        match proto.feed(&frame, &mut state, 1024) {
            Outcome::Consumed { message: None, raw_reply: Some(reply), .. } => {
                let header = frame::parse_header(&reply).unwrap();
                assert_eq!(header.opcode, Opcode::Pong);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
