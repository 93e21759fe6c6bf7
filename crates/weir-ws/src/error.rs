#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("invalid WebSocket handshake request")]
    BadHandshake,
    #[error("server handshake response failed Sec-WebSocket-Accept verification")]
    AcceptMismatch,
    #[error("malformed WebSocket frame")]
    MalformedFrame,
    #[error("client frame was not masked")]
    UnmaskedClientFrame,
    #[error("server frame must not be masked")]
    MaskedServerFrame,
    #[error("continuation frame without a start frame")]
    UnexpectedContinuation,
    #[error("fragmented message exceeded the configured maximum package size")]
    FragmentTooLarge,
}
