use crate::{FrameLen, Protocol, ProtocolError};

/// LF-terminated UTF-8 line protocol (§4.4).
#[derive(Debug, Default, Clone, Copy)]
pub struct TextProtocol;

impl Protocol for TextProtocol {
    type Message = String;
    type ConnState = ();

    fn input(&self, buf: &[u8], _state: &mut (), max_package_size: usize) -> FrameLen {
        match memchr::memchr(b'\n', buf) {
            Some(pos) => FrameLen::Ready(pos + 1),
            None if buf.len() > max_package_size => FrameLen::Invalid,
            None => FrameLen::NeedMore,
        }
    }

    fn decode(&self, buf: &[u8], _state: &mut ()) -> Result<String, ProtocolError> {
        let mut line = buf;
        if let Some(stripped) = line.strip_suffix(b"\n") {
            line = stripped;
        }
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        Ok(std::str::from_utf8(line)?.to_owned())
    }

    fn encode(&self, msg: String, _state: &mut ()) -> Vec<u8> {
        let mut out = msg.into_bytes();
        out.push(b'\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_needs_more_without_newline() {
        let p = TextProtocol;
        let mut st = ();
        assert_eq!(p.input(b"hello", &mut st, 1024), FrameLen::NeedMore);
    }

    #[test]
    fn input_reports_line_length_including_newline() {
        let p = TextProtocol;
        let mut st = ();
        assert_eq!(p.input(b"hello\nworld", &mut st, 1024), FrameLen::Ready(6));
    }

    #[test]
    fn decode_strips_crlf() {
        let p = TextProtocol;
        let mut st = ();
        assert_eq!(p.decode(b"hello\r\n", &mut st).unwrap(), "hello");
        assert_eq!(p.decode(b"hello\n", &mut st).unwrap(), "hello");
    }

    #[test]
    fn encode_appends_newline() {
        let p = TextProtocol;
        let mut st = ();
        assert_eq!(p.encode("hi".to_string(), &mut st), b"hi\n");
    }

    #[test]
    fn oversize_prefix_without_newline_is_invalid() {
        let p = TextProtocol;
        let mut st = ();
        let buf = vec![b'a'; 100];
        assert_eq!(p.input(&buf, &mut st, 10), FrameLen::Invalid);
    }

    #[test]
    fn round_trip() {
        let p = TextProtocol;
        let mut st = ();
        let encoded = p.encode("hello".to_string(), &mut st);
        let len = match p.input(&encoded, &mut st, 1024) {
            FrameLen::Ready(n) => n,
            other => panic!("expected Ready, got {other:?}"),
        };
        assert_eq!(len, encoded.len());
        assert_eq!(p.decode(&encoded[..len], &mut st).unwrap(), "hello");
    }
}
