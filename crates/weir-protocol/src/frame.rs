use crate::{FrameLen, Outcome, Protocol, ProtocolError, StatefulProtocol};

const HEADER_LEN: usize = 4;

/// Length-prefixed binary protocol: a 4-byte big-endian total length
/// (covering the header itself) followed by the payload (§4.4).
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameProtocol;

impl Protocol for FrameProtocol {
    type Message = Vec<u8>;
    type ConnState = ();

    fn input(&self, buf: &[u8], _state: &mut (), _max_package_size: usize) -> FrameLen {
        if buf.len() < HEADER_LEN {
            return FrameLen::NeedMore;
        }
        let total = u32::from_be_bytes(buf[..HEADER_LEN].try_into().unwrap()) as usize;
        if total < HEADER_LEN {
            FrameLen::Invalid
        } else if buf.len() < total {
            FrameLen::NeedMore
        } else {
            FrameLen::Ready(total)
        }
    }

    fn decode(&self, buf: &[u8], _state: &mut ()) -> Result<Vec<u8>, ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Err(ProtocolError::Malformed("frame shorter than header".into()));
        }
        Ok(buf[HEADER_LEN..].to_vec())
    }

    fn encode(&self, msg: Vec<u8>, _state: &mut ()) -> Vec<u8> {
        let total = HEADER_LEN + msg.len();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&(total as u32).to_be_bytes());
        out.extend_from_slice(&msg);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_waits_for_header() {
        let p = FrameProtocol;
        let mut st = ();
        assert_eq!(p.input(&[0, 0, 0], &mut st, 1024), FrameLen::NeedMore);
    }

    #[test]
    fn spec_example_frame_round_trip() {
        let p = FrameProtocol;
        let mut st = ();
        let buf = [0x00, 0x00, 0x00, 0x09, 0xab, 0xcd, 0xef, 0xab, 0xcd];
        assert_eq!(p.input(&buf, &mut st, 1024), FrameLen::Ready(9));
        let payload = p.decode(&buf[..9], &mut st).unwrap();
        assert_eq!(payload, [0xab, 0xcd, 0xef, 0xab, 0xcd]);
    }

    #[test]
    fn encode_prepends_length_including_header() {
        let p = FrameProtocol;
        let mut st = ();
        let encoded = Protocol::encode(&p, vec![1, 2, 3], &mut st);
        assert_eq!(encoded, [0, 0, 0, 7, 1, 2, 3]);
    }

    #[test]
    fn input_waits_for_full_payload_past_the_header() {
        let p = FrameProtocol;
        let mut st = ();
        // Header claims a 9-byte frame but only the header plus one payload
        // byte has arrived so far (a message split across two TCP reads).
        let partial = [0x00, 0x00, 0x00, 0x09, 0xab];
        assert_eq!(p.input(&partial, &mut st, 1024), FrameLen::NeedMore);
    }

    #[test]
    fn feed_does_not_panic_on_a_frame_split_across_reads() {
        let p = FrameProtocol;
        let mut st = ();
        let partial = [0x00, 0x00, 0x00, 0x09, 0xab, 0xcd];
        assert!(matches!(StatefulProtocol::feed(&p, &partial, &mut st, 1024), Outcome::NeedMore));
    }

    #[test]
    fn header_claiming_less_than_itself_is_invalid() {
        let p = FrameProtocol;
        let mut st = ();
        assert_eq!(p.input(&[0, 0, 0, 1], &mut st, 1024), FrameLen::Invalid);
    }

    #[test]
    fn round_trip_arbitrary_payload() {
        let p = FrameProtocol;
        let mut st = ();
        for payload in [vec![], vec![0u8; 1], vec![7u8; 5000]] {
            let encoded = Protocol::encode(&p, payload.clone(), &mut st);
            let len = match p.input(&encoded, &mut st, 1 << 20) {
                FrameLen::Ready(n) => n,
                other => panic!("unexpected {other:?}"),
            };
            assert_eq!(len, encoded.len());
            assert_eq!(p.decode(&encoded, &mut st).unwrap(), payload);
        }
    }
}
