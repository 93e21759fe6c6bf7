use base64::Engine;
use rand::RngCore;
use sha1::{Digest, Sha1};

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// `base64(sha1(key + GUID))`, per RFC 6455 §1.3.
pub fn compute_accept(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(GUID.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Case-insensitive header lookup over a raw `\r\n`-joined header block.
fn find_header<'a>(headers: &'a str, name: &str) -> Option<&'a str> {
    headers.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        k.trim().eq_ignore_ascii_case(name).then(|| v.trim())
    })
}

/// Parses a client handshake request. Returns the `Sec-WebSocket-Key` plus
/// any extra headers queued by user code (none here; user headers are
/// attached by the listener before the response is written) if the request
/// looks like a valid WebSocket upgrade.
pub fn parse_client_key(request: &str) -> Option<&str> {
    let first_line = request.lines().next()?;
    if !first_line.starts_with("GET ") {
        return None;
    }
    find_header(request, "Sec-WebSocket-Key")
}

/// Builds the `101 Switching Protocols` response.
pub fn build_switching_protocols(client_key: &str, extra_headers: &str) -> Vec<u8> {
    let accept = compute_accept(client_key);
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         {extra_headers}\r\n"
    )
    .into_bytes()
}

/// Informational page sent back on a malformed handshake, per §4.6.
pub fn build_malformed_handshake_page() -> Vec<u8> {
    let body = "<html><body><h1>400 Bad Request</h1>\
                <p>Invalid WebSocket handshake.</p></body></html>";
    format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/html\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{}",
        body.len(),
        body
    )
    .into_bytes()
}

/// Generates a random 16-byte client handshake key, base64-encoded.
pub fn generate_client_key() -> String {
    let mut raw = [0u8; 16];
    rand::rng().fill_bytes(&mut raw);
    base64::engine::general_purpose::STANDARD.encode(raw)
}

/// Builds the client-side `GET` upgrade request.
pub fn build_client_request(host: &str, path: &str, key: &str) -> Vec<u8> {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    )
    .into_bytes()
}

/// Validates the server's response against the key the client sent.
pub fn verify_server_accept(response: &str, client_key: &str) -> bool {
    let Some(status_line) = response.lines().next() else { return false };
    if !status_line.contains("101") {
        return false;
    }
    let Some(accept) = find_header(response, "Sec-WebSocket-Accept") else { return false };
    accept == compute_accept(client_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc6455_worked_example() {
        assert_eq!(compute_accept("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn parses_key_from_request_headers() {
        let req = "GET /ws HTTP/1.1\r\nHost: x\r\nSec-WebSocket-Key: abc==\r\n\r\n";
        assert_eq!(parse_client_key(req), Some("abc=="));
    }

    #[test]
    fn rejects_non_get_request() {
        let req = "POST /ws HTTP/1.1\r\nSec-WebSocket-Key: abc==\r\n\r\n";
        assert_eq!(parse_client_key(req), None);
    }

    #[test]
    fn client_round_trip_verifies() {
        let key = generate_client_key();
        let resp = String::from_utf8(build_switching_protocols(&key, "")).unwrap();
        assert!(verify_server_accept(&resp, &key));
    }
}
