use crate::error::HttpError;

/// Methods accepted by the request line parser (§4.5); anything else is a
/// `400`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Options,
    Head,
    Delete,
    Put,
    Patch,
}

impl Method {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "OPTIONS" => Self::Options,
            "HEAD" => Self::Head,
            "DELETE" => Self::Delete,
            "PUT" => Self::Put,
            "PATCH" => Self::Patch,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Options => "OPTIONS",
            Self::Head => "HEAD",
            Self::Delete => "DELETE",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
        }
    }
}

/// A fully parsed HTTP/1.1 request. Headers and cookies preserve both order
/// and duplicate entries (case-insensitive lookup is a linear scan, matching
/// the header counts real requests have).
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub version: &'static str,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Best-effort JA3-like fingerprint, populated only when the buffer
    /// opened with a TLS ClientHello prefix ahead of the plaintext request
    /// (the mixed-protocol-detection probe the connection layer runs before
    /// committing to HTTP framing). Absence is never an error.
    pub tls_fingerprint: Option<String>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.headers.iter().filter(move |(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    pub fn host(&self) -> Option<&str> {
        self.header("Host")
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// Parses the body as `application/x-www-form-urlencoded` POST data.
    /// Lazy by convention: callers invoke this only when they need it,
    /// matching the source's "body parsed on first access" contract.
    pub fn post_params(&self) -> Vec<(String, String)> {
        parse_query_string(std::str::from_utf8(&self.body).unwrap_or(""))
    }
}

pub(crate) struct ParsedHead {
    pub method: Method,
    pub uri: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub version: &'static str,
    pub headers: Vec<(String, String)>,
    pub content_length: usize,
}

/// Parses the request line and header block (everything up to, but not
/// including, the terminating `\r\n\r\n`). Rejects anything not in the
/// method allow-list, anything missing `Host`, and any `Transfer-Encoding`
/// header (chunked uploads are not supported).
pub(crate) fn parse_head(head: &[u8]) -> Result<ParsedHead, HttpError> {
    let text = std::str::from_utf8(head)?;
    let mut lines = text.split("\r\n");

    let request_line = lines.next().ok_or_else(|| HttpError::BadRequest("empty request".into()))?;
    let mut parts = request_line.split(' ');
    let method_str = parts.next().ok_or_else(|| HttpError::BadRequest("missing method".into()))?;
    let uri = parts.next().ok_or_else(|| HttpError::BadRequest("missing URI".into()))?.to_string();
    let version_str = parts.next().unwrap_or("HTTP/1.1");

    let method = Method::parse(method_str)
        .ok_or_else(|| HttpError::BadRequest(format!("unsupported method {method_str}")))?;
    let version = if version_str.starts_with("HTTP/1.0") { "1.0" } else { "1.1" };

    let (path, query) = match uri.split_once('?') {
        Some((p, q)) => (p.to_string(), parse_query_string(q)),
        None => (uri.clone(), Vec::new()),
    };

    let mut headers = Vec::new();
    let mut content_length = 0usize;
    let mut has_host = false;
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(HttpError::BadRequest(format!("malformed header line: {line}")));
        };
        let name = name.trim();
        let value = value.trim();

        if name.eq_ignore_ascii_case("Transfer-Encoding") {
            return Err(HttpError::BadRequest("chunked request bodies are not supported".into()));
        }
        if name.eq_ignore_ascii_case("Host") {
            has_host = true;
        }
        if name.eq_ignore_ascii_case("Content-Length") {
            content_length = value
                .parse()
                .map_err(|_| HttpError::BadRequest(format!("invalid Content-Length: {value}")))?;
        }
        headers.push((name.to_string(), value.to_string()));
    }

    if version == "1.1" && !has_host {
        return Err(HttpError::BadRequest("missing Host header".into()));
    }

    Ok(ParsedHead { method, uri, path, query, version, headers, content_length })
}

pub(crate) fn finish_request(head: ParsedHead, body: Vec<u8>) -> Request {
    let cookies = head
        .headers
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case("Cookie"))
        .flat_map(|(_, v)| v.split(';'))
        .filter_map(|kv| {
            let (k, v) = kv.trim().split_once('=')?;
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect();

    Request {
        method: head.method,
        uri: head.uri,
        path: head.path,
        query: head.query,
        version: head.version,
        headers: head.headers,
        cookies,
        body,
        tls_fingerprint: None,
    }
}

fn parse_query_string(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (url_decode(k), url_decode(v)),
            None => (url_decode(pair), String::new()),
        })
        .collect()
}

fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_method_uri_and_headers() {
        let raw = b"GET /hello?a=1&b=two HTTP/1.1\r\nHost: example.test\r\nCookie: sid=abc; theme=dark\r\n";
        let head = parse_head(raw).unwrap();
        assert_eq!(head.method, Method::Get);
        assert_eq!(head.path, "/hello");
        let req = finish_request(head, Vec::new());
        assert_eq!(req.query, vec![("a".to_string(), "1".to_string()), ("b".to_string(), "two".to_string())]);
        assert_eq!(req.cookie("sid"), Some("abc"));
        assert_eq!(req.host(), Some("example.test"));
    }

    #[test]
    fn rejects_missing_host_on_http11() {
        let raw = b"GET / HTTP/1.1\r\n";
        assert!(parse_head(raw).is_err());
    }

    #[test]
    fn rejects_transfer_encoding() {
        let raw = b"POST / HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n";
        assert!(parse_head(raw).is_err());
    }

    #[test]
    fn rejects_unsupported_method() {
        let raw = b"TRACE / HTTP/1.1\r\nHost: x\r\n";
        assert!(parse_head(raw).is_err());
    }
}
