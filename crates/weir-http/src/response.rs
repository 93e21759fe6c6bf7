use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use weir_timing::Nanos;

use crate::error::HttpError;
use crate::mime::MimeTypes;

/// Above this body size, `with_file` hands back a [`FileStream`] instead of
/// buffering the whole body (§4.5: "if bodyLen < 2 MiB, send in one write;
/// else stream").
pub const INLINE_FILE_THRESHOLD: u64 = 2 * 1024 * 1024;
/// Chunk size used once a file response is streamed.
pub const FILE_CHUNK_SIZE: usize = 1024 * 1024;

/// An outgoing HTTP response under construction.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub reason: &'static str,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

#[derive(Debug, Clone)]
pub enum Body {
    Buffered(Vec<u8>),
    Chunked(Vec<u8>),
    /// Headers have already been emitted; remaining bytes are pulled by the
    /// connection layer via [`FileStream::next_chunk`] on each
    /// `onBufferDrain`.
    Streamed,
    Empty,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self { status, reason: reason_phrase(status), headers: Vec::new(), body: Body::Empty }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.headers.push(("Content-Type".to_string(), "text/plain;charset=utf-8".to_string()));
        self.body = Body::Buffered(body.into().into_bytes());
        self
    }

    pub fn html(mut self, body: impl Into<String>) -> Self {
        self.headers.push(("Content-Type".to_string(), "text/html;charset=utf-8".to_string()));
        self.body = Body::Buffered(body.into().into_bytes());
        self
    }

    pub fn json(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.headers.push(("Content-Type".to_string(), "application/json".to_string()));
        self.body = Body::Buffered(body.into());
        self
    }

    /// Wraps `body` as a single chunked-transfer frame; callers append more
    /// chunks by encoding further `Response`-less writes through the
    /// connection directly, mirroring the source's incremental
    /// `write(chunk)` + final `end()` API.
    pub fn chunk(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.headers.push(("Transfer-Encoding".to_string(), "chunked".to_string()));
        self.body = Body::Chunked(body.into());
        self
    }

    pub fn not_found() -> Self {
        Self::new(404).html("<html><body><h1>404 Not Found</h1></body></html>")
    }

    /// Builds the status line + header block. For `Body::Buffered`/`Chunked`
    /// the body follows immediately; `Body::Streamed` responses only emit
    /// headers here, and the caller drains a paired [`FileStream`].
    pub fn into_bytes(self) -> Vec<u8> {
        let mut out = self.head_bytes();
        match self.body {
            Body::Buffered(body) => out.extend_from_slice(&body),
            Body::Chunked(chunk) => {
                out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
                out.extend_from_slice(&chunk);
                out.extend_from_slice(b"\r\n0\r\n\r\n");
            }
            Body::Streamed | Body::Empty => {}
        }
        out
    }

    fn head_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(format!("HTTP/{} {} {}\r\n", "1.1", self.status, self.reason).as_bytes());
        out.extend_from_slice(b"Server: Localzet-Server\r\n");

        let mut has_connection = false;
        let mut has_content_type = false;
        let mut has_content_length = false;
        let mut has_transfer_encoding = false;
        for (name, _) in &self.headers {
            if name.eq_ignore_ascii_case("Connection") {
                has_connection = true;
            }
            if name.eq_ignore_ascii_case("Content-Type") {
                has_content_type = true;
            }
            if name.eq_ignore_ascii_case("Content-Length") {
                has_content_length = true;
            }
            if name.eq_ignore_ascii_case("Transfer-Encoding") {
                has_transfer_encoding = true;
            }
        }
        if !has_connection {
            out.extend_from_slice(b"Connection: keep-alive\r\n");
        }
        if !has_content_type {
            out.extend_from_slice(b"Content-Type: text/html;charset=utf-8\r\n");
        }
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        if !has_content_length && !has_transfer_encoding {
            let len = match &self.body {
                Body::Buffered(b) => b.len(),
                _ => 0,
            };
            out.extend_from_slice(format!("Content-Length: {len}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

/// Drives a large file body in bounded chunks, honoring the connection's
/// buffer-full/drain backpressure (§4.5, §5 "Backpressure").
pub struct FileStream {
    file: File,
    remaining: u64,
}

impl FileStream {
    /// Reads and returns up to [`FILE_CHUNK_SIZE`] bytes, or `None` once
    /// `length` bytes have been delivered.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, HttpError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let want = self.remaining.min(FILE_CHUNK_SIZE as u64) as usize;
        let mut buf = vec![0u8; want];
        let n = self.file.read(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        self.remaining -= n as u64;
        Ok(Some(buf))
    }
}

/// Builds a file response per §4.5: `404` text if the file is missing,
/// otherwise headers plus either a buffered body (small files) or a
/// [`FileStream`] the connection layer pulls from.
pub fn with_file(
    path: impl AsRef<Path>,
    offset: u64,
    length: Option<u64>,
    mime_types: &MimeTypes,
) -> Result<(Response, Option<FileStream>), HttpError> {
    let path = path.as_ref();
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return Ok((Response::not_found(), None)),
    };
    let metadata = file.metadata()?;
    let file_len = metadata.len();
    let body_len = length.unwrap_or(file_len.saturating_sub(offset)).min(file_len.saturating_sub(offset));

    file.seek(SeekFrom::Start(offset))?;

    let content_type = mime_types.lookup(path);
    let mut response = Response::new(200)
        .header("Accept-Ranges", "bytes")
        .header("Content-Length", body_len.to_string())
        .header("Content-Type", content_type.unwrap_or("application/octet-stream").to_string());

    if content_type.is_none() {
        let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("download");
        response = response.header("Content-Disposition", format!("attachment; filename=\"{filename}\""));
    }
    if offset != 0 || length.is_some_and(|l| l != file_len) {
        response = response.header(
            "Content-Range",
            format!("bytes {}-{}/{}", offset, offset + body_len.saturating_sub(1), file_len),
        );
    }
    if let Ok(modified) = metadata.modified() {
        let since_epoch = modified.duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
        let nanos = Nanos::from_secs(since_epoch.as_secs());
        response = response.header("Last-Modified", nanos.to_rfc1123());
    }

    if body_len < INLINE_FILE_THRESHOLD {
        let mut buf = vec![0u8; body_len as usize];
        file.read_exact(&mut buf)?;
        response.body = Body::Buffered(buf);
        Ok((response, None))
    } else {
        response.body = Body::Streamed;
        Ok((response, Some(FileStream { file, remaining: body_len })))
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn small_body_gets_content_length() {
        let resp = Response::ok().text("hi");
        let bytes = resp.into_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("hi"));
    }

    #[test]
    fn chunked_body_omits_content_length() {
        let resp = Response::ok().chunk(b"abc".to_vec());
        let text = String::from_utf8(resp.into_bytes()).unwrap();
        assert!(text.contains("Transfer-Encoding: chunked"));
        assert!(!text.contains("Content-Length"));
        assert!(text.ends_with("3\r\nabc\r\n0\r\n\r\n"));
    }

    #[test]
    fn missing_file_yields_404() {
        let table = MimeTypes::default();
        let (resp, stream) = with_file("/does/not/exist", 0, None, &table).unwrap();
        assert_eq!(resp.status, 404);
        assert!(stream.is_none());
    }

    #[test]
    fn small_file_is_buffered_inline() {
        let table = MimeTypes::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello world").unwrap();

        let (resp, stream) = with_file(&path, 0, None, &table).unwrap();
        assert_eq!(resp.status, 200);
        assert!(stream.is_none());
        assert!(matches!(resp.body, Body::Buffered(ref b) if b == b"hello world"));
    }

    #[test]
    fn large_file_streams_in_chunks() {
        let table = MimeTypes::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let mut f = File::create(&path).unwrap();
        let payload = vec![7u8; (INLINE_FILE_THRESHOLD as usize) + 10];
        f.write_all(&payload).unwrap();

        let (resp, stream) = with_file(&path, 0, None, &table).unwrap();
        assert!(matches!(resp.body, Body::Streamed));
        let mut stream = stream.unwrap();
        let mut total = 0usize;
        while let Some(chunk) = stream.next_chunk().unwrap() {
            total += chunk.len();
        }
        assert_eq!(total, payload.len());
    }
}
