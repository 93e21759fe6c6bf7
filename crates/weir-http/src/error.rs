#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("request exceeded the configured maximum package size")]
    PayloadTooLarge,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("request body was not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
