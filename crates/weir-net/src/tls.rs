//! TLS transport (C12): wraps a plain `Read + Write` stream (almost always
//! a `mio::net::TcpStream`) in a non-blocking `rustls` session so the
//! connection layer above never has to know a given listener is encrypted.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerConfig, ServerConnection};

/// Bridges `ClientConnection`/`ServerConnection` (both `Deref`/`DerefMut` to
/// a `rustls::ConnectionCommon<_>` with these same inherent methods) so
/// `TlsStream` can stay generic over either side, mirroring what
/// `rustls::Connection` offered as a trait in earlier rustls releases.
pub trait Connection {
    fn is_handshaking(&self) -> bool;
    fn wants_read(&self) -> bool;
    fn wants_write(&self) -> bool;
    fn read_tls(&mut self, rd: &mut dyn Read) -> io::Result<usize>;
    fn write_tls(&mut self, wr: &mut dyn Write) -> io::Result<usize>;
    fn process_new_packets(&mut self) -> Result<rustls::IoState, rustls::Error>;
    fn reader(&mut self) -> rustls::Reader<'_>;
    fn writer(&mut self) -> rustls::Writer<'_>;
}

macro_rules! impl_connection {
    ($ty:ty) => {
        impl Connection for $ty {
            fn is_handshaking(&self) -> bool {
                (**self).is_handshaking()
            }
            fn wants_read(&self) -> bool {
                (**self).wants_read()
            }
            fn wants_write(&self) -> bool {
                (**self).wants_write()
            }
            fn read_tls(&mut self, rd: &mut dyn Read) -> io::Result<usize> {
                (**self).read_tls(rd)
            }
            fn write_tls(&mut self, wr: &mut dyn Write) -> io::Result<usize> {
                (**self).write_tls(wr)
            }
            fn process_new_packets(&mut self) -> Result<rustls::IoState, rustls::Error> {
                (**self).process_new_packets()
            }
            fn reader(&mut self) -> rustls::Reader<'_> {
                (**self).reader()
            }
            fn writer(&mut self) -> rustls::Writer<'_> {
                (**self).writer()
            }
        }
    };
}

impl_connection!(ClientConnection);
impl_connection!(ServerConnection);

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("tls configuration error: {0}")]
    Config(#[from] rustls::Error),
    #[error("invalid server name: {0}")]
    InvalidServerName(String),
}

pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(TlsError::Io)
}

pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| TlsError::Io(io::Error::new(io::ErrorKind::InvalidData, "no private key in file")))
}

/// Builds a server config from a PEM certificate chain and private key
/// (§4.6 "TLS listeners"). Client certificate auth is not offered.
pub fn build_server_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>, TlsError> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;
    let config = ServerConfig::builder().with_no_client_auth().with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}

/// Builds a client config trusting the bundled Mozilla root set, used by
/// the WebSocket/HTTP client transports when connecting over `wss://` /
/// `https://`.
pub fn build_client_config() -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
    Arc::new(config)
}

pub fn new_server_session(config: Arc<ServerConfig>) -> Result<ServerConnection, TlsError> {
    Ok(ServerConnection::new(config)?)
}

pub fn new_client_session(config: Arc<ClientConfig>, server_name: &str) -> Result<ClientConnection, TlsError> {
    let name = ServerName::try_from(server_name.to_string())
        .map_err(|_| TlsError::InvalidServerName(server_name.to_string()))?;
    Ok(ClientConnection::new(config, name)?)
}

/// A non-blocking TLS session layered over any `Read + Write` transport.
/// Generic over `C` (`ServerConnection` or `ClientConnection`) via
/// `rustls::Connection` so the rest of `weir-net` only deals with `Read +
/// Write`, same as a plain TCP stream.
pub struct TlsStream<S, C> {
    io: S,
    conn: C,
}

impl<S: Read + Write, C: Connection> TlsStream<S, C> {
    pub fn new(io: S, conn: C) -> Self {
        Self { io, conn }
    }

    pub fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    pub fn inner(&self) -> &S {
        &self.io
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.io
    }

    /// Pulls any pending ciphertext off the wire and feeds it to rustls,
    /// then flushes anything rustls wants to send back (handshake
    /// messages, alerts). Call before every plaintext read.
    fn pump_read(&mut self) -> io::Result<()> {
        while self.conn.wants_read() {
            match self.conn.read_tls(&mut self.io) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "tls peer closed")),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        if let Err(e) = self.conn.process_new_packets() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, e));
        }
        self.pump_write()
    }

    fn pump_write(&mut self) -> io::Result<()> {
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut self.io) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl<S: Read + Write, C: Connection> Read for TlsStream<S, C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.pump_read()?;
        self.conn.reader().read(buf)
    }
}

impl<S: Read + Write, C: Connection> Write for TlsStream<S, C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.conn.writer().write(buf)?;
        self.pump_write()?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.conn.writer().flush()?;
        self.pump_write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_trusts_the_bundled_roots() {
        let config = build_client_config();
        assert!(!config.crypto_provider().cipher_suites.is_empty());
    }

    #[test]
    fn building_server_config_from_missing_file_fails() {
        let err = build_server_config(Path::new("/nonexistent/cert.pem"), Path::new("/nonexistent/key.pem"));
        assert!(err.is_err());
    }
}
