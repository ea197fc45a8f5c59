//! `SSLRequest` negotiation and the optional TLS upgrade (§6, §10.5).
//!
//! Sent before the startup message, outside the regular frame codec: an
//! `i32` length (8) followed by the fixed code 80877103, answered with a
//! single unframed byte (`'S'`/`'N'`).
use std::{
    io::{self, Read, Write},
    net::TcpStream,
};

use crate::{
    config::SslMode,
    error::{Error, Result},
    phase::{ssl_required, SslNegotiation},
};

const SSL_REQUEST_CODE: i32 = 80877103;

/// Either a bare TCP socket or one wrapped in a TLS session, so
/// `BlockingIo<MaybeTlsStream>` reads the same afterwards regardless of
/// whether the upgrade happened.
pub enum MaybeTlsStream {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

impl Read for MaybeTlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(s) => s.read(buf),
            #[cfg(feature = "tls")]
            Self::Tls(s) => s.read(buf),
        }
    }
}

impl Write for MaybeTlsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(s) => s.write(buf),
            #[cfg(feature = "tls")]
            Self::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(s) => s.flush(),
            #[cfg(feature = "tls")]
            Self::Tls(s) => s.flush(),
        }
    }
}

/// Send `SSLRequest` and resolve the upgrade according to `mode`, returning
/// the stream the startup phase should continue on.
///
/// `ssl_mode=disable` skips the request entirely. Any other mode sends it;
/// a `'N'` reply continues in plaintext unless `mode` is `Require`, in which
/// case that's a fatal `ConnectionFailedError`.
pub fn negotiate(mut socket: TcpStream, host: &str, mode: SslMode) -> Result<MaybeTlsStream> {
    if mode == SslMode::Disable {
        return Ok(MaybeTlsStream::Plain(socket));
    }

    socket.write_all(&8i32.to_be_bytes())?;
    socket.write_all(&SSL_REQUEST_CODE.to_be_bytes())?;
    socket.flush()?;
    let mut reply = [0u8; 1];
    socket.read_exact(&mut reply)?;

    match SslNegotiation::from_byte(reply[0])? {
        SslNegotiation::Accepted => upgrade(socket, host),
        SslNegotiation::Declined if ssl_required(mode) => {
            Err(Error::connection_failed("server declined TLS while ssl_mode=require"))
        }
        SslNegotiation::Declined => Ok(MaybeTlsStream::Plain(socket)),
    }
}

#[cfg(feature = "tls")]
fn upgrade(socket: TcpStream, host: &str) -> Result<MaybeTlsStream> {
    use std::sync::{Arc, OnceLock};

    static ROOTS: OnceLock<Arc<rustls::RootCertStore>> = OnceLock::new();
    let roots = ROOTS.get_or_init(|| {
        let mut store = rustls::RootCertStore::empty();
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Arc::new(store)
    });

    let config = rustls::ClientConfig::builder().with_root_certificates(roots.clone()).with_no_client_auth();
    let server_name = rustls::pki_types::ServerName::try_from(host.to_owned())
        .map_err(|_| Error::connection_failed("invalid TLS server name"))?;
    let conn = rustls::ClientConnection::new(Arc::new(config), server_name)
        .map_err(|e| Error::connection_failed(format!("TLS handshake setup failed: {e}")))?;
    Ok(MaybeTlsStream::Tls(Box::new(rustls::StreamOwned::new(conn, socket))))
}

#[cfg(not(feature = "tls"))]
fn upgrade(_socket: TcpStream, _host: &str) -> Result<MaybeTlsStream> {
    Err(Error::connection_failed("server accepted TLS but the `tls` feature is not enabled"))
}
