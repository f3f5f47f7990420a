use super::{PlainStream, ServerCerts, TlsMode, TlsStream};
use crate::error::{ProxyError, ProxyResult};
use std::io::{Read, Write};
use std::net::ToSocketAddrs;
use std::time::Duration;

/// Either a plain or a TLS connection, addressed through one type so
/// callers don't need to branch on the mode after connecting.
#[derive(Debug)]
pub enum Stream {
    Plain(PlainStream),
    Tls(Box<TlsStream>),
}

impl Stream {
    /// Connects under the given mode. `SecureRequired` fails outright on a
    /// handshake error rather than retrying in plain text; `SecureBestEffort`
    /// does the same, since "best effort" describes certificate validation
    /// laxity elsewhere, not a license to downgrade the transport.
    pub fn connect(host: &str, addr: impl ToSocketAddrs, mode: &TlsMode) -> ProxyResult<Self> {
        match mode {
            TlsMode::Plain => Ok(Self::Plain(PlainStream::connect(addr)?)),
            TlsMode::SecureBestEffort(certs) | TlsMode::SecureRequired(certs) => {
                Ok(Self::Tls(Box::new(TlsStream::connect(host, addr, certs)?)))
            }
        }
    }

    pub fn from_accepted(stream: std::net::TcpStream) -> ProxyResult<Self> {
        Ok(Self::Plain(PlainStream::from_accepted(stream)?))
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> ProxyResult<()> {
        match self {
            Self::Plain(s) => s.set_read_timeout(timeout),
            Self::Tls(s) => s.set_read_timeout(timeout),
        }
    }

    pub fn shutdown_read(&self) -> ProxyResult<()> {
        match self {
            Self::Plain(s) => s.shutdown_read(),
            Self::Tls(s) => s.shutdown_read(),
        }
    }

    pub fn peer_addr(&self) -> ProxyResult<std::net::SocketAddr> {
        match self {
            Self::Plain(s) => s.peer_addr(),
            Self::Tls(s) => s.peer_addr(),
        }
    }

    /// Hands out a handle that can kill this stream's blocking read from
    /// another thread, independent of whatever owns the `Stream` itself.
    /// Used by the daemon to interrupt an idle worker on shutdown.
    pub fn shutdown_handle(&self) -> ProxyResult<ShutdownHandle> {
        let socket = match self {
            Self::Plain(s) => s.shutdown_handle()?,
            Self::Tls(s) => s.shutdown_handle()?,
        };
        Ok(ShutdownHandle(socket))
    }
}

/// An independent handle on an accepted socket's read half, kept by the
/// daemon alongside a worker's `JoinHandle` so it can half-shutdown an
/// idle connection without owning the `Stream` the worker reads from.
#[derive(Debug)]
pub struct ShutdownHandle(std::net::TcpStream);

impl ShutdownHandle {
    pub fn shutdown_read(&self) -> ProxyResult<()> {
        self.0.shutdown(std::net::Shutdown::Read)?;
        Ok(())
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(s) => s.read(buf),
            Self::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(s) => s.write(buf),
            Self::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(s) => s.flush(),
            Self::Tls(s) => s.flush(),
        }
    }
}

/// Reports an attempt to use a dropped `ServerCerts` configuration as a
/// parameter error - kept for call sites that build `TlsMode` dynamically
/// from config and need a place to reject an empty cert list early.
pub fn require_certs(certs: &[ServerCerts]) -> ProxyResult<()> {
    if certs.is_empty() {
        return Err(ProxyError::parameter("secure transport requires at least one certificate source"));
    }
    Ok(())
}
