use crate::error::{ProxyError, ProxyResult};
use rustls::{Certificate, ClientConfig, ClientConnection, OwnedTrustAnchor, RootCertStore, ServerName, StreamOwned};
use std::io::Read as _;
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Where to find certificates to trust when verifying the peer.
#[derive(Clone, Debug)]
pub enum ServerCerts {
    /// The platform's bundled web roots, shipped by `webpki-roots`.
    RootCertificates,
    /// Every `.pem` file in a directory is added to the trust store.
    Directory(PathBuf),
    /// A single PEM-encoded certificate, passed inline.
    Direct(String),
}

/// How a connection should use TLS. The proxy and its clients never fall
/// back from `SecureRequired` to plain text on handshake failure; that
/// must be requested explicitly via `SecureBestEffort`.
#[derive(Clone, Debug)]
pub enum TlsMode {
    Plain,
    SecureBestEffort(Vec<ServerCerts>),
    SecureRequired(Vec<ServerCerts>),
}

/// A TLS-wrapped TCP connection built from `rustls`.
pub struct TlsStream {
    inner: StreamOwned<ClientConnection, TcpStream>,
}

impl std::fmt::Debug for TlsStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TlsStream {{ peer: {:?} }}", self.inner.sock.peer_addr())
    }
}

impl TlsStream {
    pub fn connect(host: &str, addr: impl std::net::ToSocketAddrs, certs: &[ServerCerts]) -> ProxyResult<Self> {
        let config = client_config(certs)?;
        let server_name = ServerName::try_from(host).map_err(|e| ProxyError::Tls(e.to_string()))?;
        let connection =
            ClientConnection::new(Arc::new(config), server_name).map_err(|e| ProxyError::Tls(e.to_string()))?;
        let tcp = TcpStream::connect(addr)?;
        tcp.set_nodelay(true)?;
        Ok(Self {
            inner: StreamOwned::new(connection, tcp),
        })
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> ProxyResult<()> {
        self.inner.sock.set_read_timeout(timeout)?;
        Ok(())
    }

    pub fn shutdown_read(&self) -> ProxyResult<()> {
        self.inner.sock.shutdown(std::net::Shutdown::Read)?;
        Ok(())
    }

    pub fn peer_addr(&self) -> ProxyResult<std::net::SocketAddr> {
        Ok(self.inner.sock.peer_addr()?)
    }

    /// An independent handle that can interrupt this stream's blocking
    /// read from another thread, without taking part in the TLS session
    /// itself.
    pub fn shutdown_handle(&self) -> ProxyResult<TcpStream> {
        Ok(self.inner.sock.try_clone()?)
    }
}

impl std::io::Read for TlsStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl std::io::Write for TlsStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::Write::write(&mut self.inner, buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::Write::flush(&mut self.inner)
    }
}

fn client_config(certs: &[ServerCerts]) -> ProxyResult<ClientConfig> {
    let mut root_store = RootCertStore::empty();
    for cert in certs {
        match cert {
            ServerCerts::RootCertificates => {
                root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
                    OwnedTrustAnchor::from_subject_spki_name_constraints(ta.subject, ta.spki, ta.name_constraints)
                }));
            }
            ServerCerts::Direct(pem) => {
                add_pem_bytes(&mut root_store, pem.as_bytes())?;
            }
            ServerCerts::Directory(dir) => {
                let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
                    .filter_map(Result::ok)
                    .map(|entry| entry.path())
                    .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("pem"))
                    .collect();
                files.sort();
                for file in files {
                    let mut buf = Vec::new();
                    std::fs::File::open(&file)?.read_to_end(&mut buf)?;
                    add_pem_bytes(&mut root_store, &buf)?;
                }
            }
        }
    }
    if root_store.is_empty() {
        return Err(ProxyError::Tls("no trusted certificates configured".into()));
    }
    Ok(ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth())
}

fn add_pem_bytes(root_store: &mut RootCertStore, bytes: &[u8]) -> ProxyResult<()> {
    let mut reader = std::io::BufReader::new(bytes);
    let der_certs = rustls_pemfile::certs(&mut reader).map_err(|e| ProxyError::Tls(e.to_string()))?;
    for der in der_certs {
        root_store
            .add(&Certificate(der))
            .map_err(|e| ProxyError::Tls(e.to_string()))?;
    }
    Ok(())
}
