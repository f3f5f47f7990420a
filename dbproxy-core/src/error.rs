use thiserror::Error;

/// The error categories produced by this crate.
///
/// Parameter errors are raised at the call site and surface to the
/// immediate caller. Transport and protocol errors close the connection
/// they occurred on. Driver errors distinguish a cluster outage (which
/// triggers a reconnect) from an ordinary failed query.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    /// Bad input to a constructor or setter: a malformed address, a port
    /// out of range, an unknown protocol or service name.
    #[error("parameter error: {0}")]
    Parameter(String),

    /// I/O failure on a client or proxy stream.
    #[error("transport error")]
    Transport {
        #[from]
        source: std::io::Error,
    },

    /// TLS handshake or certificate verification failed. Never downgrades
    /// to plain - the caller must opt into that explicitly beforehand.
    #[error("TLS error: {0}")]
    Tls(String),

    /// A malformed frame, unknown tag, or inconsistent length on the wire.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A query failed on the cluster, or the cluster could not be reached.
    #[error("driver error {code}: {message}")]
    Driver {
        code: i32,
        message: String,
        /// Set when the failure indicates total loss of cluster connectivity,
        /// as opposed to an ordinary failed query.
        unreachable: bool,
    },

    /// Use of a closed connection or an unknown cursor identifier.
    #[error("lifecycle error: {0}")]
    Lifecycle(String),
}

/// Abbreviation of `Result<T, ProxyError>`.
pub type ProxyResult<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    pub fn parameter(msg: impl Into<String>) -> Self {
        Self::Parameter(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn lifecycle(msg: impl Into<String>) -> Self {
        Self::Lifecycle(msg.into())
    }

    /// True when this error reflects a total loss of cluster connectivity
    /// rather than an ordinary failed query.
    pub fn is_cluster_unreachable(&self) -> bool {
        matches!(self, Self::Driver { unreachable: true, .. })
    }
}
