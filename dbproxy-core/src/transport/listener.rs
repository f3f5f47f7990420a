use crate::error::ProxyResult;
use socket2::{Domain, SockRef, Socket, Type};
use std::net::{SocketAddr, TcpListener, TcpStream};

/// A bound TCP listener for the daemon's accept loop.
///
/// `auto_close` mirrors the original daemon's listener flag: when set, the
/// accepted socket is handed to the caller already detached from the
/// listener's own lifetime (the normal case here, since every accepted
/// connection gets its own worker thread and outlives the accept call).
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    keepalive: bool,
}

impl Listener {
    /// Binds at `addr` with the given accept backlog. `reuse_addr` sets
    /// `SO_REUSEADDR` so the daemon can restart immediately after a crash
    /// without waiting out `TIME_WAIT` on the previous socket. `keepalive`
    /// marks every socket this listener accepts with the OS keepalive
    /// option.
    pub fn bind(addr: SocketAddr, backlog: i32, reuse_addr: bool, keepalive: bool) -> ProxyResult<Self> {
        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::STREAM, None)?;
        if reuse_addr {
            socket.set_reuse_address(true)?;
        }
        socket.bind(&addr.into())?;
        socket.listen(backlog)?;
        socket.set_nonblocking(false)?;
        Ok(Self {
            inner: socket.into(),
            keepalive,
        })
    }

    pub fn local_addr(&self) -> ProxyResult<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    /// Blocks until a client connects, returning the raw accepted socket.
    /// The caller wraps it into a `Stream` and spawns the per-connection
    /// worker; the listener itself never owns connections past accept.
    pub fn accept(&self) -> ProxyResult<(TcpStream, SocketAddr)> {
        let (stream, addr) = self.inner.accept()?;
        self.apply_keepalive(&stream)?;
        Ok((stream, addr))
    }

    /// Non-blocking accept used by the daemon's event loop so it can poll
    /// for a shutdown request between connections instead of blocking on
    /// `accept()` indefinitely. Returns `Ok(None)` when nothing is pending.
    pub fn try_accept(&self) -> ProxyResult<Option<(TcpStream, SocketAddr)>> {
        self.inner.set_nonblocking(true)?;
        let result = self.inner.accept();
        self.inner.set_nonblocking(false)?;
        match result {
            Ok((stream, addr)) => {
                self.apply_keepalive(&stream)?;
                Ok(Some((stream, addr)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn apply_keepalive(&self, stream: &TcpStream) -> ProxyResult<()> {
        if self.keepalive {
            SockRef::from(stream).set_keepalive(true)?;
        }
        Ok(())
    }
}
