//! Client-side proxy facade (C4).
//!
//! Opens (or reuses) a connection to the proxy, frames an order, and
//! either waits for the one response it implies or returns a synthetic
//! success immediately for non-blocking orders. Transport errors never
//! retry on their own - the caller decides whether to try again.

use crate::codec::{self, DbResult, Order, TAG_ERROR, TAG_REQUEST, TAG_SUCCESS};
use crate::error::{ProxyError, ProxyResult};
use crate::transport::{Stream, TlsMode};
use std::net::ToSocketAddrs;

/// A connection to the proxy, reused across calls until a write fails.
#[derive(Debug)]
pub struct ProxyClient {
    host: String,
    addr: std::net::SocketAddr,
    mode: TlsMode,
    stream: Option<Stream>,
}

impl ProxyClient {
    pub fn new(host: impl Into<String>, addr: impl ToSocketAddrs, mode: TlsMode) -> ProxyResult<Self> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ProxyError::parameter("no address resolved for proxy endpoint"))?;
        Ok(Self {
            host: host.into(),
            addr,
            mode,
            stream: None,
        })
    }

    /// Sends `order` to the proxy. Blocking orders wait for and decode the
    /// framed response; non-blocking orders return a synthetic success
    /// right after the write completes.
    pub fn send_order(&mut self, order: &Order) -> ProxyResult<DbResult> {
        let blocking = order.blocking;

        if let Err(e) = self.write_order(order) {
            self.stream = None;
            return Ok(DbResult::Error {
                code: 0,
                message: format!("failed to send order: {e}"),
            });
        }

        if !blocking {
            return Ok(DbResult::success(Vec::new()));
        }

        match self.read_result() {
            Ok(result) => Ok(result),
            Err(e) => {
                self.stream = None;
                Ok(DbResult::Error {
                    code: 0,
                    message: format!("failed to receive result: {e}"),
                })
            }
        }
    }

    fn write_order(&mut self, order: &Order) -> ProxyResult<()> {
        let stream = self.ensure_connected()?;
        let mut payload = Vec::new();
        order.encode(&mut payload)?;
        codec::write_frame(stream, TAG_REQUEST, &payload)
    }

    fn read_result(&mut self) -> ProxyResult<DbResult> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ProxyError::lifecycle("no connection to read a result from"))?;
        let (tag, payload) = codec::read_frame(stream)?;
        match tag {
            TAG_SUCCESS | TAG_ERROR => DbResult::decode(&payload),
            other => Err(ProxyError::protocol(format!("unexpected response tag {other:?}"))),
        }
    }

    fn ensure_connected(&mut self) -> ProxyResult<&mut Stream> {
        if self.stream.is_none() {
            self.stream = Some(Stream::connect(&self.host, self.addr, &self.mode)?);
        }
        Ok(self.stream.as_mut().expect("just connected"))
    }
}

/// Daemon-side helper: reads one framed order off an already-accepted
/// connection. Used by the per-connection worker (C7).
pub fn receive_order(io: &mut impl std::io::Read) -> ProxyResult<Order> {
    let (tag, payload) = codec::read_frame(io)?;
    if tag != TAG_REQUEST {
        return Err(ProxyError::protocol(format!("expected request tag, got {tag:?}")));
    }
    Order::decode(&mut payload.as_slice())
}

/// Daemon-side helper: frames and writes a result back to the client.
pub fn send_result(io: &mut impl std::io::Write, result: &DbResult) -> ProxyResult<()> {
    let tag = if result.is_success() { TAG_SUCCESS } else { TAG_ERROR };
    let mut payload = Vec::new();
    result.encode(&mut payload)?;
    codec::write_frame(io, tag, &payload)
}
