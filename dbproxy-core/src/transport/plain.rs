use crate::error::ProxyResult;
use std::net::TcpStream;
use std::time::Duration;

/// An unencrypted TCP connection. Reader and writer are independent
/// clones of the same socket so a blocking read on one thread never
/// blocks a write issued from another.
#[derive(Debug)]
pub struct PlainStream {
    reader: TcpStream,
    writer: TcpStream,
}

impl PlainStream {
    pub fn connect(addr: impl std::net::ToSocketAddrs) -> ProxyResult<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            writer: stream.try_clone()?,
            reader: stream,
        })
    }

    pub fn from_accepted(stream: TcpStream) -> ProxyResult<Self> {
        stream.set_nodelay(true)?;
        Ok(Self {
            writer: stream.try_clone()?,
            reader: stream,
        })
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> ProxyResult<()> {
        self.reader.set_read_timeout(timeout)?;
        Ok(())
    }

    pub fn shutdown_read(&self) -> ProxyResult<()> {
        self.reader.shutdown(std::net::Shutdown::Read)?;
        Ok(())
    }

    pub fn peer_addr(&self) -> ProxyResult<std::net::SocketAddr> {
        Ok(self.reader.peer_addr()?)
    }

    /// An independent handle that can interrupt this stream's blocking
    /// read from another thread, without taking part in the read/write
    /// split itself.
    pub fn shutdown_handle(&self) -> ProxyResult<TcpStream> {
        Ok(self.reader.try_clone()?)
    }

    pub fn reader(&mut self) -> &mut impl std::io::Read {
        &mut self.reader
    }

    pub fn writer(&mut self) -> &mut impl std::io::Write {
        &mut self.writer
    }
}

impl std::io::Read for PlainStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        std::io::Read::read(&mut self.reader, buf)
    }
}

impl std::io::Write for PlainStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::Write::write(&mut self.writer, buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::Write::flush(&mut self.writer)
    }
}
