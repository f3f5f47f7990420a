//! Blocking TCP transport: plain streams, TLS streams unified behind one
//! enum, and a thin listener wrapper used by the daemon's accept loop.

mod listener;
mod plain;
mod stream;
mod tls;

pub use listener::Listener;
pub use plain::PlainStream;
pub use stream::{ShutdownHandle, Stream};
pub use tls::{ServerCerts, TlsMode, TlsStream};

use crate::error::ProxyResult;
use std::io::Read;

/// Reads up to the next `\n` (not included in the result). Returns `None`
/// only when the peer closed the connection before any byte was read;
/// an empty line is `Some(String::new())`.
pub fn read_line(r: &mut impl Read) -> ProxyResult<Option<String>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match r.read(&mut byte)? {
            0 => {
                return Ok(if line.is_empty() { None } else { Some(bytes_to_line(line)) });
            }
            _ => {
                if byte[0] == b'\n' {
                    return Ok(Some(bytes_to_line(line)));
                }
                line.push(byte[0]);
            }
        }
    }
}

fn bytes_to_line(mut line: Vec<u8>) -> String {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8_lossy(&line).into_owned()
}
