//! The order/result wire format.
//!
//! Every frame is `4-byte tag + 4-byte big-endian length + payload`. The
//! proxy recognizes one request tag, `CQLP`, and two response tags, `SUCS`
//! and `EROR`. The codec never interprets statement text, parameter bytes
//! or the schema blob - it only frames and unframes them.

use crate::error::{ProxyError, ProxyResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

pub const TAG_REQUEST: [u8; 4] = *b"CQLP";
pub const TAG_SUCCESS: [u8; 4] = *b"SUCS";
pub const TAG_ERROR: [u8; 4] = *b"EROR";

/// Consistency level requested for an order. `QUORUM` is the default the
/// worker falls back to when an order does not specify one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Consistency {
    One,
    Two,
    Three,
    Quorum,
    LocalQuorum,
    EachQuorum,
    All,
    Any,
}

impl Consistency {
    fn to_byte(self) -> u8 {
        match self {
            Self::One => 0,
            Self::Two => 1,
            Self::Three => 2,
            Self::Quorum => 3,
            Self::LocalQuorum => 4,
            Self::EachQuorum => 5,
            Self::All => 6,
            Self::Any => 7,
        }
    }

    fn from_byte(b: u8) -> ProxyResult<Self> {
        Ok(match b {
            0 => Self::One,
            1 => Self::Two,
            2 => Self::Three,
            3 => Self::Quorum,
            4 => Self::LocalQuorum,
            5 => Self::EachQuorum,
            6 => Self::All,
            7 => Self::Any,
            other => return Err(ProxyError::protocol(format!("unknown consistency level {other}"))),
        })
    }
}

/// What shape of answer an order expects back.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResultShape {
    Success,
    Rows,
    DeclareCursor,
    FetchCursor,
    CloseCursor,
    DescribeCluster,
}

impl ResultShape {
    fn to_byte(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Rows => 1,
            Self::DeclareCursor => 2,
            Self::FetchCursor => 3,
            Self::CloseCursor => 4,
            Self::DescribeCluster => 5,
        }
    }

    fn from_byte(b: u8) -> ProxyResult<Self> {
        Ok(match b {
            0 => Self::Success,
            1 => Self::Rows,
            2 => Self::DeclareCursor,
            3 => Self::FetchCursor,
            4 => Self::CloseCursor,
            5 => Self::DescribeCluster,
            other => return Err(ProxyError::protocol(format!("unknown result shape {other}"))),
        })
    }
}

/// A single client request: a statement plus its binding metadata.
///
/// Parameter count must match the number of placeholders in `statement`;
/// when `shape` is fetch/close, `cursor_id` must be `Some`.
#[derive(Clone, Debug)]
pub struct Order {
    pub statement: String,
    pub parameters: Vec<Vec<u8>>,
    pub consistency: Consistency,
    pub timestamp: Option<i64>,
    pub paging_size: Option<i32>,
    pub timeout_ms: Option<u32>,
    pub shape: ResultShape,
    pub cursor_id: Option<u32>,
    pub column_count: u32,
    pub blocking: bool,
    pub clear_schema_cache: bool,
}

impl Order {
    /// A bare success-shaped, blocking order with no parameters and quorum
    /// consistency - the common case for DDL/DML statements.
    pub fn simple(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            parameters: Vec::new(),
            consistency: Consistency::Quorum,
            timestamp: None,
            paging_size: None,
            timeout_ms: None,
            shape: ResultShape::Success,
            cursor_id: None,
            column_count: 0,
            blocking: true,
            clear_schema_cache: false,
        }
    }

    fn flags(&self) -> u8 {
        let mut flags = 0u8;
        if self.blocking {
            flags |= 0b0000_0001;
        }
        if self.clear_schema_cache {
            flags |= 0b0000_0010;
        }
        if self.timestamp.is_some() {
            flags |= 0b0000_0100;
        }
        if self.paging_size.is_some() {
            flags |= 0b0000_1000;
        }
        if self.timeout_ms.is_some() {
            flags |= 0b0001_0000;
        }
        flags
    }

    pub fn encode(&self, w: &mut impl Write) -> ProxyResult<()> {
        write_bytes(w, self.statement.as_bytes())?;
        w.write_u8(self.flags())?;
        w.write_u8(self.consistency.to_byte())?;
        if let Some(ts) = self.timestamp {
            w.write_i64::<BigEndian>(ts)?;
        }
        if let Some(p) = self.paging_size {
            w.write_i32::<BigEndian>(p)?;
        }
        if let Some(t) = self.timeout_ms {
            w.write_u32::<BigEndian>(t)?;
        }
        w.write_u8(self.shape.to_byte())?;
        if matches!(self.shape, ResultShape::FetchCursor | ResultShape::CloseCursor) {
            let cursor_id = self
                .cursor_id
                .ok_or_else(|| ProxyError::protocol("fetch/close order missing cursor id"))?;
            w.write_u32::<BigEndian>(cursor_id)?;
        }
        if matches!(self.shape, ResultShape::Rows | ResultShape::DeclareCursor) {
            w.write_u32::<BigEndian>(self.column_count)?;
        }
        w.write_u32::<BigEndian>(self.parameters.len() as u32)?;
        for param in &self.parameters {
            write_bytes(w, param)?;
        }
        Ok(())
    }

    pub fn decode(r: &mut impl Read) -> ProxyResult<Self> {
        let statement = String::from_utf8(read_bytes(r)?)
            .map_err(|e| ProxyError::protocol(format!("statement is not valid UTF-8: {e}")))?;
        let flags = r.read_u8()?;
        let blocking = flags & 0b0000_0001 != 0;
        let clear_schema_cache = flags & 0b0000_0010 != 0;
        let has_timestamp = flags & 0b0000_0100 != 0;
        let has_paging_size = flags & 0b0000_1000 != 0;
        let has_timeout = flags & 0b0001_0000 != 0;

        let consistency = Consistency::from_byte(r.read_u8()?)?;
        let timestamp = has_timestamp.then(|| r.read_i64::<BigEndian>()).transpose()?;
        let paging_size = has_paging_size.then(|| r.read_i32::<BigEndian>()).transpose()?;
        let timeout_ms = has_timeout.then(|| r.read_u32::<BigEndian>()).transpose()?;

        let shape = ResultShape::from_byte(r.read_u8()?)?;
        let cursor_id = if matches!(shape, ResultShape::FetchCursor | ResultShape::CloseCursor) {
            Some(r.read_u32::<BigEndian>()?)
        } else {
            None
        };
        let column_count = if matches!(shape, ResultShape::Rows | ResultShape::DeclareCursor) {
            r.read_u32::<BigEndian>()?
        } else {
            0
        };

        let param_count = r.read_u32::<BigEndian>()?;
        let mut parameters = Vec::with_capacity(param_count as usize);
        for _ in 0..param_count {
            parameters.push(read_bytes(r)?);
        }

        Ok(Self {
            statement,
            parameters,
            consistency,
            timestamp,
            paging_size,
            timeout_ms,
            shape,
            cursor_id,
            column_count,
            blocking,
            clear_schema_cache,
        })
    }
}

/// The framed reply to an order.
#[derive(Clone, Debug)]
pub enum DbResult {
    Success { values: Vec<Vec<u8>> },
    Error { code: i32, message: String },
}

impl DbResult {
    pub fn success(values: Vec<Vec<u8>>) -> Self {
        Self::Success { values }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn encode(&self, w: &mut impl Write) -> ProxyResult<()> {
        match self {
            Self::Success { values } => {
                w.write_u8(1)?;
                for v in values {
                    write_bytes(w, v)?;
                }
            }
            Self::Error { code, message } => {
                w.write_u8(0)?;
                w.write_i32::<BigEndian>(*code)?;
                write_bytes(w, message.as_bytes())?;
            }
        }
        Ok(())
    }

    /// Decodes a success reply by reading length-prefixed values until the
    /// payload is exhausted, or an error reply. The payload already carries
    /// its own length via the frame header, so the number of values is
    /// data-dependent rather than supplied by the caller - a `rows` reply
    /// may legitimately carry zero values, and a `declare-cursor` reply
    /// carries a variable number of rows after its cursor id.
    pub fn decode(payload: &[u8]) -> ProxyResult<Self> {
        let mut r = Cursor::new(payload);
        let succeeded = r.read_u8()? != 0;
        if succeeded {
            let mut values = Vec::new();
            while (r.position() as usize) < payload.len() {
                values.push(read_bytes(&mut r)?);
            }
            Ok(Self::Success { values })
        } else {
            let code = r.read_i32::<BigEndian>()?;
            let message = String::from_utf8(read_bytes(&mut r)?)
                .map_err(|e| ProxyError::protocol(format!("error message is not valid UTF-8: {e}")))?;
            Ok(Self::Error { code, message })
        }
    }
}

/// Reads one `tag + len + payload` frame, returning the tag and the raw
/// payload bytes. A reader must dispatch on the tag before calling the
/// relevant `decode` above.
pub fn read_frame(r: &mut impl Read) -> ProxyResult<([u8; 4], Vec<u8>)> {
    let mut tag = [0u8; 4];
    r.read_exact(&mut tag)?;
    let len = r.read_u32::<BigEndian>()?;
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    Ok((tag, payload))
}

pub fn write_frame(w: &mut impl Write, tag: [u8; 4], payload: &[u8]) -> ProxyResult<()> {
    w.write_all(&tag)?;
    w.write_u32::<BigEndian>(payload.len() as u32)?;
    w.write_all(payload)?;
    Ok(())
}

fn write_bytes(w: &mut impl Write, bytes: &[u8]) -> ProxyResult<()> {
    w.write_u32::<BigEndian>(bytes.len() as u32)?;
    w.write_all(bytes)?;
    Ok(())
}

fn read_bytes(r: &mut impl Read) -> ProxyResult<Vec<u8>> {
    let len = r.read_u32::<BigEndian>()?;
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn order_round_trips() {
        let order = Order {
            statement: "SELECT * FROM ks.tbl WHERE key = ?".into(),
            parameters: vec![vec![0u8, 1, 2, 0, 255], Vec::new()],
            consistency: Consistency::LocalQuorum,
            timestamp: Some(123456789),
            paging_size: Some(100),
            timeout_ms: Some(5000),
            shape: ResultShape::DeclareCursor,
            cursor_id: None,
            column_count: 2,
            blocking: true,
            clear_schema_cache: true,
        };
        let mut buf = Vec::new();
        order.encode(&mut buf).unwrap();
        let decoded = Order::decode(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded.statement, order.statement);
        assert_eq!(decoded.parameters, order.parameters);
        assert_eq!(decoded.consistency, order.consistency);
        assert_eq!(decoded.timestamp, order.timestamp);
        assert_eq!(decoded.paging_size, order.paging_size);
        assert_eq!(decoded.timeout_ms, order.timeout_ms);
        assert_eq!(decoded.shape, order.shape);
        assert_eq!(decoded.column_count, order.column_count);
        assert!(decoded.clear_schema_cache);
    }

    #[test]
    fn order_round_trips_large_binary_parameter() {
        let big = vec![0xABu8; 64 * 1024 * 1024];
        let order = Order {
            parameters: vec![big.clone()],
            ..Order::simple("INSERT INTO ks.tbl (v) VALUES (?)")
        };
        let mut buf = Vec::new();
        order.encode(&mut buf).unwrap();
        let decoded = Order::decode(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded.parameters, vec![big]);
    }

    #[test]
    fn fetch_order_requires_cursor_id() {
        let order = Order {
            shape: ResultShape::FetchCursor,
            cursor_id: None,
            ..Order::simple("")
        };
        let mut buf = Vec::new();
        assert!(order.encode(&mut buf).is_err());
    }

    #[test]
    fn result_round_trips_success() {
        let result = DbResult::success(vec![b"cluster1".to_vec()]);
        let mut buf = Vec::new();
        result.encode(&mut buf).unwrap();
        let decoded = DbResult::decode(&buf).unwrap();
        match decoded {
            DbResult::Success { values } => assert_eq!(values, vec![b"cluster1".to_vec()]),
            DbResult::Error { .. } => panic!("expected success"),
        }
    }

    #[test]
    fn result_round_trips_error() {
        let result = DbResult::Error {
            code: 16777226,
            message: "no hosts available".into(),
        };
        let mut buf = Vec::new();
        result.encode(&mut buf).unwrap();
        let decoded = DbResult::decode(&buf).unwrap();
        match decoded {
            DbResult::Error { code, message } => {
                assert_eq!(code, 16777226);
                assert_eq!(message, "no hosts available");
            }
            DbResult::Success { .. } => panic!("expected error"),
        }
    }

    #[test]
    fn empty_rows_result_decodes_to_zero_values() {
        let result = DbResult::success(Vec::new());
        let mut buf = Vec::new();
        result.encode(&mut buf).unwrap();
        let decoded = DbResult::decode(&buf).unwrap();
        match decoded {
            DbResult::Success { values } => assert!(values.is_empty()),
            DbResult::Error { .. } => panic!("expected success"),
        }
    }

    #[test]
    fn declare_cursor_result_decodes_cursor_id_and_rows_without_a_count() {
        let result = DbResult::success(vec![0u32.to_be_bytes().to_vec(), b"key0".to_vec(), b"key1".to_vec()]);
        let mut buf = Vec::new();
        result.encode(&mut buf).unwrap();
        let decoded = DbResult::decode(&buf).unwrap();
        match decoded {
            DbResult::Success { values } => {
                assert_eq!(values, vec![0u32.to_be_bytes().to_vec(), b"key0".to_vec(), b"key1".to_vec()]);
            }
            DbResult::Error { .. } => panic!("expected success"),
        }
    }

    #[test]
    fn frame_round_trips() {
        let mut buf = Vec::new();
        write_frame(&mut buf, TAG_REQUEST, b"hello").unwrap();
        let (tag, payload) = read_frame(&mut Cursor::new(buf)).unwrap();
        assert_eq!(tag, TAG_REQUEST);
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn zero_length_frame_is_legal() {
        let mut buf = Vec::new();
        write_frame(&mut buf, TAG_SUCCESS, &[]).unwrap();
        let (tag, payload) = read_frame(&mut Cursor::new(buf)).unwrap();
        assert_eq!(tag, TAG_SUCCESS);
        assert!(payload.is_empty());
    }
}
