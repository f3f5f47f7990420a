//! Wraps the cluster driver session.
//!
//! Workers are blocking OS threads, but the only real Cassandra-class
//! driver available is async. `Handle::block_on` is the bridge: each
//! worker borrows the daemon's shared `tokio` runtime handle to drive a
//! `scylla::Session` future to completion without itself becoming async.
//! The session is internally thread-safe for concurrent queries, matching
//! the "shared resource" scheduling note.

use dbproxy_core::codec::Consistency as WireConsistency;
use dbproxy_core::error::{ProxyError, ProxyResult};
use scylla::frame::value::CqlValue;
use scylla::query::Query;
use scylla::statement::Consistency as DriverConsistency;
use scylla::{Session, SessionBuilder};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};

fn to_driver_consistency(c: WireConsistency) -> DriverConsistency {
    match c {
        WireConsistency::One => DriverConsistency::One,
        WireConsistency::Two => DriverConsistency::Two,
        WireConsistency::Three => DriverConsistency::Three,
        WireConsistency::Quorum => DriverConsistency::Quorum,
        WireConsistency::LocalQuorum => DriverConsistency::LocalQuorum,
        WireConsistency::EachQuorum => DriverConsistency::EachQuorum,
        WireConsistency::All => DriverConsistency::All,
        WireConsistency::Any => DriverConsistency::Any,
    }
}

/// A single page of query output: flattened column values, ready for the
/// codec to length-prefix and frame. `has_more` tells the declare/fetch
/// dispatch whether a cursor needs to be retained.
pub struct Page {
    pub values: Vec<Vec<u8>>,
    pub has_more: bool,
}

/// An open paging cursor bound to a prepared statement's row stream.
/// Held by the connection's `CursorRegistry` between `declare`/`fetch`
/// calls and dropped (releasing the driver-side iterator) on `close`.
pub struct PagingCursor {
    rows: std::vec::IntoIter<scylla::frame::response::result::Row>,
    paging_size: usize,
}

impl PagingCursor {
    /// A cursor with no further rows, registered so a later `fetch` or
    /// `close` against its id still finds a live (if empty) slot rather
    /// than a lifecycle error.
    pub fn exhausted(paging_size: usize) -> Self {
        Self {
            rows: Vec::new().into_iter(),
            paging_size,
        }
    }
}

/// Shared handle to the cluster. Cheap to clone; every clone shares the
/// same runtime and session slot.
#[derive(Clone)]
pub struct Driver {
    runtime: Arc<Runtime>,
    session: Arc<RwLock<Option<Arc<Session>>>>,
    hosts: Arc<Vec<String>>,
    port: u16,
}

impl Driver {
    pub fn new(hosts: Vec<String>, port: u16) -> ProxyResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| ProxyError::Driver {
                code: 0,
                message: format!("failed to start async runtime: {e}"),
                unreachable: true,
            })?;
        Ok(Self {
            runtime: Arc::new(runtime),
            session: Arc::new(RwLock::new(None)),
            hosts: Arc::new(hosts),
            port,
        })
    }

    pub fn handle(&self) -> Handle {
        self.runtime.handle().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.session.read().unwrap().is_some()
    }

    /// Attempts to (re)establish the cluster session. Called by the
    /// daemon's reconnect timer; throws on total unreachability.
    pub fn connect(&self) -> ProxyResult<()> {
        let known_nodes: Vec<String> = self.hosts.iter().map(|h| format!("{h}:{}", self.port)).collect();
        let session = self.handle().block_on(async {
            SessionBuilder::new().known_nodes(&known_nodes).build().await
        });
        match session {
            Ok(session) => {
                *self.session.write().unwrap() = Some(Arc::new(session));
                Ok(())
            }
            Err(e) => Err(ProxyError::Driver {
                code: 0,
                message: format!("cluster unreachable: {e}"),
                unreachable: true,
            }),
        }
    }

    fn current_session(&self) -> ProxyResult<Arc<Session>> {
        self.session
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| ProxyError::Driver {
                code: 0,
                message: "no cluster session established".into(),
                unreachable: true,
            })
    }

    /// Builds a query, optionally overriding its per-request timeout with
    /// a throwaway session (the driver does not support changing a
    /// session's timeout after it is established).
    fn prepared_query(
        &self,
        statement: &str,
        consistency: WireConsistency,
        timestamp: Option<i64>,
        paging_size: Option<i32>,
    ) -> Query {
        let mut query = Query::new(statement.to_string());
        query.set_consistency(to_driver_consistency(consistency));
        if let Some(ts) = timestamp {
            query.set_timestamp(Some(ts));
        }
        if let Some(size) = paging_size.filter(|s| *s > 0) {
            query.set_page_size(size);
        }
        query
    }

    /// Executes a statement with no expectation of rows back.
    pub fn execute(
        &self,
        statement: &str,
        parameters: &[CqlValue],
        consistency: WireConsistency,
        timestamp: Option<i64>,
        timeout_ms: Option<u32>,
    ) -> ProxyResult<()> {
        let session = self.session_for_request(timeout_ms)?;
        let query = self.prepared_query(statement, consistency, timestamp, None);
        self.handle()
            .block_on(session.query(query, parameters.to_vec()))
            .map_err(query_error)?;
        Ok(())
    }

    /// Executes a statement and collects up to one matching row's values.
    /// A statement that matches more than one row only ever yields its
    /// first; callers that need every row use `declare_cursor`/`fetch_page`.
    pub fn execute_rows(
        &self,
        statement: &str,
        parameters: &[CqlValue],
        consistency: WireConsistency,
        timestamp: Option<i64>,
        timeout_ms: Option<u32>,
    ) -> ProxyResult<Vec<Vec<u8>>> {
        let session = self.session_for_request(timeout_ms)?;
        let query = self.prepared_query(statement, consistency, timestamp, None);
        let result = self
            .handle()
            .block_on(session.query(query, parameters.to_vec()))
            .map_err(query_error)?;
        let rows = result.rows.unwrap_or_default();
        Ok(rows.first().map(row_to_values).unwrap_or_default())
    }

    /// Executes a paged statement, returning the first page and, when
    /// more pages remain, a cursor to retain in the connection's registry.
    pub fn declare_cursor(
        &self,
        statement: &str,
        parameters: &[CqlValue],
        consistency: WireConsistency,
        timestamp: Option<i64>,
        timeout_ms: Option<u32>,
        paging_size: i32,
    ) -> ProxyResult<(Page, Option<PagingCursor>)> {
        let session = self.session_for_request(timeout_ms)?;
        let query = self.prepared_query(statement, consistency, timestamp, Some(paging_size));
        let result = self
            .handle()
            .block_on(session.query(query, parameters.to_vec()))
            .map_err(query_error)?;
        let mut rows = result.rows.unwrap_or_default().into_iter();
        let page_size = paging_size.max(1) as usize;
        let (page, cursor) = take_page(&mut rows, page_size);
        Ok((page, cursor))
    }

    pub fn fetch_page(&self, cursor: &mut PagingCursor) -> Page {
        let (page, remainder) = take_page(&mut cursor.rows, cursor.paging_size);
        if let Some(remainder) = remainder {
            cursor.rows = remainder.rows;
        } else {
            cursor.rows = Vec::new().into_iter();
        }
        page
    }

    /// Lazily materializes a flat, opaque snapshot of the cluster's
    /// keyspace/table/column metadata.
    pub fn describe_cluster(&self) -> ProxyResult<Vec<u8>> {
        let session = self.current_session()?;
        let metadata = session.get_cluster_data();
        let mut blob = String::new();
        for (keyspace_name, keyspace) in metadata.get_keyspace_info() {
            blob.push_str(keyspace_name);
            blob.push('\n');
            for table_name in keyspace.tables.keys() {
                blob.push_str("  ");
                blob.push_str(table_name);
                blob.push('\n');
            }
        }
        Ok(blob.into_bytes())
    }

    fn session_for_request(&self, timeout_ms: Option<u32>) -> ProxyResult<Arc<Session>> {
        match timeout_ms.filter(|t| *t > 0) {
            None => self.current_session(),
            Some(ms) => {
                let known_nodes: Vec<String> = self.hosts.iter().map(|h| format!("{h}:{}", self.port)).collect();
                let timeout = Duration::from_millis(u64::from(ms));
                let session = self
                    .handle()
                    .block_on(async {
                        SessionBuilder::new()
                            .known_nodes(&known_nodes)
                            .connection_timeout(timeout)
                            .build()
                            .await
                    })
                    .map_err(|e| ProxyError::Driver {
                        code: 0,
                        message: format!("failed to open timed session: {e}"),
                        unreachable: true,
                    })?;
                Ok(Arc::new(session))
            }
        }
    }
}

fn take_page(
    rows: &mut std::vec::IntoIter<scylla::frame::response::result::Row>,
    page_size: usize,
) -> (Page, Option<PagingCursor>) {
    let mut values = Vec::new();
    let mut taken = 0;
    let mut remainder = Vec::new();
    for row in rows.by_ref() {
        if taken < page_size {
            values.extend(row_to_values(&row));
            taken += 1;
        } else {
            remainder.push(row);
        }
    }
    let has_more = !remainder.is_empty();
    let cursor = has_more.then(|| PagingCursor {
        rows: remainder.into_iter(),
        paging_size: page_size,
    });
    (Page { values, has_more }, cursor)
}

fn row_to_values(row: &scylla::frame::response::result::Row) -> Vec<Vec<u8>> {
    row.columns
        .iter()
        .map(|col| col.as_ref().map(cql_value_to_wire_bytes).unwrap_or_default())
        .collect()
}

/// Serializes one driver-native column value back to the flat bytes the
/// wire codec carries. Mirrors the driver's own CQL encoding rather than
/// inventing a parallel format, so a client linking the same driver can
/// decode a value with the driver's own deserializers if it chooses to.
fn cql_value_to_wire_bytes(value: &CqlValue) -> Vec<u8> {
    use scylla::frame::value::Value;
    let mut buf = Vec::new();
    let _ = value.serialize(&mut buf);
    buf
}

fn query_error(e: scylla::transport::errors::QueryError) -> ProxyError {
    let unreachable = matches!(
        e,
        scylla::transport::errors::QueryError::IoError(_)
            | scylla::transport::errors::QueryError::TimeoutError
            | scylla::transport::errors::QueryError::RequestTimeout(_)
    );
    ProxyError::Driver {
        code: 0,
        message: e.to_string(),
        unreachable,
    }
}
