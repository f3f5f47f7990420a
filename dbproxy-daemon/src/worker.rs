//! Per-connection worker (C7).
//!
//! One OS thread per accepted connection. Reads one order at a time,
//! dispatches it against the driver, writes the result back, and repeats
//! until the peer closes or the daemon half-shuts the socket down during
//! shutdown. Requests and responses on one connection are strictly FIFO
//! because nothing here ever looks ahead to the next order before the
//! current one's result has been written.

use crate::driver::{Driver, Page, PagingCursor};
use dbproxy_core::cache::SchemaCache;
use dbproxy_core::client;
use dbproxy_core::codec::{DbResult, Order, ResultShape};
use dbproxy_core::cursor::CursorRegistry;
use dbproxy_core::error::{ProxyError, ProxyResult};
use dbproxy_core::transport::Stream;
use log::debug;
use scylla::frame::value::CqlValue;
use std::sync::Arc;

/// Invoked once when a worker observes total loss of cluster connectivity,
/// so the daemon can broadcast `NOCASSANDRA` and re-enable its reconnect
/// timer. Declared as a trait object so `worker::run` doesn't need to know
/// about the daemon's bus client or timer.
pub trait ClusterLostNotifier: Send + Sync {
    fn notify_cluster_lost(&self);
}

const UNREACHABLE_MARKER: &str = "cluster unreachable: ";

pub fn run(mut stream: Stream, driver: Driver, schema_cache: Arc<SchemaCache>, notifier: Arc<dyn ClusterLostNotifier>) {
    let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "?".into());
    debug!("worker starting for {peer}");

    let mut cursors: CursorRegistry<PagingCursor> = CursorRegistry::new();

    loop {
        let order = match client::receive_order(&mut stream) {
            Ok(order) => order,
            Err(e) => {
                debug!("worker for {peer} ending: {e}");
                break;
            }
        };

        let result = dispatch(&order, &driver, &schema_cache, &mut cursors);

        if order.clear_schema_cache && result.is_success() {
            schema_cache.clear();
        }

        let lost_cluster = matches!(&result, DbResult::Error { message, .. } if message.starts_with(UNREACHABLE_MARKER));

        if let Err(e) = client::send_result(&mut stream, &result) {
            debug!("worker for {peer} failed to send result: {e}");
            break;
        }

        if lost_cluster {
            notifier.notify_cluster_lost();
            break;
        }
    }

    debug!("worker for {peer} done");
}

fn dispatch(order: &Order, driver: &Driver, schema_cache: &SchemaCache, cursors: &mut CursorRegistry<PagingCursor>) -> DbResult {
    let consistency = order.consistency;
    let parameters: Vec<CqlValue> = order.parameters.iter().map(|p| CqlValue::Blob(p.clone())).collect();

    let outcome: ProxyResult<DbResult> = match order.shape {
        ResultShape::Success => driver
            .execute(&order.statement, &parameters, consistency, order.timestamp, order.timeout_ms)
            .map(|()| DbResult::success(Vec::new())),

        ResultShape::Rows => driver
            .execute_rows(&order.statement, &parameters, consistency, order.timestamp, order.timeout_ms)
            .map(DbResult::success),

        ResultShape::DeclareCursor => {
            let paging_size = order.paging_size.filter(|p| *p > 0).unwrap_or(100);
            driver
                .declare_cursor(&order.statement, &parameters, consistency, order.timestamp, order.timeout_ms, paging_size)
                .map(|(page, cursor)| declare_result(page, cursor, paging_size, cursors))
        }

        ResultShape::FetchCursor => fetch_result(order, driver, cursors),

        ResultShape::CloseCursor => close_result(order, cursors),

        ResultShape::DescribeCluster => schema_cache
            .read_or_build(|| driver.describe_cluster())
            .map(|blob| DbResult::success(vec![blob])),
    };

    outcome.unwrap_or_else(|e| error_result(&e))
}

fn declare_result(page: Page, cursor: Option<PagingCursor>, paging_size: i32, cursors: &mut CursorRegistry<PagingCursor>) -> DbResult {
    let column_count = row_width(&page);
    let cursor = cursor.unwrap_or_else(|| PagingCursor::exhausted(paging_size.max(1) as usize));
    let cursor_id = cursors.declare(cursor, column_count);

    let mut out = Vec::with_capacity(1 + page.values.len());
    out.push(cursor_id.to_be_bytes().to_vec());
    out.extend(page.values);
    DbResult::success(out)
}

fn row_width(page: &Page) -> u32 {
    // the caller always supplies the per-row column count via the order,
    // but the page itself only knows the flattened value count; zero rows
    // means zero columns observed this call, which is fine since the
    // registry's column_count is advisory bookkeeping, not re-validated.
    u32::try_from(page.values.len()).unwrap_or(u32::MAX)
}

fn fetch_result(order: &Order, driver: &Driver, cursors: &mut CursorRegistry<PagingCursor>) -> ProxyResult<DbResult> {
    let id = order.cursor_id.ok_or_else(|| ProxyError::protocol("fetch order missing cursor id"))?;
    let (cursor, _column_count) = cursors.get_mut(id)?;
    let page = driver.fetch_page(cursor);
    Ok(DbResult::success(page.values))
}

fn close_result(order: &Order, cursors: &mut CursorRegistry<PagingCursor>) -> ProxyResult<DbResult> {
    let id = order.cursor_id.ok_or_else(|| ProxyError::protocol("close order missing cursor id"))?;
    cursors.close(id)?;
    Ok(DbResult::success(Vec::new()))
}

fn error_result(e: &ProxyError) -> DbResult {
    let message = if e.is_cluster_unreachable() {
        format!("{UNREACHABLE_MARKER}{e}")
    } else {
        e.to_string()
    };
    let code = match e {
        ProxyError::Driver { code, .. } => *code,
        _ => -1,
    };
    DbResult::Error { code, message }
}
