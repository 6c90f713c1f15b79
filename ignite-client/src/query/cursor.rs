//! Server-side query cursors.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::Stream;
use ignite_core::protocol::{
    Request, Response, OP_QUERY_SCAN, OP_QUERY_SCAN_CURSOR_GET_PAGE, OP_QUERY_SQL,
    OP_QUERY_SQL_CURSOR_GET_PAGE, OP_QUERY_SQL_FIELDS, OP_QUERY_SQL_FIELDS_CURSOR_GET_PAGE,
    OP_RESOURCE_CLOSE,
};
use ignite_core::{
    DataInput, DataOutput, Deserializable, IgniteError, ObjectDataInput, Result, WireValue,
};
use parking_lot::Mutex;
use tracing::instrument;

use super::options::{ScanQuery, SqlFieldsQuery, SqlQuery};
use crate::cache::CacheDescriptor;
use crate::connection::{Connection, ConnectionId};
use crate::router::{AffinityHint, Router};

/// A row type a cursor page can be decoded into.
pub trait CursorRow: Sized + Send + 'static {
    /// Decodes one page body. `field_count` is zero for entry cursors.
    fn read_page(input: &mut ObjectDataInput<'_>, field_count: usize) -> Result<Vec<Self>>;
}

impl CursorRow for (WireValue, WireValue) {
    fn read_page(input: &mut ObjectDataInput<'_>, _field_count: usize) -> Result<Vec<Self>> {
        let count = input.read_len()?;
        let mut entries = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let key = WireValue::read_from(input)?;
            let value = WireValue::read_from(input)?;
            entries.push((key, value));
        }
        Ok(entries)
    }
}

impl CursorRow for Vec<WireValue> {
    fn read_page(input: &mut ObjectDataInput<'_>, field_count: usize) -> Result<Vec<Self>> {
        let count = input.read_len()?;
        let mut rows = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let mut row = Vec::with_capacity(field_count);
            for _ in 0..field_count {
                row.push(WireValue::read_from(input)?);
            }
            rows.push(row);
        }
        Ok(rows)
    }
}

/// Cursor over `(key, value)` entries from scan and SQL queries.
pub type EntryCursor = Cursor<(WireValue, WireValue)>;

/// Cursor over rows from SQL-fields queries.
pub type FieldsCursor = Cursor<Vec<WireValue>>;

/// Lifecycle of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorState {
    /// The server holds more pages.
    Open,
    /// The server sent the last page and released the cursor.
    Exhausted,
    /// Closed by the client, or lost with its connection.
    Closed,
}

impl fmt::Display for CursorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Exhausted => write!(f, "EXHAUSTED"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Cursors the server still holds, keyed by connection and cursor id.
///
/// Each entry shares a revocation flag with its [`Cursor`], so closing the
/// client can release the server resources and invalidate the handles.
#[derive(Debug, Default)]
pub(crate) struct CursorTable {
    open: Mutex<HashMap<(ConnectionId, i64), OpenCursor>>,
}

#[derive(Debug)]
struct OpenCursor {
    connection: Arc<Connection>,
    revoked: Arc<AtomicBool>,
}

impl CursorTable {
    fn register(&self, connection: &Arc<Connection>, id: i64) -> Arc<AtomicBool> {
        let revoked = Arc::new(AtomicBool::new(false));
        self.open.lock().insert(
            (connection.id(), id),
            OpenCursor {
                connection: Arc::clone(connection),
                revoked: Arc::clone(&revoked),
            },
        );
        revoked
    }

    fn release(&self, connection: ConnectionId, id: i64) {
        self.open.lock().remove(&(connection, id));
    }

    /// Returns the number of cursors the server still holds.
    pub(crate) fn len(&self) -> usize {
        self.open.lock().len()
    }

    /// Revokes every registered cursor and asks the server to release each
    /// one. Failures are logged and skipped. Returns the number revoked.
    pub(crate) async fn close_all(&self) -> usize {
        let drained: Vec<_> = self.open.lock().drain().collect();
        for (_, cursor) in &drained {
            cursor.revoked.store(true, Ordering::Release);
        }
        let closes = drained.iter().map(|((_, id), cursor)| async move {
            let result = match close_request(*id, &cursor.connection) {
                Ok(request) => cursor.connection.request(&request).await.map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::debug!(cursor = id, id = %cursor.connection.id(), error = %e, "cursor release failed");
            }
        });
        futures::future::join_all(closes).await;
        drained.len()
    }
}

/// Forward-only iteration over a server-side result set.
///
/// Pages are fetched lazily on the connection that opened the query, since
/// cursor ids are only meaningful to the node that issued them. The server
/// releases the cursor when it sends the last page; otherwise
/// [`close`](Self::close) releases it. A cursor dropped while still open
/// releases it in the background when a tokio runtime is available.
/// Closing the client releases every open cursor and closes its handle.
pub struct Cursor<T: CursorRow> {
    id: i64,
    connection: Arc<Connection>,
    router: Arc<Router>,
    page_op: i16,
    buffer: VecDeque<T>,
    state: CursorState,
    pages_fetched: usize,
    field_count: usize,
    field_names: Vec<String>,
    revoked: Arc<AtomicBool>,
}

impl<T: CursorRow> fmt::Debug for Cursor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("id", &self.id)
            .field("connection", &self.connection.id())
            .field("state", &self.state)
            .field("buffered", &self.buffer.len())
            .field("pages_fetched", &self.pages_fetched)
            .finish()
    }
}

impl EntryCursor {
    /// Submits a scan query and returns a cursor over its first page.
    #[instrument(name = "query.scan", skip_all, fields(cache = cache.name()))]
    pub(crate) async fn scan(router: Arc<Router>, cache: &CacheDescriptor, query: &ScanQuery) -> Result<Self> {
        let mut request = Request::for_cache(OP_QUERY_SCAN, cache.cache_id(), order(&router))?;
        query.write_to(&mut request)?;
        let hint = query
            .target_partition()
            .map(|partition| AffinityHint::Partition { cache, partition });
        let (connection, response) = router.dispatch_pinned(&request, hint).await?;
        Self::open(router, connection, OP_QUERY_SCAN_CURSOR_GET_PAGE, &response, 0, Vec::new())
    }

    /// Submits a SQL query and returns a cursor over its first page.
    #[instrument(name = "query.sql", skip_all, fields(cache = cache.name()))]
    pub(crate) async fn sql(router: Arc<Router>, cache: &CacheDescriptor, query: &SqlQuery) -> Result<Self> {
        let mut request = Request::for_cache(OP_QUERY_SQL, cache.cache_id(), order(&router))?;
        query.write_to(&mut request)?;
        let (connection, response) = router.dispatch_pinned(&request, None).await?;
        Self::open(router, connection, OP_QUERY_SQL_CURSOR_GET_PAGE, &response, 0, Vec::new())
    }
}

impl FieldsCursor {
    /// Submits a SQL-fields query and returns a cursor over its first page.
    #[instrument(name = "query.sql_fields", skip_all, fields(cache = cache.name()))]
    pub(crate) async fn sql_fields(
        router: Arc<Router>,
        cache: &CacheDescriptor,
        query: &SqlFieldsQuery,
    ) -> Result<Self> {
        let mut request = Request::for_cache(OP_QUERY_SQL_FIELDS, cache.cache_id(), order(&router))?;
        query.write_to(&mut request)?;
        let (connection, response) = router.dispatch_pinned(&request, None).await?;

        let mut input = response.reader();
        let id = input.read_long()?;
        let field_count = input.read_len()?;
        let mut field_names = Vec::new();
        if query.includes_field_names() {
            field_names.reserve(field_count.min(1024));
            for _ in 0..field_count {
                field_names.push(String::from_wire(WireValue::read_from(&mut input)?)?);
            }
        }
        let mut cursor = Self::new(id, connection, router, OP_QUERY_SQL_FIELDS_CURSOR_GET_PAGE, field_count, field_names);
        cursor.apply_page(&mut input)?;
        cursor.track();
        Ok(cursor)
    }

    /// Returns the number of columns per row.
    pub fn field_count(&self) -> usize {
        self.field_count
    }

    /// Returns column names, empty unless the query asked for them.
    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }
}

fn order(router: &Router) -> ignite_core::ByteOrder {
    router.pool().options().byte_order()
}

impl<T: CursorRow> Cursor<T> {
    fn new(
        id: i64,
        connection: Arc<Connection>,
        router: Arc<Router>,
        page_op: i16,
        field_count: usize,
        field_names: Vec<String>,
    ) -> Self {
        Self {
            id,
            connection,
            router,
            page_op,
            buffer: VecDeque::new(),
            state: CursorState::Open,
            pages_fetched: 0,
            field_count,
            field_names,
            revoked: Arc::new(AtomicBool::new(false)),
        }
    }

    fn track(&mut self) {
        if self.state == CursorState::Open {
            self.revoked = self.router.cursors().register(&self.connection, self.id);
        }
    }

    fn untrack(&self) {
        self.router.cursors().release(self.connection.id(), self.id);
    }

    fn check_revoked(&mut self) {
        if self.state == CursorState::Open && self.revoked.load(Ordering::Acquire) {
            self.state = CursorState::Closed;
            self.buffer.clear();
        }
    }

    fn open(
        router: Arc<Router>,
        connection: Arc<Connection>,
        page_op: i16,
        response: &Response,
        field_count: usize,
        field_names: Vec<String>,
    ) -> Result<Self> {
        let mut input = response.reader();
        let id = input.read_long()?;
        let mut cursor = Self::new(id, connection, router, page_op, field_count, field_names);
        cursor.apply_page(&mut input)?;
        cursor.track();
        tracing::debug!(
            cursor = id,
            id = %cursor.connection.id(),
            rows = cursor.buffer.len(),
            more = cursor.has_more(),
            "cursor opened"
        );
        Ok(cursor)
    }

    fn apply_page(&mut self, input: &mut ObjectDataInput<'_>) -> Result<()> {
        let rows = T::read_page(input, self.field_count)?;
        let more = input.read_bool()?;
        self.buffer.extend(rows);
        self.pages_fetched += 1;
        if !more && self.state == CursorState::Open {
            self.state = CursorState::Exhausted;
            self.untrack();
        }
        Ok(())
    }

    /// Returns the server-side cursor id.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Returns the current state. A cursor revoked by closing the client
    /// reports [`CursorState::Closed`].
    pub fn state(&self) -> CursorState {
        if self.state == CursorState::Open && self.revoked.load(Ordering::Acquire) {
            return CursorState::Closed;
        }
        self.state
    }

    /// Returns true while the server holds further pages.
    pub fn has_more(&self) -> bool {
        self.state() == CursorState::Open
    }

    /// Returns the number of pages received, including the first one.
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Returns the number of rows received but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Requests the next page into the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`IgniteError::Usage`] without contacting the server once the
    /// cursor is exhausted or closed, including after the client was closed.
    /// A connection failure is returned as is and closes the cursor, since
    /// its server-side state died with the connection.
    #[instrument(name = "cursor.fetch_next_page", skip(self), fields(cursor = self.id))]
    pub async fn fetch_next_page(&mut self) -> Result<()> {
        self.check_revoked();
        if self.state != CursorState::Open {
            return Err(IgniteError::Usage(format!(
                "cannot fetch from {} cursor {}",
                self.state, self.id
            )));
        }

        let mut request = Request::new(self.page_op, self.connection.byte_order());
        request.writer().write_long(self.id)?;
        let response = match self.router.dispatch_on(&self.connection, &request).await {
            Ok(response) => response,
            Err(e) => {
                if e.is_retryable() {
                    self.state = CursorState::Closed;
                    self.buffer.clear();
                    self.untrack();
                }
                return Err(e);
            }
        };
        self.apply_page(&mut response.reader())
    }

    /// Returns the next row, fetching a page when the buffer is empty.
    ///
    /// Returns `Ok(None)` once the cursor is exhausted and every buffered row
    /// has been consumed; further calls keep returning `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`IgniteError::Usage`] on a closed cursor, and any error of
    /// [`fetch_next_page`](Self::fetch_next_page) when a page is needed.
    pub async fn next(&mut self) -> Result<Option<T>> {
        self.check_revoked();
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Ok(Some(row));
            }
            match self.state {
                CursorState::Exhausted => return Ok(None),
                CursorState::Closed => {
                    return Err(IgniteError::Usage(format!("cursor {} is closed", self.id)))
                }
                CursorState::Open => self.fetch_next_page().await?,
            }
        }
    }

    /// Releases the server-side cursor.
    ///
    /// Sends a close request only while the server still holds the cursor.
    /// Calling it again is a no-op.
    #[instrument(name = "cursor.close", skip(self), fields(cursor = self.id))]
    pub async fn close(&mut self) -> Result<()> {
        self.check_revoked();
        let previous = std::mem::replace(&mut self.state, CursorState::Closed);
        self.buffer.clear();
        if previous != CursorState::Open {
            return Ok(());
        }
        self.untrack();
        let request = close_request(self.id, &self.connection)?;
        self.router.dispatch_on(&self.connection, &request).await?;
        tracing::debug!(id = %self.connection.id(), "cursor closed");
        Ok(())
    }

    /// Feeds every remaining row to `f`.
    ///
    /// If `f` or a page fetch fails, the cursor is closed on a best-effort
    /// basis and the original error is returned.
    pub async fn try_for_each<F>(mut self, mut f: F) -> Result<()>
    where
        F: FnMut(T) -> Result<()>,
    {
        loop {
            let step = match self.next().await {
                Ok(Some(row)) => f(row),
                Ok(None) => return Ok(()),
                Err(e) => Err(e),
            };
            if let Err(e) = step {
                if let Err(close_error) = self.close().await {
                    tracing::warn!(cursor = self.id, error = %close_error, "failed to close cursor after error");
                }
                return Err(e);
            }
        }
    }

    /// Collects every remaining row.
    pub async fn collect_all(self) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        self.try_for_each(|row| {
            rows.push(row);
            Ok(())
        })
        .await?;
        Ok(rows)
    }

    /// Converts the cursor into a stream of rows that ends after the first
    /// error.
    pub fn into_stream(self) -> impl Stream<Item = Result<T>> + Send {
        futures::stream::unfold(Some(self), |cursor| async move {
            let mut cursor = cursor?;
            match cursor.next().await {
                Ok(Some(row)) => Some((Ok(row), Some(cursor))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

fn close_request(id: i64, connection: &Connection) -> Result<Request> {
    let mut request = Request::new(OP_RESOURCE_CLOSE, connection.byte_order());
    request.writer().write_long(id)?;
    Ok(request)
}

impl<T: CursorRow> Drop for Cursor<T> {
    fn drop(&mut self) {
        if self.state != CursorState::Open || self.revoked.load(Ordering::Acquire) {
            return;
        }
        self.state = CursorState::Closed;
        self.untrack();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(cursor = self.id, "cursor dropped outside a runtime; server resource leaked");
            return;
        };
        let id = self.id;
        let connection = Arc::clone(&self.connection);
        let router = Arc::clone(&self.router);
        handle.spawn(async move {
            let result = match close_request(id, &connection) {
                Ok(request) => router.dispatch_on(&connection, &request).await.map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::debug!(cursor = id, error = %e, "background cursor close failed");
            }
        });
    }
}
