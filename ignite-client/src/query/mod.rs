//! Scan, SQL and SQL-fields queries and the cursors that page their results.
//!
//! A query returns a [`Cursor`] holding its first page. Further pages are
//! requested on demand from the node that ran the query:
//!
//! ```no_run
//! # async fn run(cache: ignite_client::Cache) -> ignite_client::Result<()> {
//! use ignite_client::query::ScanQuery;
//!
//! let mut cursor = cache.scan(ScanQuery::new().page_size(100)).await?;
//! while let Some((key, value)) = cursor.next().await? {
//!     println!("{:?} => {:?}", key, value);
//! }
//! # Ok(())
//! # }
//! ```

mod cursor;
mod options;

pub(crate) use cursor::CursorTable;
pub use cursor::{Cursor, CursorRow, CursorState, EntryCursor, FieldsCursor};
pub use options::{ScanQuery, SqlFieldsQuery, SqlQuery, StatementType, DEFAULT_PAGE_SIZE};
