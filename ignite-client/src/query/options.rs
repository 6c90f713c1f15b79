//! Query descriptions.

use std::time::Duration;

use ignite_core::protocol::Request;
use ignite_core::{DataOutput, IgniteError, Result, Serializable, WireValue};

/// Rows per page when none is configured.
pub const DEFAULT_PAGE_SIZE: i32 = 1024;

fn check_page_size(page_size: i32) -> Result<()> {
    if page_size <= 0 {
        return Err(IgniteError::Usage(format!(
            "page size must be positive, got {}",
            page_size
        )));
    }
    Ok(())
}

fn timeout_millis(timeout: Option<Duration>) -> i64 {
    timeout.map_or(0, |t| i64::try_from(t.as_millis()).unwrap_or(i64::MAX))
}

fn write_args(request: &mut Request, args: &[WireValue]) -> Result<()> {
    let count = i32::try_from(args.len())
        .map_err(|_| IgniteError::Usage("too many query arguments".to_string()))?;
    request.writer().write_int(count)?;
    for arg in args {
        request.write_value(arg)?;
    }
    Ok(())
}

/// Iterates over all entries of a cache, or of one partition.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanQuery {
    page_size: i32,
    partition: Option<usize>,
    local: bool,
}

impl ScanQuery {
    /// Creates a scan over the whole cache.
    pub fn new() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            partition: None,
            local: false,
        }
    }

    /// Sets the number of entries per page.
    pub fn page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Restricts the scan to one partition; the request goes to its owner.
    pub fn partition(mut self, partition: usize) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Scans only data held by the node that receives the request.
    pub fn local(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    /// Returns the targeted partition.
    pub fn target_partition(&self) -> Option<usize> {
        self.partition
    }

    pub(crate) fn write_to(&self, request: &mut Request) -> Result<()> {
        check_page_size(self.page_size)?;
        let partition = match self.partition {
            Some(p) => i32::try_from(p)
                .map_err(|_| IgniteError::Usage(format!("partition {} out of range", p)))?,
            None => -1,
        };
        request.write_value(&WireValue::Null)?;
        let out = request.writer();
        out.write_int(self.page_size)?;
        out.write_int(partition)?;
        out.write_bool(self.local)
    }
}

impl Default for ScanQuery {
    fn default() -> Self {
        Self::new()
    }
}

/// Selects whole cache entries with a SQL `WHERE` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    table: String,
    sql: String,
    args: Vec<WireValue>,
    distributed_joins: bool,
    local: bool,
    replicated_only: bool,
    page_size: i32,
    timeout: Option<Duration>,
}

impl SqlQuery {
    /// Creates a query over the value type `table`.
    pub fn new(table: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            sql: sql.into(),
            args: Vec::new(),
            distributed_joins: false,
            local: false,
            replicated_only: false,
            page_size: DEFAULT_PAGE_SIZE,
            timeout: None,
        }
    }

    /// Appends a positional argument.
    pub fn arg<T: Serializable + ?Sized>(mut self, value: &T) -> Result<Self> {
        self.args.push(value.to_wire()?);
        Ok(self)
    }

    /// Replaces all positional arguments.
    pub fn args(mut self, args: Vec<WireValue>) -> Self {
        self.args = args;
        self
    }

    /// Allows joins across non-collocated data.
    pub fn distributed_joins(mut self, enabled: bool) -> Self {
        self.distributed_joins = enabled;
        self
    }

    /// Queries only the receiving node.
    pub fn local(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    /// Hints that only replicated caches are involved.
    pub fn replicated_only(mut self, enabled: bool) -> Self {
        self.replicated_only = enabled;
        self
    }

    /// Sets the number of entries per page.
    pub fn page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets a server-side execution timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn write_to(&self, request: &mut Request) -> Result<()> {
        check_page_size(self.page_size)?;
        request.write(self.table.as_str())?;
        request.write(self.sql.as_str())?;
        write_args(request, &self.args)?;
        let out = request.writer();
        out.write_bool(self.distributed_joins)?;
        out.write_bool(self.local)?;
        out.write_bool(self.replicated_only)?;
        out.write_int(self.page_size)?;
        out.write_long(timeout_millis(self.timeout))
    }
}

/// Kind of statement a fields query may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum StatementType {
    /// Any statement.
    #[default]
    Any = 0,
    /// Only `SELECT`.
    Select = 1,
    /// Only DML and DDL.
    Update = 2,
}

/// Runs arbitrary SQL returning rows of fields.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFieldsQuery {
    schema: Option<String>,
    sql: String,
    args: Vec<WireValue>,
    page_size: i32,
    max_rows: i32,
    statement_type: StatementType,
    distributed_joins: bool,
    local: bool,
    replicated_only: bool,
    enforce_join_order: bool,
    collocated: bool,
    lazy: bool,
    timeout: Option<Duration>,
    include_field_names: bool,
}

impl SqlFieldsQuery {
    /// Creates a query for `sql`.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            schema: None,
            sql: sql.into(),
            args: Vec::new(),
            page_size: DEFAULT_PAGE_SIZE,
            max_rows: -1,
            statement_type: StatementType::Any,
            distributed_joins: false,
            local: false,
            replicated_only: false,
            enforce_join_order: false,
            collocated: false,
            lazy: false,
            timeout: None,
            include_field_names: false,
        }
    }

    /// Sets the schema unqualified names resolve in.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Appends a positional argument.
    pub fn arg<T: Serializable + ?Sized>(mut self, value: &T) -> Result<Self> {
        self.args.push(value.to_wire()?);
        Ok(self)
    }

    /// Replaces all positional arguments.
    pub fn args(mut self, args: Vec<WireValue>) -> Self {
        self.args = args;
        self
    }

    /// Sets the number of rows per page.
    pub fn page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Caps the total number of rows; negative means unlimited.
    pub fn max_rows(mut self, max_rows: i32) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Restricts which statements are accepted.
    pub fn statement_type(mut self, statement_type: StatementType) -> Self {
        self.statement_type = statement_type;
        self
    }

    /// Allows joins across non-collocated data.
    pub fn distributed_joins(mut self, enabled: bool) -> Self {
        self.distributed_joins = enabled;
        self
    }

    /// Queries only the receiving node.
    pub fn local(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    /// Hints that only replicated caches are involved.
    pub fn replicated_only(mut self, enabled: bool) -> Self {
        self.replicated_only = enabled;
        self
    }

    /// Keeps the join order written in the query.
    pub fn enforce_join_order(mut self, enabled: bool) -> Self {
        self.enforce_join_order = enabled;
        self
    }

    /// Declares that grouped data is collocated.
    pub fn collocated(mut self, enabled: bool) -> Self {
        self.collocated = enabled;
        self
    }

    /// Streams results instead of materialising them on the server.
    pub fn lazy(mut self, enabled: bool) -> Self {
        self.lazy = enabled;
        self
    }

    /// Sets a server-side execution timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns column names ahead of the first page.
    pub fn include_field_names(mut self, enabled: bool) -> Self {
        self.include_field_names = enabled;
        self
    }

    pub(crate) fn includes_field_names(&self) -> bool {
        self.include_field_names
    }

    pub(crate) fn write_to(&self, request: &mut Request) -> Result<()> {
        check_page_size(self.page_size)?;
        match &self.schema {
            Some(schema) => request.write(schema.as_str())?,
            None => request.write_value(&WireValue::Null)?,
        }
        request.writer().write_int(self.page_size)?;
        request.writer().write_int(self.max_rows)?;
        request.write(self.sql.as_str())?;
        write_args(request, &self.args)?;
        let out = request.writer();
        out.write_u8(self.statement_type as u8)?;
        out.write_bool(self.distributed_joins)?;
        out.write_bool(self.local)?;
        out.write_bool(self.replicated_only)?;
        out.write_bool(self.enforce_join_order)?;
        out.write_bool(self.collocated)?;
        out.write_bool(self.lazy)?;
        out.write_long(timeout_millis(self.timeout))?;
        out.write_bool(self.include_field_names)
    }
}
