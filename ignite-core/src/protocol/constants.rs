//! Protocol constants for the thin client binary protocol.

/// Size of the frame length prefix in bytes.
pub const SIZE_OF_LENGTH_FIELD: usize = 4;

/// Size of a request header after the length prefix (op code + request id).
pub const REQUEST_HEADER_SIZE: usize = 2 + 8;

/// Size of a response header after the length prefix (request id + flags).
pub const RESPONSE_HEADER_SIZE: usize = 8 + 2;

/// Default upper bound on a single frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Default thin client port.
pub const DEFAULT_PORT: u16 = 10800;

// ============================================================================
// Handshake
// ============================================================================

/// Handshake request marker byte.
pub const HANDSHAKE_OP: u8 = 1;

/// Client kind identifying a thin client.
pub const THIN_CLIENT_CODE: u8 = 2;

/// Server status reported for rejected credentials.
pub const STATUS_AUTH_FAILED: i32 = 2000;

// ============================================================================
// Response flags
// ============================================================================

/// Response carries an error status and message.
pub const RESPONSE_FLAG_ERROR: i16 = 0x0001;

/// Response carries a new affinity topology version.
pub const RESPONSE_FLAG_AFFINITY_CHANGED: i16 = 0x0002;

// ============================================================================
// Feature bits
// ============================================================================

/// Server supports cluster state operations.
pub const FEATURE_CLUSTER_API: usize = 2;

/// Features this client announces during the handshake.
pub const CLIENT_FEATURES: &[usize] = &[FEATURE_CLUSTER_API];

// ============================================================================
// Operation codes
// ============================================================================

/// Closes a server-side resource such as a cursor.
pub const OP_RESOURCE_CLOSE: i16 = 0;

/// Reads a single entry.
pub const OP_CACHE_GET: i16 = 1000;
/// Writes a single entry.
pub const OP_CACHE_PUT: i16 = 1001;
/// Reads several entries.
pub const OP_CACHE_GET_ALL: i16 = 1003;
/// Checks for a key.
pub const OP_CACHE_CONTAINS_KEY: i16 = 1011;
/// Removes every entry.
pub const OP_CACHE_CLEAR: i16 = 1013;
/// Removes a single entry.
pub const OP_CACHE_REMOVE_KEY: i16 = 1016;
/// Counts entries.
pub const OP_CACHE_GET_SIZE: i16 = 1020;

/// Lists cache names.
pub const OP_CACHE_GET_NAMES: i16 = 1050;
/// Creates a cache, failing if it exists.
pub const OP_CACHE_CREATE_WITH_NAME: i16 = 1051;
/// Creates a cache if missing.
pub const OP_CACHE_GET_OR_CREATE_WITH_NAME: i16 = 1052;
/// Destroys a cache.
pub const OP_CACHE_DESTROY: i16 = 1056;

/// Requests partition maps for caches.
pub const OP_CACHE_PARTITIONS: i16 = 1101;

/// Starts a scan query.
pub const OP_QUERY_SCAN: i16 = 2000;
/// Fetches the next scan page.
pub const OP_QUERY_SCAN_CURSOR_GET_PAGE: i16 = 2001;
/// Starts an SQL query returning entries.
pub const OP_QUERY_SQL: i16 = 2002;
/// Fetches the next SQL page.
pub const OP_QUERY_SQL_CURSOR_GET_PAGE: i16 = 2003;
/// Starts an SQL query returning rows of fields.
pub const OP_QUERY_SQL_FIELDS: i16 = 2004;
/// Fetches the next SQL-fields page.
pub const OP_QUERY_SQL_FIELDS_CURSOR_GET_PAGE: i16 = 2005;

/// Reads a registered binary type.
pub const OP_GET_BINARY_TYPE: i16 = 3002;
/// Registers a binary type.
pub const OP_PUT_BINARY_TYPE: i16 = 3003;

/// Reads the cluster state.
pub const OP_CLUSTER_GET_STATE: i16 = 5000;
/// Changes the cluster state.
pub const OP_CLUSTER_CHANGE_STATE: i16 = 5001;

/// Returns a readable name for an op code, for logging.
pub fn op_name(op_code: i16) -> &'static str {
    match op_code {
        OP_RESOURCE_CLOSE => "resource_close",
        OP_CACHE_GET => "cache_get",
        OP_CACHE_PUT => "cache_put",
        OP_CACHE_GET_ALL => "cache_get_all",
        OP_CACHE_CONTAINS_KEY => "cache_contains_key",
        OP_CACHE_CLEAR => "cache_clear",
        OP_CACHE_REMOVE_KEY => "cache_remove_key",
        OP_CACHE_GET_SIZE => "cache_get_size",
        OP_CACHE_GET_NAMES => "cache_get_names",
        OP_CACHE_CREATE_WITH_NAME => "cache_create_with_name",
        OP_CACHE_GET_OR_CREATE_WITH_NAME => "cache_get_or_create_with_name",
        OP_CACHE_DESTROY => "cache_destroy",
        OP_CACHE_PARTITIONS => "cache_partitions",
        OP_QUERY_SCAN => "query_scan",
        OP_QUERY_SCAN_CURSOR_GET_PAGE => "query_scan_cursor_get_page",
        OP_QUERY_SQL => "query_sql",
        OP_QUERY_SQL_CURSOR_GET_PAGE => "query_sql_cursor_get_page",
        OP_QUERY_SQL_FIELDS => "query_sql_fields",
        OP_QUERY_SQL_FIELDS_CURSOR_GET_PAGE => "query_sql_fields_cursor_get_page",
        OP_GET_BINARY_TYPE => "get_binary_type",
        OP_PUT_BINARY_TYPE => "put_binary_type",
        OP_CLUSTER_GET_STATE => "cluster_get_state",
        OP_CLUSTER_CHANGE_STATE => "cluster_change_state",
        _ => "unknown",
    }
}
