//! Structured logging schema and field name constants.
//!
//! Both crates use these names for structured `tracing` fields so that log
//! aggregation can query by the same keys across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, rejected request, rolled back transaction |
//! | INFO  | Lifecycle events (startup, pool creation), write completions |
//! | DEBUG | Decision points (alignment path, filter shape), query completions |
//! | TRACE | Per-item iteration (rows, capture files, waveforms) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "core", "db", "cli"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "aligner", "assembler", "events", "series", "pool", "capture_source"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "insert", "list", "align", "export_csv"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Event id being operated on.
pub const EVENT_ID: &str = "event_id";

/// Capture file name being operated on.
pub const FILENAME: &str = "filename";

/// Series id being operated on.
pub const SERIES_ID: &str = "series_id";

/// Waveform system name.
pub const SYSTEM: &str = "system";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of results returned by a query.
pub const RESULT_COUNT: &str = "result_count";

/// Number of rows consumed from a cursor.
pub const ROW_COUNT: &str = "row_count";

/// Number of waveforms taking part in an alignment.
pub const WAVEFORM_COUNT: &str = "waveform_count";

/// Number of rows on an aligned time axis.
pub const AXIS_LEN: &str = "axis_len";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

/// Number of bind parameters in a generated query.
pub const PARAM_COUNT: &str = "param_count";

/// Number of rows affected by an update or delete.
pub const ROWS_AFFECTED: &str = "rows_affected";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Whether alignment used the shared-grid fast path.
pub const CONSISTENT: &str = "consistent";
