//! Centralized default constants for the waveform event browser.
//!
//! Crates and binaries reference these instead of defining their own
//! magic values.

// =============================================================================
// RAW DATA
// =============================================================================

/// Root directory holding raw capture data, one subtree per system.
pub const DATA_DIR: &str = "/usr/opsdata/waveforms";

/// Suffix of a compressed event directory.
pub const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// Capture file extension recognized inside an event directory or archive.
pub const CAPTURE_FILE_EXTENSION: &str = "txt";

/// Name of the time column heading every capture file.
pub const TIME_COLUMN: &str = "time";

// =============================================================================
// EXPORT
// =============================================================================

/// Header of the time axis column in CSV exports.
pub const CSV_TIME_HEADER: &str = "time_offset";

/// Text written for a missing aligned value in CSV exports.
pub const CSV_MISSING_VALUE: &str = "NaN";

// =============================================================================
// ENVIRONMENT
// =============================================================================

/// Environment variable naming the database connection URL.
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

/// Environment variable overriding [`DATA_DIR`].
pub const ENV_DATA_DIR: &str = "WFB_DATA_DIR";

/// Environment variable overriding the pool's maximum connections.
pub const ENV_DB_MAX_CONNECTIONS: &str = "WFB_DB_MAX_CONNECTIONS";

/// Environment variable overriding the pool's connect timeout, in seconds.
pub const ENV_DB_CONNECT_TIMEOUT_SECS: &str = "WFB_DB_CONNECT_TIMEOUT_SECS";
