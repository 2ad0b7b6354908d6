//! Defaults shared across the query layer.

/// Page size used when a query is opened without an explicit limit.
pub const DEFAULT_LIMIT: usize = 50;

/// Number of group descriptors requested per group lookup.
pub const GROUP_PAGE_SIZE: usize = 20;

/// Attempts made for one archive blob before giving up.
pub const ARCHIVE_RETRY_ATTEMPTS: u32 = 5;

/// Delay between archive fetch attempts.
pub const ARCHIVE_RETRY_DELAY_MS: u64 = 1000;

pub const DEFAULT_WORKSPACE: &str = "default";

/// `:workspace` and `:blobId` are substituted per fetch.
pub const DEFAULT_ARCHIVE_URL_TEMPLATE: &str = "http://localhost:4030/blob/:workspace/:blobId";

// Environment overrides
pub const ENV_WORKSPACE: &str = "TIDINGS_WORKSPACE";
pub const ENV_ARCHIVE_URL: &str = "TIDINGS_ARCHIVE_URL";
pub const ENV_ARCHIVE_RETRIES: &str = "TIDINGS_ARCHIVE_RETRIES";
pub const ENV_ARCHIVE_RETRY_DELAY_MS: &str = "TIDINGS_ARCHIVE_RETRY_DELAY_MS";
pub const ENV_LOG_FILE: &str = "TIDINGS_LOG_FILE";
