/// Literal separator between the upstream log region and the result region.
pub const RESULT_SEPARATOR: &str = "===RESULT===";

/// Upstream analysis endpoint, appended to the configured base URL.
pub const UPSTREAM_ASK_PATH: &str = "/ask";

/// Header carrying the pre-shared upstream API key.
pub const UPSTREAM_API_KEY_HEADER: &str = "x-api-key";

/// Status codes worth a second attempt on the initial upstream POST. Once
/// the stream is open there are no retries; the terminal event settles it.
pub const RETRYABLE_STATUS_CODES: &[u16] = &[429, 500, 502, 503, 504];

/// Default interval between `heartbeat` events on an open relay stream.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 5;

/// Product name stamped on cards whose payload carried none.
pub const DEFAULT_PRODUCT_NAME: &str = "Climate Change Analyzer";

/// Database defaults
pub const DB_PRAGMAS: &[&str] = &[
    "PRAGMA journal_mode = WAL",
    "PRAGMA synchronous = NORMAL",
    "PRAGMA busy_timeout = 5000",
];
