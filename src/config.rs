use std::fmt;

/// Name of the search index every phase reads from or writes to
pub const DEFAULT_INDEX: &str = "urls";

/// Default search endpoint (overridable on the command line or via env)
pub const DEFAULT_ES_PROTOCOL: &str = "http";
pub const DEFAULT_ES_HOST: &str = "127.0.0.1";
pub const DEFAULT_ES_PORT: u16 = 9200;

/// Request timeout for search index calls, in seconds
pub const ES_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Directory the per-phase timing reports are written to
pub const DEFAULT_LOG_DIR: &str = "log";

pub const SCAN_TIMING_FILE: &str = "scanningTimingResults.stats";
pub const IMPORT_TIMING_FILE: &str = "importToESTimingResults.stats";
pub const DEDUP_TIMING_FILE: &str = "findReoccurringParagraphsES.stats";
pub const HOST_RANKS_TIMING_FILE: &str = "processHostRankFile.stats";

/// Buffer size for gzip readers and writers
pub const BUFFER_SIZE: usize = 128_000;

/// Largest WET record body accepted; longer `Content-Length` values are treated as corrupt
pub const MAX_RECORD_BYTES: usize = 64 * 1024 * 1024;

/// In-flight tasks allowed per worker for the light phases (scan, import)
pub const ADMISSION_FACTOR: usize = 3;

/// Suffix appended to an archive key to name its scan output
pub const SCANNED_SUFFIX: &str = ".scanned";

/// Documents per `_bulk` request during import
pub const BULK_BATCH_SIZE: usize = 500;

/// Index settings applied while bulk loading, and restored afterwards
pub const BULK_REFRESH_INTERVAL: &str = "-1";
pub const BULK_REPLICAS: u32 = 0;
pub const LIVE_REFRESH_INTERVAL: &str = "1s";
pub const LIVE_REPLICAS: u32 = 1;

/// Maximum paragraphs kept per scanned document
pub const MAX_PARAGRAPHS_PER_DOC: usize = 20;

/// Shards for duplicate-paragraph discovery
pub const DEDUP_SHARDS: u32 = 2;
pub const DEDUP_MIN_OCCURRENCES: u32 = 2;
pub const DEDUP_SCROLL_PAGE: usize = 1000;
pub const DEDUP_SCROLL_KEEPALIVE: &str = "1m";

/// Connection details for the search index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
}

impl SearchConfig {
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            protocol: DEFAULT_ES_PROTOCOL.to_string(),
            host: DEFAULT_ES_HOST.to_string(),
            port: DEFAULT_ES_PORT,
        }
    }
}

impl fmt::Display for SearchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_url())
    }
}
