//! Application constants for the contributions client
//!
//! This module centralizes all constants used throughout the crate,
//! organized by functional domain for maintainability and clarity.

use std::time::Duration;

/// Environment variable names for API access
pub mod env {
    /// Environment variable name for the API key
    pub const API_KEY: &str = "MPC_API_KEY";

    /// Environment variable name for the API host override
    pub const HOST: &str = "MPC_HOST";
}

/// API endpoint defaults
pub mod api {
    /// Default API base URL
    pub const DEFAULT_HOST: &str = "https://contribs-api.materialsproject.org";

    /// Header carrying the API key
    pub const API_KEY_HEADER: &str = "x-api-key";
}

/// HTTP client configuration constants
pub mod http {
    use super::Duration;

    /// Default user agent for all HTTP requests
    pub const USER_AGENT: &str = "contribs-client/0.1.0 (Materials Contributions Tool)";

    /// Default HTTP request timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Connection establishment timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Connection pool idle timeout
    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

    /// Maximum connections per host in pool
    pub const POOL_MAX_PER_HOST: usize = 25;
}

/// Rate limiting and retry configuration
pub mod limits {
    /// Default rate limit for API requests (requests per second)
    pub const DEFAULT_RATE_LIMIT_RPS: u32 = 15;

    /// Maximum retry attempts for failed or partially processed requests
    pub const MAX_RETRIES: u32 = 3;

    /// Base delay for exponential backoff (milliseconds)
    pub const RETRY_BASE_DELAY_MS: u64 = 1000;

    /// Hard ceiling on the serialized length of a single filter value.
    /// Keeps request URLs below proxy limits.
    pub const MAX_FILTER_CHARS: usize = 4000;

    /// Factor by which list chunks shrink until they fit the URL ceiling
    pub const CHUNK_SHRINK_FACTOR: f64 = 0.8;
}

/// Pagination defaults and maxima
pub mod pagination {
    /// Default page size for queries
    pub const DEFAULT_PER_PAGE: usize = 100;

    /// Maximum page size for contribution queries
    pub const MAX_PER_PAGE: usize = 250;

    /// Maximum page size for component queries (larger payload per row)
    pub const MAX_COMPONENT_PER_PAGE: usize = 100;
}

/// Submission batching ceilings
pub mod batching {
    /// Maximum number of contributions per bulk-create call
    pub const MAX_BATCH_SIZE: usize = 1000;

    /// Maximum serialized payload per bulk-create call (bytes)
    pub const MAX_PAYLOAD_BYTES: usize = 2_400_000;

    /// Maximum serialized size of a single component (bytes)
    pub const MAX_COMPONENT_BYTES: usize = 16 * 1024 * 1024;

    /// Maximum number of components per contribution
    pub const MAX_COMPONENTS: usize = 10;

    /// Maximum nesting depth of the `data` mapping
    pub const MAX_NESTING_DEPTH: usize = 4;
}

/// Worker and concurrency configuration
pub mod workers {
    use super::Duration;

    /// Default number of concurrent in-flight requests
    pub const DEFAULT_WORKER_COUNT: usize = 8;

    /// Maximum recommended concurrent requests
    pub const MAX_WORKER_COUNT: usize = 16;

    /// Default wall-clock budget for a scheduler run
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
}

/// File operation constants
pub mod files {
    /// Temporary file suffix for atomic writes
    pub const TEMP_FILE_SUFFIX: &str = ".tmp";

    /// Suffix for gzipped export batches
    pub const GZ_SUFFIX: &str = ".json.gz";

    /// Default export directory name under the user config dir
    pub const EXPORT_DIR_NAME: &str = "export";
}

/// Progress reporting
pub mod progress {
    /// Progress bar template for request scheduling
    pub const BAR_TEMPLATE: &str =
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";

    /// Progress bar tick characters
    pub const BAR_CHARS: &str = "#>-";
}

// Re-export commonly used constants for convenience
pub use api::{API_KEY_HEADER, DEFAULT_HOST};
pub use batching::{MAX_BATCH_SIZE, MAX_PAYLOAD_BYTES};
pub use env::{API_KEY as ENV_API_KEY, HOST as ENV_HOST};
pub use http::{DEFAULT_TIMEOUT as HTTP_TIMEOUT, USER_AGENT};
pub use limits::{DEFAULT_RATE_LIMIT_RPS, MAX_RETRIES, RETRY_BASE_DELAY_MS};
pub use workers::DEFAULT_WORKER_COUNT;
