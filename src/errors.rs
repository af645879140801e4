//! Error types for the contributions client
//!
//! This module defines error types for all components of the crate. Errors
//! are designed to be actionable: the taxonomy distinguishes retryable
//! transport failures from fatal validation and duplicate errors so callers
//! never need to parse messages to decide what to do next.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Invalid configuration format
    #[error("Invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Missing API key
    #[error("Missing API key. Set the MPC_API_KEY environment variable or the [api] key in the config file")]
    MissingApiKey,

    /// Invalid API host URL
    #[error("Invalid API host: {host} - {error}")]
    InvalidHost { host: String, error: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// I/O error reading configuration
    #[error("I/O error reading configuration")]
    Io(#[from] std::io::Error),
}

/// HTTP transport and API errors
#[derive(Error, Debug)]
pub enum ApiError {
    /// HTTP request error
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),

    /// Server returned a non-success status
    #[error("Server error: HTTP {status}: {detail}")]
    Status { status: u16, detail: String },

    /// Rate limit exceeded after retries
    #[error("Rate limit exceeded. Server responded with HTTP 429")]
    RateLimited,

    /// Server overloaded after retries
    #[error("Server overloaded. Server responded with HTTP 503")]
    Overloaded,

    /// Maximum retries exceeded
    #[error("Maximum retry attempts ({max_retries}) exceeded for request")]
    MaxRetriesExceeded { max_retries: u32 },

    /// Invalid URL constructed for a request
    #[error("Invalid URL: {url} - {error}")]
    InvalidUrl { url: String, error: String },

    /// JSON decoding error
    #[error("JSON decoding error")]
    Json(#[from] serde_json::Error),

    /// Query could not be serialized into request parameters
    #[error("Invalid query parameter")]
    InvalidParams(#[from] QueryError),
}

/// Payload validation errors, raised before any network call
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Contribution carries neither data nor components
    #[error("Contribution #{index} has neither `data` nor any component list")]
    EmptyContribution { index: usize },

    /// A present-but-empty list or value
    #[error("Contribution #{index}: `{field}` is present but empty")]
    EmptyField { index: usize, field: String },

    /// Schema violation reported by the JSON-schema validator
    #[error("Contribution #{index} failed schema validation: {detail}")]
    Schema { index: usize, detail: String },

    /// Too many components on one contribution
    #[error("Contribution #{index} has {count} components, maximum is {max}")]
    TooManyComponents {
        index: usize,
        count: usize,
        max: usize,
    },

    /// Data mapping nested deeper than allowed
    #[error("Contribution #{index}: `data` exceeds maximum nesting depth of {max}")]
    TooDeep { index: usize, max: usize },

    /// Invalid digest string
    #[error("Invalid digest: {digest}. Expected 32-character MD5 hex string")]
    InvalidDigest { digest: String },

    /// Component digest collides with an existing or same-batch component
    #[error("Duplicate {kind} digest {digest} in project {project}")]
    DuplicateComponent {
        kind: String,
        digest: String,
        project: String,
    },
}

/// Query construction and splitting errors
#[derive(Error, Debug)]
pub enum QueryError {
    /// More than one list-valued field would require splitting
    #[error("Only one list field may exceed the page size; found {fields:?}")]
    MultipleListFields { fields: Vec<String> },

    /// A single list element is longer than the URL ceiling
    #[error("Filter value for `{field}` cannot fit the URL length ceiling even alone")]
    ValueTooLong { field: String },

    /// List field holds non-string, non-scalar entries
    #[error("List field `{field}` holds entries that cannot be serialized into a filter")]
    UnsupportedListEntry { field: String },
}

/// Submission pipeline errors
#[derive(Error, Debug)]
pub enum SubmitError {
    /// Nothing to submit
    #[error("No contributions to submit")]
    EmptyBatch,

    /// Contributions remain unprocessed after exhausting retries
    #[error(
        "{processed}/{total} contributions processed for project {project} after {retries} retries"
    )]
    Shortfall {
        project: String,
        processed: usize,
        total: usize,
        retries: u32,
    },

    /// Target project does not exist or is not readable
    #[error("Project {project} not found or not accessible")]
    ProjectNotFound { project: String },

    /// Embedded contribution schema failed to compile
    #[error("Contribution schema failed to compile: {reason}")]
    SchemaCompile { reason: String },
}

/// Download/export orchestration errors
#[derive(Error, Debug)]
pub enum ExportError {
    /// I/O error during export file operations
    #[error("File I/O error")]
    Io(#[from] std::io::Error),

    /// Atomic file operation failed
    #[error("Atomic file operation failed: could not rename {temp_path} to {final_path}")]
    AtomicOperationFailed {
        temp_path: PathBuf,
        final_path: PathBuf,
    },

    /// Export directory not accessible
    #[error("Export directory not accessible: {path}")]
    DirectoryNotAccessible { path: PathBuf },

    /// Wall-clock budget exhausted before any ids could be resolved
    #[error("Timed out after {seconds}s before resolving any matching ids")]
    BudgetExhausted { seconds: u64 },
}

/// Top-level client error that can represent any error type
#[derive(Error, Debug)]
pub enum ClientError {
    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Transport or API error
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Validation error
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Query splitting error
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Submission error
    #[error(transparent)]
    Submit(#[from] SubmitError),

    /// Export error
    #[error(transparent)]
    Export(#[from] ExportError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic client error with context
    #[error("Client error: {message}")]
    Generic { message: String },
}

impl ClientError {
    /// Create a generic client error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Check if the error is recoverable (transient)
    pub fn is_recoverable(&self) -> bool {
        match self {
            ClientError::Api(ApiError::Http(_))
            | ClientError::Api(ApiError::RateLimited)
            | ClientError::Api(ApiError::Overloaded) => true,

            ClientError::Api(ApiError::Status { status, .. }) => *status >= 500,

            ClientError::Submit(SubmitError::Shortfall { .. }) => true,

            _ => false,
        }
    }

    /// Get error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            ClientError::Config(_) => "config",
            ClientError::Api(_) => "api",
            ClientError::Validation(_) => "validation",
            ClientError::Query(_) => "query",
            ClientError::Submit(_) => "submit",
            ClientError::Export(_) => "export",
            ClientError::Io(_) => "io",
            ClientError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ClientError>;

/// API result type alias
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Validation result type alias
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

/// Query result type alias
pub type QueryResult<T> = std::result::Result<T, QueryError>;

/// Export result type alias
pub type ExportResult<T> = std::result::Result<T, ExportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let rate_limited = ClientError::Api(ApiError::RateLimited);
        assert!(rate_limited.is_recoverable());
        assert_eq!(rate_limited.category(), "api");

        let server_error = ClientError::Api(ApiError::Status {
            status: 502,
            detail: "bad gateway".into(),
        });
        assert!(server_error.is_recoverable());

        let client_error = ClientError::Api(ApiError::Status {
            status: 404,
            detail: "not found".into(),
        });
        assert!(!client_error.is_recoverable());
    }

    #[test]
    fn test_validation_errors_are_fatal() {
        let err = ClientError::Validation(ValidationError::EmptyContribution { index: 3 });
        assert!(!err.is_recoverable());
        assert_eq!(err.category(), "validation");
        assert!(err.to_string().contains("#3"));
    }

    #[test]
    fn test_shortfall_reports_counts() {
        let err = SubmitError::Shortfall {
            project: "carrier_transport".into(),
            processed: 7,
            total: 10,
            retries: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("7/10"));
        assert!(msg.contains("carrier_transport"));
    }
}
