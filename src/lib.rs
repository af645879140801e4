//! Contributions Client Library
//!
//! A Rust client for bulk submission and retrieval of contributed datasets
//! against a contributions HTTP API. Provides payload validation and content
//! digesting, query splitting for oversize filters, and bounded-concurrency
//! request scheduling with rate limiting.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;

// Re-export commonly used types for convenience
pub use errors::{ClientError, Result};

#[cfg(test)]
mod tests {
    use super::*;
    use constants::*;

    #[test]
    fn test_constants_accessible() {
        // Test that our constants are accessible
        assert_eq!(DEFAULT_WORKER_COUNT, 8);
        assert_eq!(ENV_API_KEY, "MPC_API_KEY");
        assert!(USER_AGENT.contains("contribs-client"));
    }

    #[test]
    fn test_error_types() {
        // Test that our error types work correctly
        let api_error = errors::ApiError::RateLimited;
        let client_error = ClientError::Api(api_error);

        assert_eq!(client_error.category(), "api");
        assert!(client_error.is_recoverable());
    }
}
