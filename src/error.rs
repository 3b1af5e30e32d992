//! Central error type for the ingestion pipeline.
//!
//! [`IndexerError`] is the single error enum threaded through the scanner,
//! reconciler and outbox layers. RPC failures keep the provider's message
//! so the transient/permanent classification in [`IndexerError::is_range_error`]
//! can drive automatic block-range bisection.

use thiserror::Error;

/// Provider error fragments that indicate the request failed because the
/// queried block range was too large (oversized result set, timeout, or an
/// overloaded gateway). Matched case-insensitively against the RPC message.
const RANGE_ERROR_MARKERS: &[&str] = &[
    "query returned more than",
    "response size exceeded",
    "result is too big",
    "log response size",
    "too many results",
    "limit exceeded",
    "request timed out",
    "timeout",
    "deadline exceeded",
    "502",
    "503",
    "504",
    "bad gateway",
    "gateway timeout",
    "service unavailable",
    "internal server error",
];

/// Pipeline-wide error enum.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// The RPC provider returned an error or the call timed out.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// Database failure surfaced by sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failure publishing to the durable stream.
    #[error("publish error: {0}")]
    Publish(#[from] redis::RedisError),

    /// A contract log or call response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Invalid or missing configuration.
    #[error("config error: {0}")]
    Config(String),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IndexerError {
    /// Returns `true` when this error is an RPC failure whose message
    /// suggests the queried block range was the cause (oversized result,
    /// timeout, gateway error). The scanner bisects the range in response;
    /// all other errors are retried unchanged after a fixed backoff.
    #[must_use]
    pub fn is_range_error(&self) -> bool {
        let Self::Rpc(message) = self else {
            return false;
        };
        let lowered = message.to_lowercase();
        RANGE_ERROR_MARKERS.iter().any(|m| lowered.contains(m))
    }

    /// Builds an [`IndexerError::Rpc`] from any displayable provider error.
    pub fn rpc(err: impl std::fmt::Display) -> Self {
        Self::Rpc(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn oversized_result_is_range_error() {
        let err = IndexerError::Rpc("query returned more than 10000 results".to_string());
        assert!(err.is_range_error());
    }

    #[test]
    fn gateway_errors_are_range_errors() {
        for msg in ["502 Bad Gateway", "Gateway Timeout", "503 Service Unavailable"] {
            let err = IndexerError::Rpc(msg.to_string());
            assert!(err.is_range_error(), "expected range error for {msg}");
        }
    }

    #[test]
    fn timeout_is_range_error() {
        let err = IndexerError::Rpc("request timed out after 30s".to_string());
        assert!(err.is_range_error());
    }

    #[test]
    fn revert_is_not_range_error() {
        let err = IndexerError::Rpc("execution reverted".to_string());
        assert!(!err.is_range_error());
    }

    #[test]
    fn non_rpc_errors_are_never_range_errors() {
        let err = IndexerError::Decode("timeout".to_string());
        assert!(!err.is_range_error());
    }

    #[test]
    fn rpc_constructor_keeps_message() {
        let err = IndexerError::rpc("boom");
        assert_eq!(err.to_string(), "rpc error: boom");
    }
}
