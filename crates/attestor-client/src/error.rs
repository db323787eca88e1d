use thiserror::Error;

/// Error type for attestation service calls.
#[derive(Debug, Error)]
pub enum Error {
    /// Base URL is invalid, the HTTP request failed, or the response body could not be decoded.
    #[error("request error: {0}")]
    Reqwest(#[from] reqwest::Error),
    /// Service answered with a non-2xx status code.
    #[error("attestor returned status {status}: {}", msg.as_deref().unwrap_or("unknown"))]
    ErrorStatus {
        /// HTTP status code.
        status: u16,
        /// Response body, if any.
        msg: Option<String>,
    },
    /// Service answered with a JSON-RPC error object.
    #[error("attestor RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },
    /// Service answered with neither a result nor an error.
    #[error("attestor returned an empty result for {method}")]
    EmptyResult {
        /// Method that was called.
        method: &'static str,
    },
}
