// ABOUTME: Error types for capability discovery and invocation
// ABOUTME: Covers address parsing, HTTP faults, JSON-RPC error replies and timeouts

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("Invalid capability address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Capability call timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Capability responded with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Capability '{capability_id}' returned error {code}: {message}")]
    Remote {
        capability_id: String,
        code: i64,
        message: String,
    },

    #[error("Malformed response from capability '{capability_id}': {reason}")]
    MalformedResponse {
        capability_id: String,
        reason: String,
    },

    #[error("Discovery failed: {0}")]
    Discovery(String),
}

pub type Result<T> = std::result::Result<T, CapabilityError>;
