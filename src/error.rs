// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for vault-dr
//!
//! Retryable HTTP faults live in [`crate::http::HttpFailure`] and never leave the
//! HTTP layer; everything here ends the run.

use thiserror::Error;

/// Result type alias for vault-dr operations
pub type Result<T> = std::result::Result<T, DrError>;

/// Errors that terminate a role swap
#[derive(Error, Debug)]
pub enum DrError {
    /// Bad mode, environment or other argument
    #[error("Usage error: {message}")]
    Usage { message: String },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration format
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Target node is not a streaming DR secondary
    #[error(
        "Node {node} is not ready for promotion: replication mode '{mode}', state '{state}' \
         (expected mode 'secondary', state 'stream-wals')"
    )]
    Precondition {
        node: String,
        mode: String,
        state: String,
    },

    /// Every attempt of an HTTP call failed
    #[error("Exceeded maximum of {retries} retries while executing {verb} {url}: {last_failure}")]
    RetriesExhausted {
        verb: String,
        url: String,
        retries: u32,
        last_failure: String,
    },

    /// Ceremony or response-shape fault
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// DNS provider rejected the change
    #[error("{service} failed: {message}")]
    ExternalService { service: String, message: String },

    /// A credential or recovery key could not be read
    #[error("Failed to read secret '{name}': {message}")]
    Secret { name: String, message: String },

    /// Operator interrupted the run
    #[error("Interrupted by operator")]
    Interrupted,

    /// IO error wrapper
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Structural faults in the token ceremony or in a node's responses
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// Decoded token and OTP differ in length, so no XOR is possible
    #[error(
        "Unable to decode a valid DR operation token: decoded token is {decoded_len} bytes \
         while the OTP is {otp_len} bytes"
    )]
    LengthMismatch { decoded_len: usize, otp_len: usize },

    /// Encoded token is not valid base64
    #[error("Encoded DR operation token is not valid base64: {message}")]
    InvalidEncoding { message: String },

    /// XOR result is not valid UTF-8
    #[error("Decoded DR operation token is not valid UTF-8")]
    InvalidUtf8,

    /// An expected field was absent from a response
    #[error("Response from {url} is missing field '{field}'")]
    MissingField { field: String, url: String },

    /// Response body did not have the expected shape
    #[error("Malformed response from {url}: {message}")]
    MalformedResponse { url: String, message: String },
}

impl DrError {
    /// Short label used when logging which class of failure ended the run
    pub fn kind(&self) -> &'static str {
        match self {
            DrError::Usage { .. } => "usage",
            DrError::ConfigNotFound { .. }
            | DrError::InvalidConfig { .. }
            | DrError::IoError(_)
            | DrError::TomlError(_) => "config",
            DrError::Precondition { .. } => "precondition",
            DrError::RetriesExhausted { .. } => "retries-exhausted",
            DrError::Protocol(_) => "protocol",
            DrError::ExternalService { .. } => "external-service",
            DrError::Secret { .. } => "secret",
            DrError::Interrupted => "interrupted",
        }
    }
}
