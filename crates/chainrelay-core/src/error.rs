//! Error types shared across the relay.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors that can occur while talking to a chain node.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, bad status, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// WebSocket connection/send/receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// The node answered with something we did not expect.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl TransportError {
    /// Returns `true` if this error is transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::WebSocket(_) | Self::Timeout { .. }
        )
    }
}

/// Errors produced while decoding an oracle request payload.
///
/// None of these are retried: the source bytes will not change.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer is shorter than the fixed runlog header.
    #[error("malformed data: payload is {len} bytes, header needs {required}")]
    MalformedPayload { len: usize, required: usize },

    /// Declared variable-length segment runs past the end of the buffer.
    #[error("cbor too short: declared {declared} bytes, {available} available")]
    TruncatedPayload { declared: u64, available: usize },

    /// The self-describing payload could not be parsed.
    #[error("error parsing CBOR: {0}")]
    PayloadEncoding(String),
}

/// Errors raised while building a node filter query.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("cannot specify both {hash_key} and {from_key}/{to_key}")]
    ConflictingFilter {
        hash_key: &'static str,
        from_key: &'static str,
        to_key: &'static str,
    },
}

/// Configuration-level errors, surfaced when a subscription is registered.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid endpoint url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported url scheme '{0}', expected ws, wss, http or https")]
    UnsupportedScheme(String),

    #[error("unknown chain type '{0}'")]
    UnknownChain(String),

    #[error("endpoint name must not be empty")]
    MissingEndpointName,

    #[error("{chain} subscriptions require {field}")]
    MissingParameter { chain: String, field: &'static str },

    #[error("invalid {field} '{value}'")]
    InvalidParameter { field: &'static str, value: String },

    #[error("{0} does not support {1} connections")]
    UnsupportedConnection(String, String),
}

/// Errors an adapter can hit while setting up or testing its connection.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Protocol(String),
}

/// Errors from the configuration store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("endpoint '{0}' not found")]
    EndpointNotFound(String),

    #[error("subscription '{0}' not found")]
    SubscriptionNotFound(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Errors surfaced synchronously by subscription lifecycle calls.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// A subscription for this job is already active.
    #[error("already subscribed to job {0}")]
    DuplicateJob(String),

    /// No active subscription for this job.
    #[error("subscription not found for job {0}")]
    NotFound(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("connection test failed: {0}")]
    Connection(#[from] AdapterError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SubscriptionError {
    /// Returns `true` for errors caused by caller input rather than the node.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateJob(_) | Self::NotFound(_) | Self::Config(_)
        )
    }
}
