//! Error types for amq-shadow

use thiserror::Error;

/// Errors that can occur while intercepting broker traffic
#[derive(Debug, Error)]
pub enum ShadowError {
    /// Management API request failure (transport or non-2xx status)
    #[error("Management API error: {0}")]
    Management(String),

    /// Wire-protocol connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Credential lacks permission on a vhost or resource
    #[error("Access denied on vhost '{vhost}': {reason}")]
    AccessDenied {
        vhost: String,
        reason: String,
    },

    /// Broker closed the connection on us
    #[error("Connection closed by broker: {0}")]
    ConnectionClosed(String),

    /// Requeue publish was rejected by the broker
    #[error("Publish rejected on exchange '{exchange}' routing key '{routing_key}': {reason}")]
    PublishRejected {
        exchange: String,
        routing_key: String,
        reason: String,
    },

    /// Other broker-side failure (declare, bind, consume)
    #[error("Broker error: {0}")]
    Broker(String),

    /// Permission regex failed to compile
    #[error("Invalid permission pattern '{pattern}': {reason}")]
    Pattern {
        pattern: String,
        reason: String,
    },

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error (bad URL, missing argument)
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for interception operations
pub type Result<T> = std::result::Result<T, ShadowError>;
