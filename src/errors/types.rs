//! # Error Types
//!
//! Crate-wide error type for the sniplane control plane.

use crate::issuance::SignerError;
use crate::xds::synthesizer::SynthesisError;

/// Custom result type for sniplane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the sniplane control plane
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// The certificate registry cannot observe its storage location
    #[error("Registry error: {message}")]
    Registry {
        message: String,
        #[source]
        source: Option<notify::Error>,
    },

    /// The external certificate authority refused or failed to sign
    #[error("Signing error: {0}")]
    Signer(#[from] SignerError),

    /// Resource graph synthesis aborted
    #[error("Synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    /// The discovery publisher rejected a snapshot
    #[error("Publish error for node '{node_id}': {message}")]
    Publish { message: String, node_id: String },

    /// Network transport errors (gRPC)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a new configuration error with a source error
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a new validation error naming the offending field
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create an I/O error with context
    pub fn io<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        Self::Io { source, context: context.into() }
    }

    /// Create a registry error
    pub fn registry<S: Into<String>>(message: S) -> Self {
        Self::Registry { message: message.into(), source: None }
    }

    /// Create a publish error
    pub fn publish<S: Into<String>, N: Into<String>>(message: S, node_id: N) -> Self {
        Self::Publish { message: message.into(), node_id: node_id.into() }
    }

    /// Create a transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Whether the failure belongs to a single item and the caller can move on.
    pub fn is_per_item(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::Serialization { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io { source: error, context: "I/O operation failed".to_string() }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON processing failed".to_string() }
    }
}

impl From<notify::Error> for Error {
    fn from(error: notify::Error) -> Self {
        Self::Registry {
            message: "filesystem watch could not be established".to_string(),
            source: Some(error),
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Failed to load configuration", Box::new(error))
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::validation(format!("Validation failed: {}", message))
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(error: tonic::transport::Error) -> Self {
        Self::Transport(error.to_string())
    }
}
