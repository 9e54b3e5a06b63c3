//! Error types for Terrasample.
//!
//! Failures raised by the imagery service are carried verbatim in
//! [`RemoteError`]. The only errors this crate raises itself are the few
//! sequence preconditions in [`PipelineError`] and configuration problems.

use crate::core::types::ValueType;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier of a handle.
///
/// Cloning a handle keeps its id; deriving a new handle mints a new one.
/// Export requests carry the id of the handle they export, which is how
/// submitted jobs are correlated with their sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleId(pub Uuid);

impl HandleId {
    /// Create a new random handle ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Top-level error type for Terrasample.
#[derive(Error, Debug)]
pub enum TerraError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the imagery service, local or remote.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RemoteError {
    #[error("Property '{property}' is not set on {object}")]
    MissingProperty { object: String, property: String },

    #[error("Type mismatch in {function}: expected {expected}, got {got}")]
    TypeMismatch {
        function: String,
        expected: ValueType,
        got: ValueType,
    },

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid argument '{argument}' to {function}: {reason}")]
    InvalidArgument {
        function: String,
        argument: String,
        reason: String,
    },

    #[error("Missing argument '{argument}' for {function}")]
    MissingArgument { function: String, argument: String },

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Unbound argument reference: {0}")]
    UnboundArgument(String),

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Cannot encode expression: {0}")]
    Encoding(String),

    #[error("{0}")]
    Other(String),
}

/// Preconditions checked locally before anything is sent to the service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Cannot register an empty image sequence")]
    EmptyImageSequence,

    #[error("Image {index} ({image}) has no 'filename' property; run insert_date first")]
    MissingFilename { index: usize, image: HandleId },
}

/// Errors loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {error}")]
    Io {
        path: String,
        #[source]
        error: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl RemoteError {
    /// Whether the service rejected the call for resource reasons rather than
    /// because the request itself was wrong.
    pub fn is_quota(&self) -> bool {
        matches!(self, RemoteError::QuotaExceeded(_))
            || matches!(self, RemoteError::Http { status: 429, .. })
    }
}

/// Result type alias for Terrasample operations.
pub type TerraResult<T> = Result<T, TerraError>;

/// Result type alias for service calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;
