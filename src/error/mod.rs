//! Error types for iotops

use thiserror::Error;

/// Main error type for iotops
#[derive(Debug, Error)]
pub enum OpsError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("API {api} is not installed on the connected cluster")]
    ApiMissing { api: String },

    #[error("Unknown ops service: {0}")]
    UnknownService(String),

    #[error("Port-forward to {namespace}/{pod}:{port} failed: {reason}")]
    PortForward {
        namespace: String,
        pod: String,
        port: u16,
        reason: String,
    },

    #[error("Failed to decode diagnostics response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<serde_json::Error> for OpsError {
    fn from(e: serde_json::Error) -> Self {
        OpsError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for OpsError {
    fn from(e: serde_yaml::Error) -> Self {
        OpsError::Serialization(e.to_string())
    }
}

impl From<zip::result::ZipError> for OpsError {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::Io(io) => OpsError::Io(io),
            other => OpsError::Serialization(other.to_string()),
        }
    }
}

impl From<prost::DecodeError> for OpsError {
    fn from(e: prost::DecodeError) -> Self {
        OpsError::Decode(e.to_string())
    }
}

/// Result type alias for iotops
pub type Result<T> = std::result::Result<T, OpsError>;
