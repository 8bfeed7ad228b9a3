//! Deploy error types

use crate::kubeconfig::KubeconfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Unsupported deploy type: {0}")]
    UnsupportedType(String),

    #[error("Invalid target config: {0}")]
    InvalidConfig(String),

    #[error("Host not found: {0}")]
    HostNotFound(i32),

    #[error("Cluster not found: {0}")]
    ClusterNotFound(i32),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Command `{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Upload to {path} failed: {message}")]
    Upload { path: String, message: String },

    #[error("Kubernetes API returned {status}: {message}")]
    Cluster { status: u16, message: String },

    #[error("Secret decode failed: {0}")]
    Secret(String),

    #[error("Kubeconfig error: {0}")]
    Kubeconfig(#[from] KubeconfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
}

impl DeployError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DeployError::Cluster { status: 404, .. })
    }
}
