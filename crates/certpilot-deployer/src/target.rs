//! Deploy target contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cluster_secret::ClusterSecretConfig;
use crate::errors::DeployError;
use crate::web_server::SshWebServerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployType {
    #[serde(alias = "nginx_ssh")]
    SshWebServer,
    #[serde(alias = "k8s_secret")]
    ClusterSecret,
}

impl DeployType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployType::SshWebServer => "ssh_web_server",
            DeployType::ClusterSecret => "cluster_secret",
        }
    }
}

impl std::fmt::Display for DeployType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeployType {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ssh_web_server" | "nginx_ssh" => Ok(DeployType::SshWebServer),
            "cluster_secret" | "k8s_secret" => Ok(DeployType::ClusterSecret),
            other => Err(DeployError::UnsupportedType(other.to_string())),
        }
    }
}

/// PEM material handed to a target; the key is already decrypted
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateMaterial {
    /// Leaf first, followed by any intermediates
    pub certificate_pem: String,
    pub private_key_pem: String,
    pub chain_pem: Option<String>,
}

impl std::fmt::Debug for CertificateMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateMaterial")
            .field("certificate_pem", &format!("{} bytes", self.certificate_pem.len()))
            .field("private_key_pem", &"<redacted>")
            .field("chain_pem", &self.chain_pem.as_ref().map(|c| c.len()))
            .finish()
    }
}

impl CertificateMaterial {
    pub fn chain(&self) -> Option<&str> {
        self.chain_pem.as_deref().filter(|c| !c.trim().is_empty())
    }
}

#[async_trait]
pub trait DeployTarget: Send + Sync {
    fn deploy_type(&self) -> DeployType;

    /// Pushes `material` to the target described by `config`.
    async fn deploy(
        &self,
        material: &CertificateMaterial,
        config: &Value,
    ) -> Result<(), DeployError>;

    /// Checks the target is reachable and writable without changing it.
    async fn test(&self, config: &Value) -> Result<(), DeployError>;
}

/// Checks `config` has the shape `deploy_type` expects.
pub fn validate_target_config(deploy_type: DeployType, config: &Value) -> Result<(), DeployError> {
    match deploy_type {
        DeployType::SshWebServer => SshWebServerConfig::parse(config).map(|_| ()),
        DeployType::ClusterSecret => ClusterSecretConfig::parse(config).map(|_| ()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_deploy_type_names() {
        assert_eq!(
            DeployType::from_str("nginx_ssh").unwrap(),
            DeployType::SshWebServer
        );
        assert_eq!(DeployType::ClusterSecret.to_string(), "cluster_secret");
        assert!(matches!(
            DeployType::from_str("ftp"),
            Err(DeployError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_validate_target_config() {
        assert!(validate_target_config(
            DeployType::SshWebServer,
            &json!({"host_id": 1, "cert_path": "/etc/nginx/ssl/a.pem", "key_path": "/etc/nginx/ssl/a.key"})
        )
        .is_ok());
        assert!(validate_target_config(
            DeployType::SshWebServer,
            &json!({"host_id": 1, "cert_path": "relative.pem", "key_path": "/k"})
        )
        .is_err());
        assert!(validate_target_config(
            DeployType::ClusterSecret,
            &json!({"cluster_id": 2, "namespace": "default"})
        )
        .is_err());
    }

    #[test]
    fn test_material_debug_redacts_key() {
        let material = CertificateMaterial {
            certificate_pem: "CERT".to_string(),
            private_key_pem: "SECRET KEY".to_string(),
            chain_pem: Some("   ".to_string()),
        };
        assert!(!format!("{:?}", material).contains("SECRET"));
        assert_eq!(material.chain(), None);
    }
}
