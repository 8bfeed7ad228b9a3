//! Kubernetes TLS secret target

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::DeployError;
use crate::kube_client::ClusterClient;
use crate::target::{CertificateMaterial, DeployTarget, DeployType};

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const TYPE_LABEL: &str = "certpilot.io/type";

/// Resolves cluster ids to API clients
#[async_trait]
pub trait ClusterDirectory: Send + Sync {
    async fn client(&self, cluster_id: i32) -> Result<Arc<dyn ClusterClient>, DeployError>;
}

fn default_cert_key() -> String {
    "tls.crt".to_string()
}

fn default_key_key() -> String {
    "tls.key".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSecretConfig {
    pub cluster_id: i32,
    pub namespace: String,
    pub secret_name: String,
    #[serde(default = "default_cert_key")]
    pub cert_key: String,
    #[serde(default = "default_key_key")]
    pub key_key: String,
    /// Merged over the default labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub trigger_rollout: bool,
    #[serde(default)]
    pub deployments: Vec<String>,
}

impl ClusterSecretConfig {
    pub fn parse(config: &Value) -> Result<Self, DeployError> {
        let mut parsed: Self = serde_json::from_value(config.clone())
            .map_err(|e| DeployError::InvalidConfig(format!("cluster_secret: {}", e)))?;

        if parsed.namespace.trim().is_empty() || parsed.secret_name.trim().is_empty() {
            return Err(DeployError::InvalidConfig(
                "namespace and secret_name are required".to_string(),
            ));
        }
        if parsed.cert_key.is_empty() {
            parsed.cert_key = default_cert_key();
        }
        if parsed.key_key.is_empty() {
            parsed.key_key = default_key_key();
        }
        Ok(parsed)
    }

    fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::from([
            (MANAGED_BY_LABEL.to_string(), "certpilot".to_string()),
            (TYPE_LABEL.to_string(), "tls".to_string()),
        ]);
        labels.extend(self.labels.clone());
        labels
    }
}

/// Secret payload; the chain follows the leaf in the certificate entry
fn secret_data(
    material: &CertificateMaterial,
    config: &ClusterSecretConfig,
) -> BTreeMap<String, Vec<u8>> {
    let certificate = match material.chain() {
        // issued bundles already carry their intermediates
        Some(chain) if material.certificate_pem.contains(chain.trim()) => {
            material.certificate_pem.clone()
        }
        Some(chain) => format!("{}\n{}", material.certificate_pem, chain),
        None => material.certificate_pem.clone(),
    };
    BTreeMap::from([
        (config.cert_key.clone(), certificate.into_bytes()),
        (
            config.key_key.clone(),
            material.private_key_pem.clone().into_bytes(),
        ),
    ])
}

pub struct ClusterSecretTarget {
    clusters: Arc<dyn ClusterDirectory>,
}

impl ClusterSecretTarget {
    pub fn new(clusters: Arc<dyn ClusterDirectory>) -> Self {
        Self { clusters }
    }
}

#[async_trait]
impl DeployTarget for ClusterSecretTarget {
    fn deploy_type(&self) -> DeployType {
        DeployType::ClusterSecret
    }

    async fn deploy(
        &self,
        material: &CertificateMaterial,
        config: &Value,
    ) -> Result<(), DeployError> {
        let config = ClusterSecretConfig::parse(config)?;
        let client = self.clusters.client(config.cluster_id).await?;

        client
            .apply_tls_secret(
                &config.namespace,
                &config.secret_name,
                secret_data(material, &config),
                config.labels(),
            )
            .await?;
        info!(
            "Deployed certificate to secret {}/{} on cluster {}",
            config.namespace, config.secret_name, config.cluster_id
        );

        if config.trigger_rollout {
            for deployment in &config.deployments {
                if let Err(e) = client
                    .restart_deployment(&config.namespace, deployment)
                    .await
                {
                    warn!(
                        "Rollout of deployment {}/{} failed: {}",
                        config.namespace, deployment, e
                    );
                }
            }
        }
        Ok(())
    }

    async fn test(&self, config: &Value) -> Result<(), DeployError> {
        let config = ClusterSecretConfig::parse(config)?;
        let client = self.clusters.client(config.cluster_id).await?;
        // A missing secret still proves the namespace is reachable
        client
            .get_secret(&config.namespace, &config.secret_name)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kube_client::MockClusterClient;
    use mockall::predicate::eq;
    use serde_json::json;

    struct SingleCluster(Arc<dyn ClusterClient>);

    #[async_trait]
    impl ClusterDirectory for SingleCluster {
        async fn client(&self, cluster_id: i32) -> Result<Arc<dyn ClusterClient>, DeployError> {
            if cluster_id == 1 {
                Ok(self.0.clone())
            } else {
                Err(DeployError::ClusterNotFound(cluster_id))
            }
        }
    }

    fn target(mock: MockClusterClient) -> ClusterSecretTarget {
        ClusterSecretTarget::new(Arc::new(SingleCluster(Arc::new(mock))))
    }

    fn material() -> CertificateMaterial {
        CertificateMaterial {
            certificate_pem: "LEAF".to_string(),
            private_key_pem: "KEY".to_string(),
            chain_pem: Some("INTERMEDIATE".to_string()),
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = ClusterSecretConfig::parse(&json!({
            "cluster_id": 1,
            "namespace": "web",
            "secret_name": "site-tls",
            "cert_key": "",
        }))
        .unwrap();
        assert_eq!(config.cert_key, "tls.crt");
        assert_eq!(config.key_key, "tls.key");
        assert!(!config.trigger_rollout);
    }

    #[test]
    fn test_secret_data_does_not_repeat_bundled_chain() {
        let config = ClusterSecretConfig::parse(&json!({
            "cluster_id": 1,
            "namespace": "web",
            "secret_name": "site-tls",
        }))
        .unwrap();
        let bundled = CertificateMaterial {
            certificate_pem: "LEAF\nINTERMEDIATE\n".to_string(),
            private_key_pem: "KEY".to_string(),
            chain_pem: Some("INTERMEDIATE\n".to_string()),
        };
        let data = secret_data(&bundled, &config);
        assert_eq!(data["tls.crt"], b"LEAF\nINTERMEDIATE\n".to_vec());
    }

    #[tokio::test]
    async fn test_deploy_writes_secret_with_chain_and_labels() {
        let mut mock = MockClusterClient::new();
        mock.expect_apply_tls_secret()
            .withf(|namespace, name, data, labels| {
                namespace == "web"
                    && name == "site-tls"
                    && data.get("cert.pem").map(Vec::as_slice) == Some(b"LEAF\nINTERMEDIATE".as_slice())
                    && data.get("key.pem").map(Vec::as_slice) == Some(b"KEY".as_slice())
                    && labels.get(MANAGED_BY_LABEL).map(String::as_str) == Some("certpilot")
                    && labels.get(TYPE_LABEL).map(String::as_str) == Some("tls")
                    && labels.get("team").map(String::as_str) == Some("edge")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        mock.expect_restart_deployment().never();

        target(mock)
            .deploy(
                &material(),
                &json!({
                    "cluster_id": 1,
                    "namespace": "web",
                    "secret_name": "site-tls",
                    "cert_key": "cert.pem",
                    "key_key": "key.pem",
                    "labels": {"team": "edge"},
                    "deployments": ["frontend"],
                }),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rollout_failures_are_only_logged() {
        let mut mock = MockClusterClient::new();
        mock.expect_apply_tls_secret()
            .returning(|_, _, _, _| Ok(()));
        mock.expect_restart_deployment()
            .with(eq("web"), eq("frontend"))
            .times(1)
            .returning(|_, _| {
                Err(DeployError::Cluster {
                    status: 404,
                    message: "deployments.apps \"frontend\" not found".to_string(),
                })
            });
        mock.expect_restart_deployment()
            .with(eq("web"), eq("api"))
            .times(1)
            .returning(|_, _| Ok(()));

        target(mock)
            .deploy(
                &material(),
                &json!({
                    "cluster_id": 1,
                    "namespace": "web",
                    "secret_name": "site-tls",
                    "trigger_rollout": true,
                    "deployments": ["frontend", "api"],
                }),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_secret_failure_fails_deploy() {
        let mut mock = MockClusterClient::new();
        mock.expect_apply_tls_secret().returning(|_, _, _, _| {
            Err(DeployError::Cluster {
                status: 403,
                message: "forbidden".to_string(),
            })
        });

        let err = target(mock)
            .deploy(
                &material(),
                &json!({"cluster_id": 1, "namespace": "web", "secret_name": "s"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Cluster { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_probe_accepts_missing_secret() {
        let mut mock = MockClusterClient::new();
        mock.expect_get_secret().returning(|_, _| Ok(None));

        target(mock)
            .test(&json!({"cluster_id": 1, "namespace": "web", "secret_name": "new"}))
            .await
            .unwrap();

        let err = target(MockClusterClient::new())
            .test(&json!({"cluster_id": 5, "namespace": "web", "secret_name": "new"}))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::ClusterNotFound(5)));
    }
}
