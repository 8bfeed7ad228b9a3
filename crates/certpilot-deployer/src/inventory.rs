//! Hosts and clusters known to the engine
//!
//! Built from the `inventory` section of the engine configuration. Inline
//! SSH keys and kubeconfigs are stored encoded and only decoded on lookup.

use async_trait::async_trait;
use certpilot_core::{ClusterEntry, HostEntry, InventoryConfig, SecretCodec};
use std::collections::HashMap;
use std::sync::Arc;

use crate::cluster_secret::ClusterDirectory;
use crate::errors::DeployError;
use crate::kube_client::{ClusterClient, KubeApiClient};
use crate::kubeconfig::Kubeconfig;
use crate::ssh::{HostDirectory, HostInfo};

pub struct Inventory {
    hosts: HashMap<i32, HostEntry>,
    clusters: HashMap<i32, ClusterEntry>,
    codec: Arc<dyn SecretCodec>,
}

impl Inventory {
    pub fn new(config: &InventoryConfig, codec: Arc<dyn SecretCodec>) -> Self {
        Self {
            hosts: config.hosts.iter().map(|h| (h.id, h.clone())).collect(),
            clusters: config.clusters.iter().map(|c| (c.id, c.clone())).collect(),
            codec,
        }
    }

    fn decode(&self, what: &str, encoded: &str) -> Result<String, DeployError> {
        self.codec
            .decode(encoded)
            .map_err(|e| DeployError::Secret(format!("{}: {}", what, e)))
    }
}

#[async_trait]
impl HostDirectory for Inventory {
    async fn host(&self, host_id: i32) -> Result<HostInfo, DeployError> {
        let entry = self
            .hosts
            .get(&host_id)
            .ok_or(DeployError::HostNotFound(host_id))?;

        let private_key = entry
            .private_key
            .as_deref()
            .map(|key| self.decode(&format!("host {} private key", host_id), key))
            .transpose()?;

        Ok(HostInfo {
            id: entry.id,
            address: entry.address.clone(),
            port: entry.port,
            user: entry.user.clone(),
            identity_file: entry.identity_file.clone(),
            private_key,
        })
    }
}

#[async_trait]
impl ClusterDirectory for Inventory {
    async fn client(&self, cluster_id: i32) -> Result<Arc<dyn ClusterClient>, DeployError> {
        let entry = self
            .clusters
            .get(&cluster_id)
            .ok_or(DeployError::ClusterNotFound(cluster_id))?;

        let raw = self.decode(&format!("cluster {} kubeconfig", cluster_id), &entry.kubeconfig)?;
        let resolved = Kubeconfig::from_str(&raw)?.resolve(entry.context.as_deref())?;
        Ok(Arc::new(KubeApiClient::new(&resolved)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certpilot_core::EncryptionService;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn codec() -> Arc<EncryptionService> {
        Arc::new(EncryptionService::new(&EncryptionService::generate_key()).unwrap())
    }

    #[tokio::test]
    async fn test_host_lookup_decodes_inline_key() {
        let codec = codec();
        let config = InventoryConfig {
            hosts: vec![HostEntry {
                id: 3,
                address: "web3.internal".to_string(),
                port: 22,
                user: "root".to_string(),
                identity_file: None,
                private_key: Some(codec.encode("PRIVATE KEY").unwrap()),
            }],
            ..Default::default()
        };
        let inventory = Inventory::new(&config, codec);

        let host = inventory.host(3).await.unwrap();
        assert_eq!(host.private_key.as_deref(), Some("PRIVATE KEY"));
        assert!(matches!(
            inventory.host(4).await,
            Err(DeployError::HostNotFound(4))
        ));
    }

    #[tokio::test]
    async fn test_cluster_lookup_builds_client_from_kubeconfig() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/web/secrets/site"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let kubeconfig = format!(
            "current-context: main\nclusters:\n- name: c\n  cluster:\n    server: {}\ncontexts:\n- name: main\n  context:\n    cluster: c\n    user: u\nusers:\n- name: u\n  user:\n    token: abc\n",
            server.uri()
        );
        let codec = codec();
        let config = InventoryConfig {
            clusters: vec![ClusterEntry {
                id: 1,
                name: "main".to_string(),
                kubeconfig: codec.encode(&kubeconfig).unwrap(),
                context: None,
            }],
            ..Default::default()
        };
        let inventory = Inventory::new(&config, codec);

        let client = inventory.client(1).await.unwrap();
        assert!(client.get_secret("web", "site").await.unwrap().is_none());
        assert!(matches!(
            inventory.client(2).await,
            Err(DeployError::ClusterNotFound(2))
        ));
    }
}
