//! Deploy target factory

use std::sync::Arc;

use crate::cluster_secret::{ClusterDirectory, ClusterSecretTarget};
use crate::errors::DeployError;
use crate::inventory::Inventory;
use crate::ssh::{HostDirectory, OpenSshConnector, ShellConnector};
use crate::target::{DeployTarget, DeployType};
use crate::web_server::SshWebServerTarget;

pub trait DeployTargetFactory: Send + Sync {
    fn create(&self, deploy_type: DeployType) -> Result<Arc<dyn DeployTarget>, DeployError>;
}

pub struct DefaultDeployTargetFactory {
    hosts: Arc<dyn HostDirectory>,
    connector: Arc<dyn ShellConnector>,
    clusters: Arc<dyn ClusterDirectory>,
}

impl DefaultDeployTargetFactory {
    pub fn new(
        hosts: Arc<dyn HostDirectory>,
        connector: Arc<dyn ShellConnector>,
        clusters: Arc<dyn ClusterDirectory>,
    ) -> Self {
        Self {
            hosts,
            connector,
            clusters,
        }
    }

    /// Hosts and clusters from `inventory`, shells through the system `ssh`
    pub fn from_inventory(inventory: Arc<Inventory>) -> Self {
        Self::new(
            inventory.clone(),
            Arc::new(OpenSshConnector::default()),
            inventory,
        )
    }
}

impl DeployTargetFactory for DefaultDeployTargetFactory {
    fn create(&self, deploy_type: DeployType) -> Result<Arc<dyn DeployTarget>, DeployError> {
        let target: Arc<dyn DeployTarget> = match deploy_type {
            DeployType::SshWebServer => Arc::new(SshWebServerTarget::new(
                self.hosts.clone(),
                self.connector.clone(),
            )),
            DeployType::ClusterSecret => Arc::new(ClusterSecretTarget::new(self.clusters.clone())),
        };
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certpilot_core::{EncryptionService, InventoryConfig};

    #[test]
    fn test_factory_dispatches_on_type() {
        let codec = Arc::new(EncryptionService::new(&EncryptionService::generate_key()).unwrap());
        let inventory = Arc::new(Inventory::new(&InventoryConfig::default(), codec));
        let factory = DefaultDeployTargetFactory::from_inventory(inventory);

        for deploy_type in [DeployType::SshWebServer, DeployType::ClusterSecret] {
            let target = factory.create(deploy_type).unwrap();
            assert_eq!(target.deploy_type(), deploy_type);
        }
    }
}
