//! Wiring shared by every command that touches the database

use certpilot_certificates::{
    AcmeOrchestrator, CertificateEngine, DefaultCertificateRepository,
    DefaultDeployConfigRepository, DefaultTaskRepository, EngineDeps, EngineSettings,
    InstantAcmeClient, InventoryCloudDirectory,
};
use certpilot_core::{EncryptionService, EngineConfig, SecretCodec};
use certpilot_database::establish_connection;
use certpilot_deployer::{DefaultDeployTargetFactory, Inventory};
use certpilot_dns::DnsProviderService;
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Location of the engine configuration file
#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    /// Path to the YAML configuration file
    #[arg(
        long,
        short = 'c',
        default_value = "certpilot.yaml",
        env = "CERTPILOT_CONFIG"
    )]
    pub config: PathBuf,
}

pub struct EngineContext {
    pub config: EngineConfig,
    pub dns: Arc<DnsProviderService>,
    pub engine: Arc<CertificateEngine>,
}

impl EngineContext {
    /// Loads the config, connects (running migrations) and assembles the engine.
    pub async fn build(path: &Path) -> anyhow::Result<Self> {
        let config = EngineConfig::load(path)?;
        debug!("Loaded configuration from {}", path.display());

        let db = establish_connection(&config.database).await?;
        let codec: Arc<dyn SecretCodec> = Arc::new(EncryptionService::new(&config.encryption_key)?);

        let dns = Arc::new(DnsProviderService::new(db.clone(), codec.clone()));
        let inventory = Arc::new(Inventory::new(&config.inventory, codec.clone()));
        let acme = AcmeOrchestrator::new(
            Arc::new(InstantAcmeClient::new(&config.acme)),
            config.acme.deadline(),
        );

        let deps = EngineDeps {
            certificates: Arc::new(DefaultCertificateRepository::new(db.clone(), codec.clone())),
            tasks: Arc::new(DefaultTaskRepository::new(db.clone())),
            deploy_configs: Arc::new(DefaultDeployConfigRepository::new(db.clone())),
            dns: dns.clone(),
            acme,
            cloud: Arc::new(InventoryCloudDirectory::new(
                &config.inventory.cloud_accounts,
                codec,
            )),
            deployers: Arc::new(DefaultDeployTargetFactory::from_inventory(inventory)),
        };
        let engine = Arc::new(CertificateEngine::new(
            deps,
            EngineSettings::from_config(&config),
        ));

        info!(
            "Engine ready ({} hosts, {} clusters, {} cloud accounts)",
            config.inventory.hosts.len(),
            config.inventory.clusters.len(),
            config.inventory.cloud_accounts.len()
        );
        Ok(Self {
            config,
            dns,
            engine,
        })
    }
}
