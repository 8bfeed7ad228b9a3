//! Engine configuration loaded from YAML with environment overrides

use crate::error::{ServiceError, ServiceResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_DATABASE_URL: &str = "CERTPILOT_DATABASE_URL";
pub const ENV_ENCRYPTION_KEY: &str = "CERTPILOT_ENCRYPTION_KEY";
pub const ENV_ACME_EMAIL: &str = "CERTPILOT_ACME_EMAIL";
pub const ENV_ACME_STAGING: &str = "CERTPILOT_ACME_STAGING";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    /// 32 raw bytes or 64 hex characters
    #[serde(default)]
    pub encryption_key: String,
    #[serde(default)]
    pub acme: AcmeConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub inventory: InventoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://certpilot.db?mode=rwc".to_string(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcmeConfig {
    /// Contact used when a certificate carries no email of its own
    pub email: Option<String>,
    #[serde(default)]
    pub staging: bool,
    /// Wait between presenting TXT records and signalling readiness
    #[serde(default = "default_propagation_delay")]
    pub propagation_delay_secs: u64,
    #[serde(default = "default_acme_deadline")]
    pub deadline_secs: u64,
    /// External account binding credentials keyed by CA name (e.g. `zerossl`)
    #[serde(default)]
    pub external_account_bindings: HashMap<String, ExternalAccountCredentials>,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            email: None,
            staging: false,
            propagation_delay_secs: default_propagation_delay(),
            deadline_secs: default_acme_deadline(),
            external_account_bindings: HashMap::new(),
        }
    }
}

impl AcmeConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn propagation_delay(&self) -> Duration {
        Duration::from_secs(self.propagation_delay_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalAccountCredentials {
    pub key_id: String,
    /// base64url encoded HMAC key as handed out by the CA
    pub hmac_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_cloud_deadline")]
    pub cloud_deadline_secs: u64,
    /// Upper bound on concurrently running workers; unbounded when absent
    pub max_concurrent_workers: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            cloud_deadline_secs: default_cloud_deadline(),
            max_concurrent_workers: None,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn cloud_deadline(&self) -> Duration {
        Duration::from_secs(self.cloud_deadline_secs)
    }
}

/// Deployment and vendor inventory referenced by id from deploy configs
/// and certificates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventoryConfig {
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
    #[serde(default)]
    pub clusters: Vec<ClusterEntry>,
    #[serde(default)]
    pub cloud_accounts: Vec<CloudAccountEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEntry {
    pub id: i32,
    pub address: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default = "default_ssh_user")]
    pub user: String,
    pub identity_file: Option<PathBuf>,
    /// Encrypted inline private key
    pub private_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterEntry {
    pub id: i32,
    pub name: String,
    /// Encrypted kubeconfig document
    pub kubeconfig: String,
    /// Context to use instead of the kubeconfig's current context
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudAccountEntry {
    pub id: i32,
    pub name: String,
    pub vendor: String,
    pub access_key_id: String,
    /// Encrypted access key secret
    pub access_key_secret: String,
    pub region: Option<String>,
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    1
}

fn default_propagation_delay() -> u64 {
    30
}

fn default_acme_deadline() -> u64 {
    600
}

fn default_interval() -> u64 {
    3600
}

fn default_cloud_deadline() -> u64 {
    300
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_user() -> String {
    "root".to_string()
}

impl EngineConfig {
    pub fn from_yaml_str(raw: &str) -> ServiceResult<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Reads the YAML file, applies process environment overrides and validates.
    pub fn load(path: &Path) -> ServiceResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ServiceError::configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_yaml_str(&raw)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self.database.url = url;
        }
        if let Some(key) = lookup(ENV_ENCRYPTION_KEY) {
            self.encryption_key = key;
        }
        if let Some(email) = lookup(ENV_ACME_EMAIL) {
            self.acme.email = Some(email);
        }
        if let Some(staging) = lookup(ENV_ACME_STAGING) {
            self.acme.staging = matches!(staging.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    pub fn validate(&self) -> ServiceResult<()> {
        if self.database.url.is_empty() {
            return Err(ServiceError::configuration("database.url must be set"));
        }
        if !matches!(self.encryption_key.len(), 32 | 64) {
            return Err(ServiceError::configuration(
                "encryption_key must be 32 bytes or 64 hex characters",
            ));
        }
        if self.scheduler.interval_secs == 0 {
            return Err(ServiceError::configuration(
                "scheduler.interval_secs must be greater than zero",
            ));
        }
        if self.acme.deadline_secs == 0 || self.scheduler.cloud_deadline_secs == 0 {
            return Err(ServiceError::configuration("deadlines must be greater than zero"));
        }

        let mut seen = std::collections::HashSet::new();
        for host in &self.inventory.hosts {
            if !seen.insert(host.id) {
                return Err(ServiceError::configuration(format!(
                    "duplicate host id {} in inventory",
                    host.id
                )));
            }
        }
        Ok(())
    }
}
