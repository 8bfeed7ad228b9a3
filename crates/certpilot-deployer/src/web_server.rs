//! SSH web server target
//!
//! Uploads the certificate, key and optional chain to a host and reloads
//! the web server. Steps run in a fixed order and stop at the first hard
//! failure; files already uploaded are left in place.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::errors::DeployError;
use crate::ssh::{shell_quote, HostDirectory, RemoteShell, ShellConnector};
use crate::target::{CertificateMaterial, DeployTarget, DeployType};

const DEFAULT_SERVER_BIN: &str = "nginx";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshWebServerConfig {
    pub host_id: i32,
    pub cert_path: String,
    pub key_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_path: Option<String>,
    /// Web server binary, `nginx` when unset
    #[serde(default, alias = "nginx_bin", skip_serializing_if = "Option::is_none")]
    pub server_bin: Option<String>,
    /// Defaults to `<server_bin> -t`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_command: Option<String>,
    /// Defaults to `<server_bin> -s reload`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reload_command: Option<String>,
    #[serde(default)]
    pub backup_enabled: bool,
    /// Defaults to `<cert dir>/backup`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<String>,
}

impl SshWebServerConfig {
    pub fn parse(config: &Value) -> Result<Self, DeployError> {
        let parsed: Self = serde_json::from_value(config.clone())
            .map_err(|e| DeployError::InvalidConfig(format!("ssh_web_server: {}", e)))?;

        for (field, path) in [("cert_path", &parsed.cert_path), ("key_path", &parsed.key_path)] {
            if !path.starts_with('/') {
                return Err(DeployError::InvalidConfig(format!(
                    "{} must be an absolute path, got '{}'",
                    field, path
                )));
            }
        }
        if let Some(chain) = &parsed.chain_path {
            if !chain.is_empty() && !chain.starts_with('/') {
                return Err(DeployError::InvalidConfig(format!(
                    "chain_path must be an absolute path, got '{}'",
                    chain
                )));
            }
        }
        Ok(parsed)
    }

    fn server_bin(&self) -> &str {
        self.server_bin
            .as_deref()
            .filter(|b| !b.is_empty())
            .unwrap_or(DEFAULT_SERVER_BIN)
    }

    fn test_command(&self) -> String {
        match self.test_command.as_deref().filter(|c| !c.is_empty()) {
            Some(cmd) => cmd.to_string(),
            None => format!("{} -t", self.server_bin()),
        }
    }

    fn reload_command(&self) -> String {
        match self.reload_command.as_deref().filter(|c| !c.is_empty()) {
            Some(cmd) => cmd.to_string(),
            None => format!("{} -s reload", self.server_bin()),
        }
    }

    fn cert_dir(&self) -> &str {
        parent_dir(&self.cert_path)
    }

    fn backup_dir(&self) -> String {
        match self.backup_path.as_deref().filter(|p| !p.is_empty()) {
            Some(path) => path.to_string(),
            None => format!("{}/backup", self.cert_dir()),
        }
    }

    fn chain_path(&self) -> Option<&str> {
        self.chain_path.as_deref().filter(|p| !p.is_empty())
    }
}

fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => ".",
    }
}

/// `cert.pem` becomes `cert_<stamp>.pem`
pub(crate) fn backup_file_name(path: &str, stamp: &str) -> String {
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rfind('.') {
        Some(idx) if idx > 0 => format!("{}_{}{}", &file[..idx], stamp, &file[idx..]),
        _ => format!("{}_{}", file, stamp),
    }
}

pub struct SshWebServerTarget {
    hosts: Arc<dyn HostDirectory>,
    connector: Arc<dyn ShellConnector>,
}

impl SshWebServerTarget {
    pub fn new(hosts: Arc<dyn HostDirectory>, connector: Arc<dyn ShellConnector>) -> Self {
        Self { hosts, connector }
    }

    async fn open(&self, config: &SshWebServerConfig) -> Result<Box<dyn RemoteShell>, DeployError> {
        let host = self.hosts.host(config.host_id).await?;
        self.connector.connect(&host).await
    }

    async fn backup(&self, shell: &dyn RemoteShell, config: &SshWebServerConfig) {
        let dir = config.backup_dir();
        let stamp = chrono::Local::now().format("%Y%m%d%H%M%S").to_string();

        if let Err(e) = shell.execute(&format!("mkdir -p {}", shell_quote(&dir))).await {
            warn!("Skipping certificate backup, cannot create {}: {}", dir, e);
            return;
        }
        for path in [&config.cert_path, &config.key_path] {
            let target = format!("{}/{}", dir, backup_file_name(path, &stamp));
            let cmd = format!(
                "cp {} {} 2>/dev/null || true",
                shell_quote(path),
                shell_quote(&target)
            );
            if let Err(e) = shell.execute(&cmd).await {
                warn!("Backup of {} failed: {}", path, e);
            }
        }
    }
}

#[async_trait]
impl DeployTarget for SshWebServerTarget {
    fn deploy_type(&self) -> DeployType {
        DeployType::SshWebServer
    }

    async fn deploy(
        &self,
        material: &CertificateMaterial,
        config: &Value,
    ) -> Result<(), DeployError> {
        let config = SshWebServerConfig::parse(config)?;
        let shell = self.open(&config).await?;

        shell
            .execute(&format!("mkdir -p {}", shell_quote(config.cert_dir())))
            .await?;

        if config.backup_enabled {
            self.backup(shell.as_ref(), &config).await;
        }

        shell
            .upload(material.certificate_pem.as_bytes(), &config.cert_path)
            .await?;
        shell
            .upload(material.private_key_pem.as_bytes(), &config.key_path)
            .await?;
        if let (Some(chain), Some(chain_path)) = (material.chain(), config.chain_path()) {
            shell.upload(chain.as_bytes(), chain_path).await?;
        }

        shell
            .execute(&format!("chmod 644 {}", shell_quote(&config.cert_path)))
            .await?;
        shell
            .execute(&format!("chmod 600 {}", shell_quote(&config.key_path)))
            .await?;

        shell.execute(&config.test_command()).await?;
        shell.execute(&config.reload_command()).await?;

        info!(
            "Deployed certificate to host {} at {}",
            config.host_id, config.cert_path
        );
        Ok(())
    }

    async fn test(&self, config: &Value) -> Result<(), DeployError> {
        let config = SshWebServerConfig::parse(config)?;
        let shell = self.open(&config).await?;

        shell.execute("echo ok").await?;
        shell
            .execute(&format!("command -v {}", shell_quote(config.server_bin())))
            .await?;
        let dir = shell_quote(config.cert_dir());
        shell
            .execute(&format!("test -w {dir} || mkdir -p {dir}"))
            .await?;

        debug!("ssh_web_server target on host {} is reachable", config.host_id);
        Ok(())
    }
}
