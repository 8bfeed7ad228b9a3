//! Domain models for certificates, tasks and deploy configs

use certpilot_core::UtcDateTime;
use certpilot_deployer::{CertificateMaterial, DeployType};
use certpilot_entities::{certificates, deploy_configs, renew_tasks};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::errors::{CertificateError, RepositoryError};

/// Closed string enums stored as lowercase text columns
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $value)]
                $variant,
            )+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $value,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CertificateError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($value => Ok($name::$variant),)+
                    other => Err(CertificateError::Validation(format!(
                        "invalid {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

string_enum!(
    SourceType {
        Acme => "acme",
        Cloud => "cloud",
        Manual => "manual",
    }
);

string_enum!(
    /// `error` and `pending` are only set by task outcomes, the rest follow
    /// from `not_after`.
    CertificateStatus {
        Pending => "pending",
        Active => "active",
        Expiring => "expiring",
        Expired => "expired",
        Error => "error",
    }
);

string_enum!(
    TaskType {
        Issue => "issue",
        Renew => "renew",
        Deploy => "deploy",
    }
);

string_enum!(
    TaskStatus {
        Pending => "pending",
        Running => "running",
        Success => "success",
        Failed => "failed",
    }
);

string_enum!(
    TriggerType {
        Auto => "auto",
        Manual => "manual",
    }
);

string_enum!(
    CaProvider {
        LetsEncrypt => "letsencrypt",
        ZeroSsl => "zerossl",
        Google => "google",
        BuyPass => "buypass",
    }
);

string_enum!(
    KeyAlgorithm {
        Rsa2048 => "rsa2048",
        Rsa3072 => "rsa3072",
        Rsa4096 => "rsa4096",
        Ec256 => "ec256",
        Ec384 => "ec384",
    }
);

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }

    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal()
    }

    /// Tasks only move forward; terminal tasks never change again.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Success)
                | (TaskStatus::Running, TaskStatus::Failed)
        )
    }
}

impl CaProvider {
    /// Unknown or empty names fall back to Let's Encrypt
    pub fn resolve(name: &str) -> Self {
        CaProvider::from_str(&name.trim().to_ascii_lowercase()).unwrap_or(CaProvider::LetsEncrypt)
    }

    pub fn directory_url(&self, staging: bool) -> &'static str {
        match (self, staging) {
            (CaProvider::LetsEncrypt, false) => instant_acme::LetsEncrypt::Production.url(),
            (CaProvider::LetsEncrypt, true) => instant_acme::LetsEncrypt::Staging.url(),
            (CaProvider::ZeroSsl, _) => "https://acme.zerossl.com/v2/DV90",
            (CaProvider::Google, _) => "https://dv.acme-v02.api.pki.goog/directory",
            (CaProvider::BuyPass, false) => "https://api.buypass.com/acme/directory",
            (CaProvider::BuyPass, true) => "https://api.test4.buypass.no/acme/directory",
        }
    }

    /// CAs that refuse new accounts without external account binding
    pub fn requires_external_account(&self) -> bool {
        matches!(self, CaProvider::ZeroSsl | CaProvider::Google)
    }
}

impl Default for KeyAlgorithm {
    fn default() -> Self {
        KeyAlgorithm::Rsa2048
    }
}

/// Parsed facts about an X.509 certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateDetails {
    pub not_before: UtcDateTime,
    pub not_after: UtcDateTime,
    /// Hex of the first 20 bytes of the DER encoding
    pub fingerprint: String,
    pub issuer: String,
    pub subject: String,
    pub dns_names: Vec<String>,
}

/// Material produced by an issuance, key in plaintext
#[derive(Clone)]
pub struct IssuedCertificate {
    /// Leaf followed by intermediates
    pub certificate_pem: String,
    pub private_key_pem: String,
    /// Intermediates only
    pub chain_pem: Option<String>,
    pub details: CertificateDetails,
}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("details", &self.details)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    pub id: i32,
    pub name: String,
    pub domain: String,
    pub san_domains: Vec<String>,
    pub source_type: SourceType,
    /// CA name for ACME certificates, vendor name for cloud ones
    pub ca_provider: String,
    pub key_algorithm: KeyAlgorithm,
    pub dns_provider_id: Option<i32>,
    pub acme_email: Option<String>,
    pub cloud_account_id: Option<i32>,
    pub cloud_cert_id: Option<String>,
    pub status: CertificateStatus,
    pub auto_renew: bool,
    pub renew_days_before: i32,
    pub certificate_pem: Option<String>,
    /// Decrypted on load, never serialized
    #[serde(skip_serializing, default)]
    pub private_key_pem: Option<String>,
    pub chain_pem: Option<String>,
    pub not_before: Option<UtcDateTime>,
    pub not_after: Option<UtcDateTime>,
    pub fingerprint: Option<String>,
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub last_error: Option<String>,
    pub last_renew_at: Option<UtcDateTime>,
    pub created_at: UtcDateTime,
    pub updated_at: UtcDateTime,
}

impl Certificate {
    /// Primary domain followed by the SAN list
    pub fn all_domains(&self) -> Vec<String> {
        let mut domains = Vec::with_capacity(1 + self.san_domains.len());
        domains.push(self.domain.clone());
        domains.extend(
            self.san_domains
                .iter()
                .filter(|d| **d != self.domain)
                .cloned(),
        );
        domains
    }

    pub fn days_until_expiry(&self, now: UtcDateTime) -> Option<i64> {
        self.not_after.map(|t| (t - now).num_days())
    }

    /// Material for deploy targets, when both certificate and key exist
    pub fn material(&self) -> Option<CertificateMaterial> {
        match (&self.certificate_pem, &self.private_key_pem) {
            (Some(cert), Some(key)) if !cert.is_empty() && !key.is_empty() => {
                Some(CertificateMaterial {
                    certificate_pem: cert.clone(),
                    private_key_pem: key.clone(),
                    chain_pem: self.chain_pem.clone(),
                })
            }
            _ => None,
        }
    }
}

impl TryFrom<certificates::Model> for Certificate {
    type Error = RepositoryError;

    /// The private key column is copied as stored; callers decode it.
    fn try_from(model: certificates::Model) -> Result<Self, Self::Error> {
        let san_domains: Vec<String> = serde_json::from_value(model.san_domains)?;
        Ok(Certificate {
            id: model.id,
            name: model.name,
            domain: model.domain,
            san_domains,
            source_type: parse_column(&model.source_type)?,
            ca_provider: model.ca_provider,
            key_algorithm: parse_column(&model.key_algorithm)?,
            dns_provider_id: model.dns_provider_id,
            acme_email: model.acme_email,
            cloud_account_id: model.cloud_account_id,
            cloud_cert_id: model.cloud_cert_id,
            status: parse_column(&model.status)?,
            auto_renew: model.auto_renew,
            renew_days_before: model.renew_days_before,
            certificate_pem: model.certificate_pem,
            private_key_pem: model.private_key_pem,
            chain_pem: model.chain_pem,
            not_before: model.not_before,
            not_after: model.not_after,
            fingerprint: model.fingerprint,
            issuer: model.issuer,
            subject: model.subject,
            last_error: model.last_error,
            last_renew_at: model.last_renew_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

pub(crate) fn parse_column<T: FromStr>(value: &str) -> Result<T, RepositoryError> {
    value
        .parse()
        .map_err(|_| RepositoryError::InvalidData(format!("unexpected column value '{}'", value)))
}

#[derive(Debug, Clone)]
pub struct NewCertificate {
    pub name: String,
    pub domain: String,
    pub san_domains: Vec<String>,
    pub source_type: SourceType,
    pub ca_provider: String,
    pub key_algorithm: KeyAlgorithm,
    pub dns_provider_id: Option<i32>,
    pub acme_email: Option<String>,
    pub cloud_account_id: Option<i32>,
    pub status: CertificateStatus,
    pub auto_renew: bool,
    pub renew_days_before: i32,
}

/// Editable certificate settings; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CertificateUpdate {
    pub name: Option<String>,
    pub auto_renew: Option<bool>,
    pub renew_days_before: Option<i32>,
    pub dns_provider_id: Option<i32>,
    pub acme_email: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CertificateFilter {
    pub status: Option<CertificateStatus>,
    pub source_type: Option<SourceType>,
    /// Substring of the primary domain
    pub domain: Option<String>,
    pub page: u64,
    pub page_size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;

/// 1-based page number and a bounded page size
pub fn normalize_page(page: u64, page_size: u64) -> (u64, u64) {
    let page = page.max(1);
    let page_size = match page_size {
        0 => DEFAULT_PAGE_SIZE,
        n => n.min(MAX_PAGE_SIZE),
    };
    (page, page_size)
}

/// JSON document stored in `renew_tasks.result`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_to: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_errors: Option<Vec<String>>,
}

impl TaskResult {
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewTask {
    pub id: i32,
    pub certificate_id: i32,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub trigger_type: TriggerType,
    pub started_at: Option<UtcDateTime>,
    pub finished_at: Option<UtcDateTime>,
    pub error_message: Option<String>,
    pub result: Option<TaskResult>,
    pub created_at: UtcDateTime,
}

impl TryFrom<renew_tasks::Model> for RenewTask {
    type Error = RepositoryError;

    fn try_from(model: renew_tasks::Model) -> Result<Self, Self::Error> {
        let result = model.result.map(serde_json::from_value).transpose()?;
        Ok(RenewTask {
            id: model.id,
            certificate_id: model.certificate_id,
            task_type: parse_column(&model.task_type)?,
            status: parse_column(&model.status)?,
            trigger_type: parse_column(&model.trigger_type)?,
            started_at: model.started_at,
            finished_at: model.finished_at,
            error_message: model.error_message,
            result,
            created_at: model.created_at,
        })
    }
}

/// A task to claim; only `pending` and `running` are accepted
#[derive(Debug, Clone)]
pub struct NewTask {
    pub certificate_id: i32,
    pub task_type: TaskType,
    pub trigger_type: TriggerType,
    pub status: TaskStatus,
}

impl NewTask {
    pub fn pending(certificate_id: i32, task_type: TaskType, trigger_type: TriggerType) -> Self {
        Self {
            certificate_id,
            task_type,
            trigger_type,
            status: TaskStatus::Pending,
        }
    }

    pub fn running(certificate_id: i32, task_type: TaskType, trigger_type: TriggerType) -> Self {
        Self {
            status: TaskStatus::Running,
            ..Self::pending(certificate_id, task_type, trigger_type)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub certificate_id: Option<i32>,
    pub task_type: Option<TaskType>,
    pub status: Option<TaskStatus>,
    pub trigger_type: Option<TriggerType>,
    pub page: u64,
    pub page_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    pub id: i32,
    pub certificate_id: i32,
    pub name: String,
    pub deploy_type: DeployType,
    pub target_config: Value,
    pub auto_deploy: bool,
    pub enabled: bool,
    pub last_deploy_ok: Option<bool>,
    pub last_deploy_at: Option<UtcDateTime>,
    pub last_error: Option<String>,
    pub created_at: UtcDateTime,
}

impl TryFrom<deploy_configs::Model> for DeployConfig {
    type Error = RepositoryError;

    fn try_from(model: deploy_configs::Model) -> Result<Self, Self::Error> {
        Ok(DeployConfig {
            id: model.id,
            certificate_id: model.certificate_id,
            name: model.name,
            deploy_type: parse_column(&model.deploy_type)?,
            target_config: model.target_config,
            auto_deploy: model.auto_deploy,
            enabled: model.enabled,
            last_deploy_ok: model.last_deploy_ok,
            last_deploy_at: model.last_deploy_at,
            last_error: model.last_error,
            created_at: model.created_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDeployConfig {
    pub certificate_id: i32,
    pub name: String,
    pub deploy_type: DeployType,
    pub target_config: Value,
    #[serde(default = "default_true")]
    pub auto_deploy: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployConfigUpdate {
    pub name: Option<String>,
    pub target_config: Option<Value>,
    pub auto_deploy: Option<bool>,
    pub enabled: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_transitions_only_move_forward() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Failed));
        assert!(Running.can_transition_to(Success));
        assert!(Running.can_transition_to(Failed));

        assert!(!Running.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Success));
        for terminal in [Success, Failed] {
            for next in [Pending, Running, Success, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_ca_provider_fallback_and_directories() {
        assert_eq!(CaProvider::resolve("ZeroSSL"), CaProvider::ZeroSsl);
        assert_eq!(CaProvider::resolve("something-else"), CaProvider::LetsEncrypt);
        assert_eq!(CaProvider::resolve(""), CaProvider::LetsEncrypt);

        assert_eq!(
            CaProvider::LetsEncrypt.directory_url(true),
            "https://acme-staging-v02.api.letsencrypt.org/directory"
        );
        assert_eq!(
            CaProvider::BuyPass.directory_url(true),
            "https://api.test4.buypass.no/acme/directory"
        );
        assert_eq!(
            CaProvider::Google.directory_url(false),
            "https://dv.acme-v02.api.pki.goog/directory"
        );
        assert!(CaProvider::ZeroSsl.requires_external_account());
        assert!(!CaProvider::BuyPass.requires_external_account());
    }

    #[test]
    fn test_enum_strings() {
        assert_eq!(KeyAlgorithm::from_str("ec384").unwrap(), KeyAlgorithm::Ec384);
        assert!(KeyAlgorithm::from_str("dsa").is_err());
        assert_eq!(CertificateStatus::Expiring.to_string(), "expiring");
        assert_eq!(
            serde_json::to_string(&TriggerType::Manual).unwrap(),
            "\"manual\""
        );
    }

    #[test]
    fn test_task_result_omits_empty_fields() {
        let json = serde_json::to_value(TaskResult::failed("boom")).unwrap();
        assert_eq!(json, serde_json::json!({"success": false, "message": "boom"}));

        let parsed: TaskResult = serde_json::from_value(serde_json::json!({
            "success": true,
            "message": "",
            "deployed_to": ["edge"]
        }))
        .unwrap();
        assert_eq!(parsed.deployed_to, Some(vec!["edge".to_string()]));
    }

    #[test]
    fn test_normalize_page() {
        assert_eq!(normalize_page(0, 0), (1, DEFAULT_PAGE_SIZE));
        assert_eq!(normalize_page(3, 1000), (3, MAX_PAGE_SIZE));
    }

    #[test]
    fn test_all_domains_skips_duplicate_primary() {
        let now = chrono::Utc::now();
        let cert = Certificate {
            id: 1,
            name: "site".to_string(),
            domain: "example.com".to_string(),
            san_domains: vec!["example.com".to_string(), "www.example.com".to_string()],
            source_type: SourceType::Acme,
            ca_provider: "letsencrypt".to_string(),
            key_algorithm: KeyAlgorithm::Ec256,
            dns_provider_id: Some(1),
            acme_email: None,
            cloud_account_id: None,
            cloud_cert_id: None,
            status: CertificateStatus::Pending,
            auto_renew: true,
            renew_days_before: 30,
            certificate_pem: None,
            private_key_pem: None,
            chain_pem: None,
            not_before: None,
            not_after: Some(now + chrono::Duration::days(10)),
            fingerprint: None,
            issuer: None,
            subject: None,
            last_error: None,
            last_renew_at: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(cert.all_domains(), vec!["example.com", "www.example.com"]);
        assert_eq!(cert.days_until_expiry(now), Some(10));
        assert!(cert.material().is_none());
    }
}
