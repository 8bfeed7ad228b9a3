//! DNS challenge provider contract and domain name helpers

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DnsError;

/// TTL used for every challenge record
pub const TXT_RECORD_TTL: u32 = 600;

pub const ACME_CHALLENGE_LABEL: &str = "_acme-challenge";

/// Supported registrars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DnsProviderType {
    Aliyun,
    Cloudflare,
    Huawei,
    #[serde(alias = "aws_route53")]
    Route53,
}

impl std::fmt::Display for DnsProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DnsProviderType::Aliyun => write!(f, "aliyun"),
            DnsProviderType::Cloudflare => write!(f, "cloudflare"),
            DnsProviderType::Huawei => write!(f, "huawei"),
            DnsProviderType::Route53 => write!(f, "route53"),
        }
    }
}

impl std::str::FromStr for DnsProviderType {
    type Err = DnsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aliyun" | "alidns" => Ok(DnsProviderType::Aliyun),
            "cloudflare" | "cf" => Ok(DnsProviderType::Cloudflare),
            "huawei" | "huaweicloud" => Ok(DnsProviderType::Huawei),
            "route53" | "aws_route53" | "aws" => Ok(DnsProviderType::Route53),
            _ => Err(DnsError::InvalidProviderType(s.to_string())),
        }
    }
}

impl DnsProviderType {
    /// Credential fields that must be present and non-empty
    pub fn required_credentials(&self) -> Vec<&'static str> {
        match self {
            DnsProviderType::Aliyun => vec!["access_key_id", "access_key_secret"],
            // api_token, or email + api_key; checked when parsing
            DnsProviderType::Cloudflare => vec![],
            DnsProviderType::Huawei => vec!["access_key", "secret_key"],
            DnsProviderType::Route53 => vec!["access_key_id", "secret_access_key"],
        }
    }
}

/// A registrar able to answer DNS-01 challenges.
///
/// `domain` is the certificate domain being validated and `record_name` the
/// challenge name (`_acme-challenge.<domain>`, absolute or relative to the
/// zone). Creation is idempotent for the same value, and several values may
/// coexist at one name (a wildcard and its apex share a challenge name).
/// Deletion removes every TXT record at the name.
#[async_trait]
pub trait DnsChallengeProvider: Send + Sync {
    fn provider_type(&self) -> DnsProviderType;

    async fn create_txt_record(
        &self,
        domain: &str,
        record_name: &str,
        value: &str,
    ) -> Result<(), DnsError>;

    async fn delete_txt_record(&self, domain: &str, record_name: &str) -> Result<(), DnsError>;

    async fn test_connection(&self) -> Result<(), DnsError>;
}

/// Lowercase, without a trailing dot or a leading wildcard label
pub fn normalize_domain(domain: &str) -> String {
    domain
        .trim()
        .trim_end_matches('.')
        .trim_start_matches("*.")
        .to_lowercase()
}

/// Registrable root: the last two labels
pub fn root_domain(domain: &str) -> String {
    let normalized = normalize_domain(domain);
    let labels: Vec<&str> = normalized.split('.').collect();
    if labels.len() <= 2 {
        return normalized;
    }
    labels[labels.len() - 2..].join(".")
}

pub fn challenge_record_name(domain: &str) -> String {
    format!("{}.{}", ACME_CHALLENGE_LABEL, normalize_domain(domain))
}

/// Fully qualified record name (no trailing dot) within `root`
pub fn fqdn(record_name: &str, root: &str) -> String {
    let name = normalize_domain(record_name);
    if name == root || name.ends_with(&format!(".{}", root)) {
        name
    } else {
        format!("{}.{}", name, root)
    }
}

/// Record name relative to `root`, `@` for the apex
pub fn relative_name(record_name: &str, root: &str) -> String {
    let full = fqdn(record_name, root);
    if full == root {
        return "@".to_string();
    }
    full.strip_suffix(&format!(".{}", root))
        .unwrap_or(&full)
        .to_string()
}

/// TXT values are stored quoted by Route53 and Huawei
pub fn quote_txt(value: &str) -> String {
    format!("\"{}\"", value.trim_matches('"'))
}
