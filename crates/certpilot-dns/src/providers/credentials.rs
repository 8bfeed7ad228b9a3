//! DNS provider credentials
//!
//! The credentials JSON is stored encrypted; its shape depends on the
//! provider type column next to it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::traits::DnsProviderType;
use crate::errors::DnsError;

/// Alibaba Cloud DNS credentials (RAM user with AliyunDNSFullAccess)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliyunCredentials {
    pub access_key_id: String,
    pub access_key_secret: String,
    /// Defaults to cn-hangzhou
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_id: Option<String>,
}

/// Cloudflare credentials
///
/// Either a scoped API token (Zone:DNS:Edit) or the legacy global API key
/// together with the account email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudflareCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Huawei Cloud DNS credentials (AK/SK)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HuaweiCredentials {
    pub access_key: String,
    pub secret_key: String,
    /// Defaults to cn-north-4
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// AWS credentials for Route53
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route53Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Signing region, defaults to us-east-1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ProviderCredentials {
    Aliyun(AliyunCredentials),
    Cloudflare(CloudflareCredentials),
    Huawei(HuaweiCredentials),
    Route53(Route53Credentials),
}

impl ProviderCredentials {
    /// Parses and validates the credentials JSON for `provider_type`.
    pub fn parse(provider_type: DnsProviderType, config: &Value) -> Result<Self, DnsError> {
        let object = config.as_object().ok_or_else(|| {
            DnsError::InvalidCredentials("credentials must be a JSON object".to_string())
        })?;

        for field in provider_type.required_credentials() {
            let present = object
                .get(field)
                .and_then(Value::as_str)
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false);
            if !present {
                return Err(DnsError::InvalidCredentials(format!(
                    "{} credentials require '{}'",
                    provider_type, field
                )));
            }
        }

        let parsed = match provider_type {
            DnsProviderType::Aliyun => {
                ProviderCredentials::Aliyun(serde_json::from_value(config.clone())?)
            }
            DnsProviderType::Cloudflare => {
                let creds: CloudflareCredentials = serde_json::from_value(config.clone())?;
                let has_token = non_empty(&creds.api_token);
                let has_key = non_empty(&creds.email) && non_empty(&creds.api_key);
                if !has_token && !has_key {
                    return Err(DnsError::InvalidCredentials(
                        "cloudflare credentials require either api_token or email + api_key"
                            .to_string(),
                    ));
                }
                ProviderCredentials::Cloudflare(creds)
            }
            DnsProviderType::Huawei => {
                ProviderCredentials::Huawei(serde_json::from_value(config.clone())?)
            }
            DnsProviderType::Route53 => {
                ProviderCredentials::Route53(serde_json::from_value(config.clone())?)
            }
        };
        Ok(parsed)
    }

    pub fn provider_type(&self) -> DnsProviderType {
        match self {
            ProviderCredentials::Aliyun(_) => DnsProviderType::Aliyun,
            ProviderCredentials::Cloudflare(_) => DnsProviderType::Cloudflare,
            ProviderCredentials::Huawei(_) => DnsProviderType::Huawei,
            ProviderCredentials::Route53(_) => DnsProviderType::Route53,
        }
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false)
}

const SECRET_MARKERS: &[&str] = &["secret", "password", "key", "token", "credential"];

fn is_secret_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SECRET_MARKERS.iter().any(|marker| key.contains(marker))
}

/// Masks secret-like string fields: the first 4 characters followed by `****`.
pub fn mask_config(config: &Value) -> Value {
    let Some(object) = config.as_object() else {
        return config.clone();
    };

    let masked = object
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) if is_secret_key(key) => {
                    let prefix: String = s.chars().take(4).collect();
                    if s.chars().count() > 4 {
                        Value::String(format!("{}****", prefix))
                    } else {
                        Value::String("****".to_string())
                    }
                }
                other => other.clone(),
            };
            (key.clone(), value)
        })
        .collect();
    Value::Object(masked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_aliyun() {
        let creds = ProviderCredentials::parse(
            DnsProviderType::Aliyun,
            &json!({"access_key_id": "LTAI", "access_key_secret": "s3cret"}),
        )
        .unwrap();
        match creds {
            ProviderCredentials::Aliyun(c) => {
                assert_eq!(c.access_key_id, "LTAI");
                assert!(c.region_id.is_none());
            }
            _ => panic!("expected aliyun credentials"),
        }
    }

    #[test]
    fn test_parse_rejects_missing_secret() {
        let err = ProviderCredentials::parse(
            DnsProviderType::Route53,
            &json!({"access_key_id": "AKIA", "secret_access_key": ""}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("secret_access_key"));
    }

    #[test]
    fn test_parse_cloudflare_alternatives() {
        assert!(ProviderCredentials::parse(
            DnsProviderType::Cloudflare,
            &json!({"api_token": "tok"})
        )
        .is_ok());
        assert!(ProviderCredentials::parse(
            DnsProviderType::Cloudflare,
            &json!({"email": "a@example.com", "api_key": "k"})
        )
        .is_ok());
        assert!(ProviderCredentials::parse(
            DnsProviderType::Cloudflare,
            &json!({"email": "a@example.com"})
        )
        .is_err());
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(matches!(
            ProviderCredentials::parse(DnsProviderType::Huawei, &json!("nope")),
            Err(DnsError::InvalidCredentials(_))
        ));
    }

    #[test]
    fn test_mask_config() {
        let masked = mask_config(&json!({
            "access_key_id": "LTAI5tABCDEF",
            "access_key_secret": "abc",
            "region_id": "cn-hangzhou",
            "api_token": "tokentoken",
        }));
        assert_eq!(masked["access_key_id"], "LTAI****");
        assert_eq!(masked["access_key_secret"], "****");
        assert_eq!(masked["region_id"], "cn-hangzhou");
        assert_eq!(masked["api_token"], "toke****");
    }
}
