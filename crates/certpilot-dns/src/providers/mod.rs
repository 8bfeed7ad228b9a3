//! DNS challenge provider implementations
//!
//! One module per registrar, plus the factory that turns a provider type and
//! its credentials JSON into a ready-to-use [`DnsChallengeProvider`].

pub mod aliyun;
pub mod cloudflare;
pub mod credentials;
pub mod huawei;
pub mod route53;
pub mod traits;

use serde_json::Value;
use std::sync::Arc;

pub use aliyun::AliyunProvider;
pub use cloudflare::CloudflareProvider;
pub use credentials::{
    mask_config, AliyunCredentials, CloudflareCredentials, HuaweiCredentials, ProviderCredentials,
    Route53Credentials,
};
pub use huawei::HuaweiProvider;
pub use route53::Route53Provider;
pub use traits::{
    challenge_record_name, relative_name, root_domain, DnsChallengeProvider, DnsProviderType,
    ACME_CHALLENGE_LABEL, TXT_RECORD_TTL,
};

use crate::errors::DnsError;

/// Builds providers from stored credentials.
///
/// The engine only sees this trait so tests can hand out in-memory providers.
pub trait DnsProviderFactory: Send + Sync {
    fn create(
        &self,
        provider_type: DnsProviderType,
        config: &Value,
    ) -> Result<Arc<dyn DnsChallengeProvider>, DnsError>;
}

/// Factory backed by the real registrar APIs
#[derive(Debug, Clone, Default)]
pub struct DefaultDnsProviderFactory;

impl DnsProviderFactory for DefaultDnsProviderFactory {
    fn create(
        &self,
        provider_type: DnsProviderType,
        config: &Value,
    ) -> Result<Arc<dyn DnsChallengeProvider>, DnsError> {
        create_provider(provider_type, config)
    }
}

/// Validates `config` for `provider_type` and builds the provider.
pub fn create_provider(
    provider_type: DnsProviderType,
    config: &Value,
) -> Result<Arc<dyn DnsChallengeProvider>, DnsError> {
    let provider: Arc<dyn DnsChallengeProvider> =
        match ProviderCredentials::parse(provider_type, config)? {
            ProviderCredentials::Aliyun(creds) => Arc::new(AliyunProvider::new(creds)?),
            ProviderCredentials::Cloudflare(creds) => Arc::new(CloudflareProvider::new(creds)?),
            ProviderCredentials::Huawei(creds) => Arc::new(HuaweiProvider::new(creds)?),
            ProviderCredentials::Route53(creds) => Arc::new(Route53Provider::new(creds)?),
        };
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_provider_dispatches_on_type() {
        let cases = [
            (
                DnsProviderType::Aliyun,
                json!({"access_key_id": "ak", "access_key_secret": "sk"}),
            ),
            (DnsProviderType::Cloudflare, json!({"api_token": "tok"})),
            (
                DnsProviderType::Huawei,
                json!({"access_key": "ak", "secret_key": "sk", "region": "ap-southeast-1"}),
            ),
            (
                DnsProviderType::Route53,
                json!({"access_key_id": "ak", "secret_access_key": "sk"}),
            ),
        ];

        for (provider_type, config) in cases {
            let provider = DefaultDnsProviderFactory
                .create(provider_type, &config)
                .unwrap();
            assert_eq!(provider.provider_type(), provider_type);
        }
    }

    #[test]
    fn test_create_provider_rejects_bad_credentials() {
        let result = create_provider(DnsProviderType::Huawei, &json!({"access_key": "ak"}));
        assert!(matches!(result, Err(DnsError::InvalidCredentials(_))));
    }
}
