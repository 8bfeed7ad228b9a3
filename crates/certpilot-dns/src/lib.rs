//! DNS-01 challenge providers for certpilot
//!
//! Each registrar implements [`DnsChallengeProvider`]: present a TXT record,
//! remove it again, and test that the stored credentials work. Providers are
//! built from their stored credentials JSON through [`create_provider`], and
//! [`DnsProviderService`] manages the encrypted provider rows.
//!
//! # Supported registrars
//!
//! - **Aliyun** (Alibaba Cloud DNS, ACS3 signed RPC)
//! - **Cloudflare** (API token or global key + email)
//! - **Huawei** (Huawei Cloud DNS, SDK-HMAC-SHA256 signed REST)
//! - **Route53** (AWS SigV4 signed XML API)

pub mod errors;
pub mod providers;
pub mod services;
pub mod signing;

pub use errors::DnsError;
pub use providers::{
    challenge_record_name, create_provider, relative_name, root_domain, AliyunCredentials,
    AliyunProvider, CloudflareCredentials, CloudflareProvider, DefaultDnsProviderFactory,
    DnsChallengeProvider, DnsProviderFactory, DnsProviderType, HuaweiCredentials, HuaweiProvider,
    mask_config, ProviderCredentials, Route53Credentials, Route53Provider, TXT_RECORD_TTL,
};
pub use services::{
    CreateDnsProviderRequest, DnsProviderInfo, DnsProviderService, UpdateDnsProviderRequest,
};
