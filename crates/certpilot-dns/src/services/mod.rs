pub mod provider_service;

pub use provider_service::{
    CreateDnsProviderRequest, DnsProviderInfo, DnsProviderService, UpdateDnsProviderRequest,
};
