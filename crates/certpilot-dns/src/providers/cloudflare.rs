//! Cloudflare DNS provider
//!
//! Uses a scoped API token (Zone:DNS:Edit) or the legacy email + global key.

use async_trait::async_trait;
use cloudflare::endpoints::{dns, zones};
use cloudflare::framework::{
    auth::Credentials, client::async_api::Client, client::ClientConfig, Environment,
};
use tracing::{debug, info, warn};

use super::credentials::CloudflareCredentials;
use super::traits::{fqdn, root_domain, DnsChallengeProvider, DnsProviderType, TXT_RECORD_TTL};
use crate::errors::DnsError;

pub struct CloudflareProvider {
    client: Client,
}

impl CloudflareProvider {
    pub fn new(credentials: CloudflareCredentials) -> Result<Self, DnsError> {
        let client = Client::new(
            Self::auth(&credentials)?,
            ClientConfig::default(),
            Environment::Production,
        )
        .map_err(|e| DnsError::InvalidCredentials(format!("Failed to create client: {:?}", e)))?;

        Ok(Self { client })
    }

    /// A token wins over the email + key pair when both are set
    fn auth(credentials: &CloudflareCredentials) -> Result<Credentials, DnsError> {
        if let Some(token) = credentials.api_token.as_ref().filter(|t| !t.is_empty()) {
            return Ok(Credentials::UserAuthToken {
                token: token.clone(),
            });
        }
        match (&credentials.email, &credentials.api_key) {
            (Some(email), Some(key)) if !email.is_empty() && !key.is_empty() => {
                Ok(Credentials::UserAuthKey {
                    email: email.clone(),
                    key: key.clone(),
                })
            }
            _ => Err(DnsError::InvalidCredentials(
                "cloudflare credentials require either api_token or email + api_key".to_string(),
            )),
        }
    }

    async fn zone_id(&self, root: &str) -> Result<String, DnsError> {
        debug!("Fetching Cloudflare zone id for {}", root);

        let endpoint = zones::zone::ListZones {
            params: zones::zone::ListZonesParams {
                name: Some(root.to_string()),
                ..Default::default()
            },
        };

        let response = self
            .client
            .request(&endpoint)
            .await
            .map_err(|e| DnsError::ApiError(format!("Failed to list zones: {:?}", e)))?;

        response
            .result
            .into_iter()
            .find(|zone| zone.name.eq_ignore_ascii_case(root))
            .map(|zone| zone.id)
            .ok_or_else(|| DnsError::ZoneNotFound(root.to_string()))
    }

    async fn txt_records(
        &self,
        zone_id: &str,
        name: &str,
    ) -> Result<Vec<dns::dns::DnsRecord>, DnsError> {
        let endpoint = dns::dns::ListDnsRecords {
            zone_identifier: zone_id,
            params: dns::dns::ListDnsRecordsParams {
                name: Some(name.to_string()),
                record_type: Some(dns::dns::DnsContent::TXT {
                    content: String::new(),
                }),
                ..Default::default()
            },
        };

        let response = self
            .client
            .request(&endpoint)
            .await
            .map_err(|e| DnsError::ApiError(format!("Failed to list records: {:?}", e)))?;

        Ok(response
            .result
            .into_iter()
            .filter(|record| record.name.eq_ignore_ascii_case(name))
            .filter(|record| txt_content(&record.content).is_some())
            .collect())
    }
}

fn txt_content(content: &dns::dns::DnsContent) -> Option<&str> {
    match content {
        dns::dns::DnsContent::TXT { content } => Some(content.trim_matches('"')),
        _ => None,
    }
}

#[async_trait]
impl DnsChallengeProvider for CloudflareProvider {
    fn provider_type(&self) -> DnsProviderType {
        DnsProviderType::Cloudflare
    }

    async fn create_txt_record(
        &self,
        domain: &str,
        record_name: &str,
        value: &str,
    ) -> Result<(), DnsError> {
        let root = root_domain(domain);
        let zone_id = self.zone_id(&root).await?;
        let name = fqdn(record_name, &root);

        let existing = self.txt_records(&zone_id, &name).await?;
        if existing
            .iter()
            .any(|record| txt_content(&record.content) == Some(value))
        {
            debug!("TXT record {} already present", name);
            return Ok(());
        }

        let endpoint = dns::dns::CreateDnsRecord {
            zone_identifier: &zone_id,
            params: dns::dns::CreateDnsRecordParams {
                name: &name,
                content: dns::dns::DnsContent::TXT {
                    content: value.to_string(),
                },
                ttl: Some(TXT_RECORD_TTL),
                priority: None,
                proxied: Some(false),
            },
        };

        let response = self
            .client
            .request(&endpoint)
            .await
            .map_err(|e| DnsError::ApiError(format!("Failed to create record: {:?}", e)))?;

        info!(
            "Created TXT record {} ({}) in zone {}",
            name, response.result.id, zone_id
        );
        Ok(())
    }

    async fn delete_txt_record(&self, domain: &str, record_name: &str) -> Result<(), DnsError> {
        let root = root_domain(domain);
        let zone_id = self.zone_id(&root).await?;
        let name = fqdn(record_name, &root);

        for record in self.txt_records(&zone_id, &name).await? {
            let endpoint = dns::dns::DeleteDnsRecord {
                zone_identifier: &zone_id,
                identifier: &record.id,
            };
            self.client
                .request(&endpoint)
                .await
                .map_err(|e| DnsError::ApiError(format!("Failed to delete record: {:?}", e)))?;
            info!("Deleted TXT record {} ({}) from zone {}", name, record.id, zone_id);
        }
        Ok(())
    }

    async fn test_connection(&self) -> Result<(), DnsError> {
        let endpoint = zones::zone::ListZones {
            params: Default::default(),
        };
        match self.client.request(&endpoint).await {
            Ok(_) => {
                info!("Cloudflare API connection test successful");
                Ok(())
            }
            Err(e) => {
                warn!("Cloudflare API connection test failed: {:?}", e);
                Err(DnsError::ConnectionFailed(format!("{:?}", e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(token: Option<&str>, email: Option<&str>, key: Option<&str>) -> CloudflareCredentials {
        CloudflareCredentials {
            api_token: token.map(String::from),
            email: email.map(String::from),
            api_key: key.map(String::from),
        }
    }

    #[test]
    fn test_auth_prefers_token() {
        let auth =
            CloudflareProvider::auth(&creds(Some("tok"), Some("a@example.com"), Some("k"))).unwrap();
        assert!(matches!(auth, Credentials::UserAuthToken { token } if token == "tok"));
    }

    #[test]
    fn test_auth_falls_back_to_global_key() {
        let auth =
            CloudflareProvider::auth(&creds(Some(""), Some("a@example.com"), Some("k"))).unwrap();
        assert!(matches!(
            auth,
            Credentials::UserAuthKey { email, key } if email == "a@example.com" && key == "k"
        ));
    }

    #[test]
    fn test_auth_rejects_incomplete_credentials() {
        assert!(matches!(
            CloudflareProvider::auth(&creds(None, Some("a@example.com"), None)),
            Err(DnsError::InvalidCredentials(_))
        ));
    }

    #[test]
    fn test_txt_content_strips_quotes() {
        let quoted = dns::dns::DnsContent::TXT {
            content: "\"token\"".to_string(),
        };
        assert_eq!(txt_content(&quoted), Some("token"));

        let cname = dns::dns::DnsContent::CNAME {
            content: "example.com".to_string(),
        };
        assert_eq!(txt_content(&cname), None);
    }

    #[test]
    fn test_new_builds_client() {
        let provider = CloudflareProvider::new(creds(Some("tok"), None, None)).unwrap();
        assert_eq!(provider.provider_type(), DnsProviderType::Cloudflare);
    }
}
