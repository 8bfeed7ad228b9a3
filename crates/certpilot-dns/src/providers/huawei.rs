//! Huawei Cloud DNS provider
//!
//! REST API v2 signed with the APIG `SDK-HMAC-SHA256` scheme. A record set
//! holds every TXT value for a name, so creation merges into an existing set.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::credentials::HuaweiCredentials;
use super::traits::{
    fqdn, quote_txt, root_domain, DnsChallengeProvider, DnsProviderType, TXT_RECORD_TTL,
};
use crate::errors::DnsError;

const DEFAULT_REGION: &str = "cn-north-4";

mod sdk_signing {
    use crate::signing::{canonical_query, hmac_sha256, percent_encode, sha256_hex, SigningError};

    pub const ALGORITHM: &str = "SDK-HMAC-SHA256";

    /// Returns the `Authorization` header value.
    #[allow(clippy::too_many_arguments)]
    pub fn sign_request(
        method: &str,
        path: &str,
        query: &[(&str, &str)],
        host: &str,
        sdk_date: &str,
        payload: &[u8],
        access_key: &str,
        secret_key: &str,
    ) -> Result<String, SigningError> {
        // APIG canonical URIs always end with a slash
        let mut canonical_uri: String = path
            .split('/')
            .map(percent_encode)
            .collect::<Vec<_>>()
            .join("/");
        if !canonical_uri.ends_with('/') {
            canonical_uri.push('/');
        }

        let canonical_headers = format!("host:{}\nx-sdk-date:{}\n", host, sdk_date);
        let signed_headers = "host;x-sdk-date";

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method,
            canonical_uri,
            canonical_query(query.iter().copied()),
            canonical_headers,
            signed_headers,
            sha256_hex(payload)
        );

        let string_to_sign = format!(
            "{}\n{}\n{}",
            ALGORITHM,
            sdk_date,
            sha256_hex(canonical_request.as_bytes())
        );
        let signature = hex::encode(hmac_sha256(
            secret_key.as_bytes(),
            string_to_sign.as_bytes(),
        )?);

        Ok(format!(
            "{} Access={}, SignedHeaders={}, Signature={}",
            ALGORITHM, access_key, signed_headers, signature
        ))
    }
}

pub struct HuaweiProvider {
    client: Client,
    credentials: HuaweiCredentials,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct ListZonesResponse {
    #[serde(default)]
    zones: Vec<Zone>,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ListRecordSetsResponse {
    #[serde(default)]
    recordsets: Vec<RecordSet>,
}

#[derive(Debug, Deserialize, Clone)]
struct RecordSet {
    id: String,
    name: String,
    #[serde(rename = "type")]
    record_type: String,
    #[serde(default)]
    records: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RecordSetBody {
    name: String,
    #[serde(rename = "type")]
    record_type: String,
    ttl: u32,
    records: Vec<String>,
}

impl HuaweiProvider {
    pub fn new(credentials: HuaweiCredentials) -> Result<Self, DnsError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| DnsError::ApiError(format!("Failed to create HTTP client: {}", e)))?;

        let region = credentials
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        Ok(Self {
            client,
            credentials,
            endpoint: format!("https://dns.{}.myhuaweicloud.com", region),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn api_request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&RecordSetBody>,
    ) -> Result<String, DnsError> {
        let url = reqwest::Url::parse(&self.endpoint)
            .map_err(|e| DnsError::ApiError(format!("Invalid endpoint: {}", e)))?;
        let host = match (url.host_str(), url.port()) {
            (Some(h), Some(p)) => format!("{}:{}", h, p),
            (Some(h), None) => h.to_string(),
            _ => return Err(DnsError::ApiError("Endpoint has no host".to_string())),
        };

        let payload = match body {
            Some(b) => serde_json::to_vec(b)?,
            None => Vec::new(),
        };
        let sdk_date = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let authorization = sdk_signing::sign_request(
            method.as_str(),
            path,
            query,
            &host,
            &sdk_date,
            &payload,
            &self.credentials.access_key,
            &self.credentials.secret_key,
        )?;

        let mut request = self
            .client
            .request(method.clone(), format!("{}{}", self.endpoint, path))
            .query(query)
            .header("Host", host)
            .header("X-Sdk-Date", sdk_date)
            .header("Authorization", authorization)
            .header("Content-Type", "application/json");
        if body.is_some() {
            request = request.body(payload);
        }

        debug!("Huawei DNS API request: {} {}", method, path);

        let response = request
            .send()
            .await
            .map_err(|e| DnsError::ApiError(format!("API request failed: {}", e)))?;
        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| DnsError::ApiError(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(DnsError::ApiError(format!(
                "API returned status {}: {}",
                status, response_body
            )));
        }
        Ok(response_body)
    }

    async fn zone_id(&self, root: &str) -> Result<String, DnsError> {
        let zone_name = format!("{}.", root);
        let body = self
            .api_request(
                Method::GET,
                "/v2/zones",
                &[("type", "public"), ("name", zone_name.as_str())],
                None,
            )
            .await?;
        let parsed: ListZonesResponse = serde_json::from_str(&body)?;

        // `name` filters by fuzzy match
        parsed
            .zones
            .into_iter()
            .find(|z| z.name.trim_end_matches('.').eq_ignore_ascii_case(root))
            .map(|z| z.id)
            .ok_or_else(|| DnsError::ZoneNotFound(root.to_string()))
    }

    async fn txt_record_sets(&self, zone_id: &str, name: &str) -> Result<Vec<RecordSet>, DnsError> {
        let path = format!("/v2/zones/{}/recordsets", zone_id);
        let body = self
            .api_request(
                Method::GET,
                &path,
                &[("name", name), ("type", "TXT")],
                None,
            )
            .await?;
        let parsed: ListRecordSetsResponse = serde_json::from_str(&body)?;
        Ok(parsed
            .recordsets
            .into_iter()
            .filter(|rs| rs.name.eq_ignore_ascii_case(name) && rs.record_type == "TXT")
            .collect())
    }
}

#[async_trait]
impl DnsChallengeProvider for HuaweiProvider {
    fn provider_type(&self) -> DnsProviderType {
        DnsProviderType::Huawei
    }

    async fn create_txt_record(
        &self,
        domain: &str,
        record_name: &str,
        value: &str,
    ) -> Result<(), DnsError> {
        let root = root_domain(domain);
        let zone_id = self.zone_id(&root).await?;
        let name = format!("{}.", fqdn(record_name, &root));
        let quoted = quote_txt(value);

        let existing = self.txt_record_sets(&zone_id, &name).await?;
        match existing.into_iter().next() {
            Some(set) if set.records.contains(&quoted) => {
                debug!("TXT record {} already present", name);
            }
            Some(set) => {
                let mut records = set.records.clone();
                records.push(quoted);
                let body = RecordSetBody {
                    name: name.clone(),
                    record_type: "TXT".to_string(),
                    ttl: TXT_RECORD_TTL,
                    records,
                };
                let path = format!("/v2/zones/{}/recordsets/{}", zone_id, set.id);
                self.api_request(Method::PUT, &path, &[], Some(&body))
                    .await?;
                info!("Added value to TXT record set {}", name);
            }
            None => {
                let body = RecordSetBody {
                    name: name.clone(),
                    record_type: "TXT".to_string(),
                    ttl: TXT_RECORD_TTL,
                    records: vec![quoted],
                };
                let path = format!("/v2/zones/{}/recordsets", zone_id);
                self.api_request(Method::POST, &path, &[], Some(&body))
                    .await?;
                info!("Created TXT record set {}", name);
            }
        }
        Ok(())
    }

    async fn delete_txt_record(&self, domain: &str, record_name: &str) -> Result<(), DnsError> {
        let root = root_domain(domain);
        let zone_id = self.zone_id(&root).await?;
        let name = format!("{}.", fqdn(record_name, &root));

        for set in self.txt_record_sets(&zone_id, &name).await? {
            let path = format!("/v2/zones/{}/recordsets/{}", zone_id, set.id);
            self.api_request(Method::DELETE, &path, &[], None).await?;
            info!("Deleted TXT record set {} ({})", name, set.id);
        }
        Ok(())
    }

    async fn test_connection(&self) -> Result<(), DnsError> {
        match self
            .api_request(Method::GET, "/v2/zones", &[("limit", "1")], None)
            .await
        {
            Ok(_) => {
                info!("Huawei DNS connection test successful");
                Ok(())
            }
            Err(e) => {
                warn!("Huawei DNS connection test failed: {}", e);
                Err(DnsError::ConnectionFailed(e.to_string()))
            }
        }
    }
}
