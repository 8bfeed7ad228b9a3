//! Alibaba Cloud DNS provider
//!
//! Talks to the `alidns` RPC API (version 2015-01-09) with ACS3 signed
//! requests. Records are addressed by the zone's domain name plus the
//! relative `RR` label.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::credentials::AliyunCredentials;
use super::traits::{
    relative_name, root_domain, DnsChallengeProvider, DnsProviderType, TXT_RECORD_TTL,
};
use crate::errors::DnsError;
use crate::signing::acs3;

const ALIDNS_ENDPOINT: &str = "https://alidns.aliyuncs.com";
const ALIDNS_VERSION: &str = "2015-01-09";
const DEFAULT_REGION: &str = "cn-hangzhou";

pub struct AliyunProvider {
    client: Client,
    credentials: AliyunCredentials,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(rename = "Code")]
    code: Option<String>,
    #[serde(rename = "Message")]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescribeDomainRecordsResponse {
    #[serde(rename = "DomainRecords")]
    domain_records: Option<DomainRecords>,
}

#[derive(Debug, Deserialize)]
struct DomainRecords {
    #[serde(rename = "Record", default)]
    record: Vec<DomainRecord>,
}

#[derive(Debug, Deserialize, Clone)]
struct DomainRecord {
    #[serde(rename = "RecordId")]
    record_id: String,
    #[serde(rename = "RR")]
    rr: String,
    #[serde(rename = "Type")]
    record_type: String,
    #[serde(rename = "Value")]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AddDomainRecordResponse {
    #[serde(rename = "RecordId")]
    record_id: String,
}

#[derive(Debug, Deserialize)]
struct EmptyResponse {}

impl AliyunProvider {
    pub fn new(credentials: AliyunCredentials) -> Result<Self, DnsError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| DnsError::ApiError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            credentials,
            endpoint: ALIDNS_ENDPOINT.to_string(),
        })
    }

    /// Points the client at another base URL (used by tests)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn region(&self) -> &str {
        self.credentials
            .region_id
            .as_deref()
            .unwrap_or(DEFAULT_REGION)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        action: &str,
        params: BTreeMap<String, String>,
    ) -> Result<T, DnsError> {
        let url = reqwest::Url::parse(&self.endpoint)
            .map_err(|e| DnsError::ApiError(format!("Invalid endpoint: {}", e)))?;
        let host = match (url.host_str(), url.port()) {
            (Some(h), Some(p)) => format!("{}:{}", h, p),
            (Some(h), None) => h.to_string(),
            _ => return Err(DnsError::ApiError("Endpoint has no host".to_string())),
        };

        let request = acs3::RpcRequest {
            method: "POST",
            host: &host,
            action,
            version: ALIDNS_VERSION,
            params: &params,
        };
        let nonce = uuid::Uuid::new_v4().to_string();
        let headers = acs3::sign(
            &request,
            &self.credentials.access_key_id,
            &self.credentials.access_key_secret,
            chrono::Utc::now(),
            &nonce,
        )?;

        let full_url = format!("{}/?{}", self.endpoint, request.query_string());
        let mut builder = self.client.post(&full_url);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }

        debug!("Aliyun DNS API request: {}", action);

        let response = builder
            .send()
            .await
            .map_err(|e| DnsError::ApiError(format!("API request failed: {}", e)))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DnsError::ApiError(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| {
                    format!(
                        "{}: {}",
                        e.code.unwrap_or_default(),
                        e.message.unwrap_or_default()
                    )
                })
                .unwrap_or(body);
            return Err(DnsError::ApiError(format!(
                "{} returned status {}: {}",
                action, status, detail
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| DnsError::ApiError(format!("Failed to parse {} response: {}", action, e)))
    }

    async fn find_txt_records(&self, root: &str, rr: &str) -> Result<Vec<DomainRecord>, DnsError> {
        let mut params = BTreeMap::new();
        params.insert("DomainName".to_string(), root.to_string());
        params.insert("RRKeyWord".to_string(), rr.to_string());
        params.insert("Type".to_string(), "TXT".to_string());
        params.insert("PageSize".to_string(), "500".to_string());

        let response: DescribeDomainRecordsResponse =
            self.call("DescribeDomainRecords", params).await?;

        // RRKeyWord is a fuzzy match, keep exact names only
        Ok(response
            .domain_records
            .map(|r| r.record)
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.rr == rr && r.record_type.eq_ignore_ascii_case("TXT"))
            .collect())
    }
}

#[async_trait]
impl DnsChallengeProvider for AliyunProvider {
    fn provider_type(&self) -> DnsProviderType {
        DnsProviderType::Aliyun
    }

    async fn create_txt_record(
        &self,
        domain: &str,
        record_name: &str,
        value: &str,
    ) -> Result<(), DnsError> {
        let root = root_domain(domain);
        let rr = relative_name(record_name, &root);

        let existing = self.find_txt_records(&root, &rr).await?;
        if existing.iter().any(|r| r.value == value) {
            debug!("TXT record {}.{} already present", rr, root);
            return Ok(());
        }

        let mut params = BTreeMap::new();
        params.insert("DomainName".to_string(), root.clone());
        params.insert("RR".to_string(), rr.clone());
        params.insert("Type".to_string(), "TXT".to_string());
        params.insert("Value".to_string(), value.to_string());
        params.insert("TTL".to_string(), TXT_RECORD_TTL.to_string());

        let created: AddDomainRecordResponse = self.call("AddDomainRecord", params).await?;
        info!(
            "Created TXT record {}.{} (record id {})",
            rr, root, created.record_id
        );
        Ok(())
    }

    async fn delete_txt_record(&self, domain: &str, record_name: &str) -> Result<(), DnsError> {
        let root = root_domain(domain);
        let rr = relative_name(record_name, &root);

        for record in self.find_txt_records(&root, &rr).await? {
            let mut params = BTreeMap::new();
            params.insert("RecordId".to_string(), record.record_id.clone());
            let _: EmptyResponse = self.call("DeleteDomainRecord", params).await?;
            info!("Deleted TXT record {}.{} ({})", rr, root, record.record_id);
        }
        Ok(())
    }

    async fn test_connection(&self) -> Result<(), DnsError> {
        let mut params = BTreeMap::new();
        params.insert("PageSize".to_string(), "1".to_string());
        match self.call::<EmptyResponse>("DescribeDomains", params).await {
            Ok(_) => {
                info!("Aliyun DNS connection test successful");
                Ok(())
            }
            Err(e) => {
                warn!("Aliyun DNS connection test failed: {}", e);
                Err(DnsError::ConnectionFailed(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> AliyunProvider {
        AliyunProvider::new(AliyunCredentials {
            access_key_id: "LTAITEST".to_string(),
            access_key_secret: "secret".to_string(),
            region_id: None,
        })
        .unwrap()
        .with_endpoint(server.uri())
    }

    fn records_body(records: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "RequestId": "req-1",
            "TotalCount": 1,
            "DomainRecords": { "Record": records }
        })
    }

    #[test]
    fn test_default_region() {
        let p = AliyunProvider::new(AliyunCredentials {
            access_key_id: "a".into(),
            access_key_secret: "b".into(),
            region_id: None,
        })
        .unwrap();
        assert_eq!(p.region(), "cn-hangzhou");
        assert_eq!(p.provider_type(), DnsProviderType::Aliyun);
    }

    #[tokio::test]
    async fn test_create_adds_record_with_relative_rr() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("x-acs-action", "DescribeDomainRecords"))
            .and(query_param("DomainName", "example.com"))
            .and(query_param("RRKeyWord", "_acme-challenge.www"))
            .respond_with(ResponseTemplate::new(200).set_body_json(records_body(serde_json::json!([]))))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(header("x-acs-action", "AddDomainRecord"))
            .and(header_exists("authorization"))
            .and(query_param("RR", "_acme-challenge.www"))
            .and(query_param("Type", "TXT"))
            .and(query_param("Value", "token-value"))
            .and(query_param("TTL", "600"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"RequestId": "r", "RecordId": "1001"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        provider(&server)
            .create_txt_record(
                "www.example.com",
                "_acme-challenge.www.example.com",
                "token-value",
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_is_idempotent_for_same_value() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(header("x-acs-action", "DescribeDomainRecords"))
            .respond_with(ResponseTemplate::new(200).set_body_json(records_body(
                serde_json::json!([
                    {"RecordId": "1", "RR": "_acme-challenge", "Type": "TXT", "Value": "v1"}
                ]),
            )))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(header("x-acs-action", "AddDomainRecord"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        provider(&server)
            .create_txt_record("example.com", "_acme-challenge.example.com", "v1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_removes_every_exact_match() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(header("x-acs-action", "DescribeDomainRecords"))
            .respond_with(ResponseTemplate::new(200).set_body_json(records_body(
                serde_json::json!([
                    {"RecordId": "1", "RR": "_acme-challenge", "Type": "TXT", "Value": "a"},
                    {"RecordId": "2", "RR": "_acme-challenge", "Type": "TXT", "Value": "b"},
                    {"RecordId": "3", "RR": "_acme-challenge.www", "Type": "TXT", "Value": "c"}
                ]),
            )))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(header("x-acs-action", "DeleteDomainRecord"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"RequestId": "r"})),
            )
            .expect(2)
            .mount(&server)
            .await;

        provider(&server)
            .delete_txt_record("example.com", "_acme-challenge.example.com")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_api_error_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "RequestId": "r",
                "Code": "InvalidAccessKeyId.NotFound",
                "Message": "Specified access key is not found."
            })))
            .mount(&server)
            .await;

        let err = provider(&server).test_connection().await.unwrap_err();
        match err {
            DnsError::ConnectionFailed(msg) => {
                assert!(msg.contains("InvalidAccessKeyId.NotFound"))
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
