//! Cloud CA issuance
//!
//! Cloud vendors issue certificates asynchronously: an application returns an
//! order id plus a DNS record the operator has to publish, and the material
//! is collected later by polling. [`CloudCaProvider`] models that flow and
//! [`CloudCaDirectory`] resolves configured cloud accounts to providers.

use async_trait::async_trait;
use certpilot_core::{CloudAccountEntry, SecretCodec};
use certpilot_dns::signing::acs3;
use chrono::NaiveDate;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::errors::CloudCaError;

const CAS_ENDPOINT: &str = "https://cas.aliyuncs.com";
const CAS_VERSION: &str = "2020-04-07";
const DEFAULT_REGION: &str = "cn-hangzhou";
const FREE_PRODUCT_CODE: &str = "digicert-free-1-free";
const DNS_AUTH_LABEL: &str = "_dnsauth";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudVendor {
    Aliyun,
}

impl CloudVendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudVendor::Aliyun => "aliyun",
        }
    }
}

impl std::fmt::Display for CloudVendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudVendor {
    type Err = CloudCaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aliyun" | "alibaba" => Ok(CloudVendor::Aliyun),
            other => Err(CloudCaError::UnsupportedVendor(other.to_string())),
        }
    }
}

/// Record the operator must publish before the vendor validates the order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsValidationRecord {
    pub name: String,
    pub record_type: String,
    pub value: String,
}

impl std::fmt::Display for DnsValidationRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.name, self.record_type, self.value)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    /// Leaf followed by intermediates
    pub certificate_pem: String,
    pub private_key_pem: String,
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("certificate_pem", &format!("{} bytes", self.certificate_pem.len()))
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyStatus {
    PendingValidation(DnsValidationRecord),
    Issued(CertificateBundle),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyResult {
    pub order_id: String,
    /// Present once the vendor has assigned a certificate id
    pub cert_id: Option<String>,
    pub status: ApplyStatus,
}

impl ApplyResult {
    /// Id used for later polling
    pub fn tracking_id(&self) -> &str {
        self.cert_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.order_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudCertificateStatus {
    /// Material is included when the status call already returns it
    Issued(Option<CertificateBundle>),
    Pending(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloudCertificateInfo {
    pub cert_id: String,
    pub domain: String,
    pub san_domains: Vec<String>,
    pub not_before: Option<NaiveDate>,
    pub not_after: Option<NaiveDate>,
    pub issuer: String,
}

#[async_trait]
pub trait CloudCaProvider: Send + Sync {
    fn vendor(&self) -> CloudVendor;

    async fn apply_certificate(
        &self,
        domain: &str,
        san_domains: &[String],
    ) -> Result<ApplyResult, CloudCaError>;

    async fn check_certificate_status(
        &self,
        id: &str,
    ) -> Result<CloudCertificateStatus, CloudCaError>;

    async fn download_certificate(&self, id: &str) -> Result<CertificateBundle, CloudCaError>;

    async fn list_certificates(&self) -> Result<Vec<CloudCertificateInfo>, CloudCaError>;
}

/// Cloud account without its credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloudAccount {
    pub id: i32,
    pub name: String,
    pub vendor: CloudVendor,
}

#[async_trait]
pub trait CloudCaDirectory: Send + Sync {
    async fn account(&self, account_id: i32) -> Result<CloudAccount, CloudCaError>;
    async fn provider(&self, account_id: i32) -> Result<Arc<dyn CloudCaProvider>, CloudCaError>;
}

/// Directory over the configured cloud accounts
pub struct InventoryCloudDirectory {
    accounts: HashMap<i32, CloudAccountEntry>,
    codec: Arc<dyn SecretCodec>,
    endpoint: Option<String>,
}

impl InventoryCloudDirectory {
    pub fn new(accounts: &[CloudAccountEntry], codec: Arc<dyn SecretCodec>) -> Self {
        Self {
            accounts: accounts.iter().map(|a| (a.id, a.clone())).collect(),
            codec,
            endpoint: None,
        }
    }

    /// Sends every vendor call to `endpoint` (used by tests)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    fn entry(&self, account_id: i32) -> Result<&CloudAccountEntry, CloudCaError> {
        self.accounts
            .get(&account_id)
            .ok_or(CloudCaError::AccountNotFound(account_id))
    }
}

#[async_trait]
impl CloudCaDirectory for InventoryCloudDirectory {
    async fn account(&self, account_id: i32) -> Result<CloudAccount, CloudCaError> {
        let entry = self.entry(account_id)?;
        Ok(CloudAccount {
            id: entry.id,
            name: entry.name.clone(),
            vendor: entry.vendor.parse()?,
        })
    }

    async fn provider(&self, account_id: i32) -> Result<Arc<dyn CloudCaProvider>, CloudCaError> {
        let entry = self.entry(account_id)?;
        let secret = self.codec.decode(&entry.access_key_secret).map_err(|e| {
            CloudCaError::InvalidCredentials(format!(
                "cannot decrypt secret of cloud account {}: {}",
                account_id, e
            ))
        })?;

        match entry.vendor.parse::<CloudVendor>()? {
            CloudVendor::Aliyun => {
                let mut provider = AliyunCasProvider::new(AliyunCasCredentials {
                    access_key_id: entry.access_key_id.clone(),
                    access_key_secret: secret,
                    region_id: entry.region.clone(),
                })?;
                if let Some(endpoint) = &self.endpoint {
                    provider = provider.with_endpoint(endpoint.clone());
                }
                Ok(Arc::new(provider))
            }
        }
    }
}

#[derive(Clone)]
pub struct AliyunCasCredentials {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub region_id: Option<String>,
}

/// Alibaba Cloud Certificate Management Service (free DV certificates)
pub struct AliyunCasProvider {
    client: Client,
    credentials: AliyunCasCredentials,
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
struct CreateOrderResponse {
    #[serde(rename = "OrderId", default)]
    order_id: i64,
    #[serde(rename = "Code", default)]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct CertificateStateResponse {
    #[serde(rename = "Type", default)]
    state: String,
    #[serde(rename = "Domain", default)]
    domain: String,
    #[serde(rename = "RecordType", default)]
    record_type: String,
    #[serde(rename = "RecordValue", default)]
    record_value: String,
    #[serde(rename = "Certificate", default)]
    certificate: String,
    #[serde(rename = "PrivateKey", default)]
    private_key: String,
}

#[derive(Debug, Deserialize)]
struct CertificateDetailResponse {
    #[serde(rename = "Cert", default)]
    cert: String,
    #[serde(rename = "Key", default)]
    key: String,
}

#[derive(Debug, Deserialize)]
struct CertificateOrderListResponse {
    #[serde(rename = "CertificateOrderList", default)]
    orders: Vec<CertificateOrder>,
}

#[derive(Debug, Deserialize)]
struct CertificateOrder {
    #[serde(rename = "CertificateId", default)]
    certificate_id: i64,
    #[serde(rename = "Domain", default)]
    domain: String,
    #[serde(rename = "Sans", default)]
    sans: String,
    #[serde(rename = "StartDate", default)]
    start_date: String,
    #[serde(rename = "EndDate", default)]
    end_date: String,
    #[serde(rename = "Issuer", default)]
    issuer: String,
}

impl CertificateStateResponse {
    fn bundle(&self) -> Option<CertificateBundle> {
        if self.certificate.trim().is_empty() {
            return None;
        }
        Some(CertificateBundle {
            certificate_pem: self.certificate.clone(),
            private_key_pem: self.private_key.clone(),
        })
    }

    fn status(&self) -> CloudCertificateStatus {
        if let Some(bundle) = self.bundle() {
            return CloudCertificateStatus::Issued(Some(bundle));
        }
        match self.state.as_str() {
            "certificate" => CloudCertificateStatus::Issued(None),
            "verify_fail" => {
                CloudCertificateStatus::Failed("domain validation failed".to_string())
            }
            "" => CloudCertificateStatus::Pending("waiting for validation".to_string()),
            other => CloudCertificateStatus::Pending(other.to_string()),
        }
    }
}

/// Sans come back as a JSON array inside a string, or comma separated
fn parse_sans(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    serde_json::from_str::<Vec<String>>(raw).unwrap_or_else(|_| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

impl AliyunCasProvider {
    pub fn new(credentials: AliyunCasCredentials) -> Result<Self, CloudCaError> {
        if credentials.access_key_id.is_empty() || credentials.access_key_secret.is_empty() {
            return Err(CloudCaError::InvalidCredentials(
                "access_key_id and access_key_secret are required".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            credentials,
            endpoint: CAS_ENDPOINT.to_string(),
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
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REGION)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        action: &str,
        params: BTreeMap<String, String>,
    ) -> Result<T, CloudCaError> {
        let url = reqwest::Url::parse(&self.endpoint)
            .map_err(|e| CloudCaError::Api(format!("Invalid endpoint: {}", e)))?;
        let host = match (url.host_str(), url.port()) {
            (Some(h), Some(p)) => format!("{}:{}", h, p),
            (Some(h), None) => h.to_string(),
            _ => return Err(CloudCaError::Api("Endpoint has no host".to_string())),
        };

        let request = acs3::RpcRequest {
            method: "POST",
            host: &host,
            action,
            version: CAS_VERSION,
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

        debug!("Aliyun CAS API request: {}", action);

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

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
            return Err(CloudCaError::Api(format!(
                "{} returned status {}: {}",
                action, status, detail
            )));
        }

        serde_json::from_str(&body).map_err(|e| {
            CloudCaError::Api(format!("Failed to parse {} response: {}", action, e))
        })
    }

    async fn certificate_state(&self, order_id: &str) -> Result<CertificateStateResponse, CloudCaError> {
        let mut params = BTreeMap::new();
        params.insert("OrderId".to_string(), order_id.to_string());
        self.call("DescribeCertificateState", params).await
    }
}

#[async_trait]
impl CloudCaProvider for AliyunCasProvider {
    fn vendor(&self) -> CloudVendor {
        CloudVendor::Aliyun
    }

    async fn apply_certificate(
        &self,
        domain: &str,
        san_domains: &[String],
    ) -> Result<ApplyResult, CloudCaError> {
        if san_domains.iter().any(|d| d != domain) {
            warn!(
                "Free Aliyun certificates cover one domain, ignoring SANs for {}",
                domain
            );
        }

        let mut params = BTreeMap::new();
        params.insert("Domain".to_string(), domain.to_string());
        params.insert("ValidateType".to_string(), "DNS".to_string());
        params.insert("ProductCode".to_string(), FREE_PRODUCT_CODE.to_string());

        let created: CreateOrderResponse = self
            .call("CreateCertificateForPackageRequest", params)
            .await?;
        if !created.code.is_empty() && created.code != "200" {
            return Err(CloudCaError::Api(format!(
                "code={}, message={}",
                created.code, created.message
            )));
        }
        if created.order_id == 0 {
            return Err(CloudCaError::Api(
                "certificate request returned no order id".to_string(),
            ));
        }

        let order_id = created.order_id.to_string();
        info!("Aliyun certificate order {} created for {}", order_id, domain);

        let state = self.certificate_state(&order_id).await?;
        let status = match state.status() {
            CloudCertificateStatus::Issued(Some(bundle)) => ApplyStatus::Issued(bundle),
            CloudCertificateStatus::Failed(message) => ApplyStatus::Failed(message),
            CloudCertificateStatus::Issued(None) | CloudCertificateStatus::Pending(_) => {
                let validated = if state.domain.is_empty() {
                    domain
                } else {
                    state.domain.as_str()
                };
                ApplyStatus::PendingValidation(DnsValidationRecord {
                    name: format!("{}.{}", DNS_AUTH_LABEL, validated),
                    record_type: if state.record_type.is_empty() {
                        "TXT".to_string()
                    } else {
                        state.record_type.clone()
                    },
                    value: state.record_value.clone(),
                })
            }
        };

        Ok(ApplyResult {
            order_id,
            cert_id: None,
            status,
        })
    }

    async fn check_certificate_status(
        &self,
        id: &str,
    ) -> Result<CloudCertificateStatus, CloudCaError> {
        Ok(self.certificate_state(id).await?.status())
    }

    async fn download_certificate(&self, id: &str) -> Result<CertificateBundle, CloudCaError> {
        let mut params = BTreeMap::new();
        params.insert("CertId".to_string(), id.to_string());
        let detail: CertificateDetailResponse =
            self.call("GetUserCertificateDetail", params).await?;

        if detail.cert.trim().is_empty() || detail.key.trim().is_empty() {
            return Err(CloudCaError::Api(format!(
                "certificate {} has no downloadable material",
                id
            )));
        }
        Ok(CertificateBundle {
            certificate_pem: detail.cert,
            private_key_pem: detail.key,
        })
    }

    async fn list_certificates(&self) -> Result<Vec<CloudCertificateInfo>, CloudCaError> {
        let mut params = BTreeMap::new();
        params.insert("ShowSize".to_string(), "100".to_string());
        params.insert("CurrentPage".to_string(), "1".to_string());
        let response: CertificateOrderListResponse =
            self.call("ListUserCertificateOrder", params).await?;

        Ok(response
            .orders
            .into_iter()
            .map(|o| CloudCertificateInfo {
                cert_id: o.certificate_id.to_string(),
                domain: o.domain,
                san_domains: parse_sans(&o.sans),
                not_before: parse_date(&o.start_date),
                not_after: parse_date(&o.end_date),
                issuer: o.issuer,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::self_signed;
    use certpilot_core::EncryptionService;
    use serde_json::json;
    use wiremock::matchers::{header, header_exists, method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> AliyunCasProvider {
        AliyunCasProvider::new(AliyunCasCredentials {
            access_key_id: "LTAITEST".to_string(),
            access_key_secret: "secret".to_string(),
            region_id: None,
        })
        .unwrap()
        .with_endpoint(server.uri())
    }

    async fn mount_state(server: &MockServer, order_id: &str, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(header("x-acs-action", "DescribeCertificateState"))
            .and(query_param("OrderId", order_id))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[test]
    fn test_vendor_parsing() {
        assert_eq!("Aliyun".parse::<CloudVendor>().unwrap(), CloudVendor::Aliyun);
        assert!(matches!(
            "tencent".parse::<CloudVendor>(),
            Err(CloudCaError::UnsupportedVendor(_))
        ));
    }

    #[test]
    fn test_parse_sans() {
        assert_eq!(parse_sans(r#"["a.com","b.com"]"#), vec!["a.com", "b.com"]);
        assert_eq!(parse_sans("a.com, b.com"), vec!["a.com", "b.com"]);
        assert!(parse_sans("").is_empty());
    }

    #[test]
    fn test_tracking_id_prefers_cert_id() {
        let mut result = ApplyResult {
            order_id: "77".to_string(),
            cert_id: None,
            status: ApplyStatus::Failed("x".to_string()),
        };
        assert_eq!(result.tracking_id(), "77");
        result.cert_id = Some("12".to_string());
        assert_eq!(result.tracking_id(), "12");
    }

    #[tokio::test]
    async fn test_apply_returns_validation_record() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(header("x-acs-action", "CreateCertificateForPackageRequest"))
            .and(header("x-acs-version", CAS_VERSION))
            .and(header_exists("authorization"))
            .and(query_param("Domain", "example.com"))
            .and(query_param("ProductCode", FREE_PRODUCT_CODE))
            .and(query_param("ValidateType", "DNS"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"RequestId": "r1", "OrderId": 9001})),
            )
            .expect(1)
            .mount(&server)
            .await;
        mount_state(
            &server,
            "9001",
            json!({
                "Type": "domain_verify",
                "Domain": "example.com",
                "RecordType": "TXT",
                "RecordValue": "verify-me"
            }),
        )
        .await;

        let result = provider(&server)
            .apply_certificate("example.com", &[])
            .await
            .unwrap();
        assert_eq!(result.tracking_id(), "9001");
        assert_eq!(
            result.status,
            ApplyStatus::PendingValidation(DnsValidationRecord {
                name: "_dnsauth.example.com".to_string(),
                record_type: "TXT".to_string(),
                value: "verify-me".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_apply_surfaces_vendor_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-acs-action", "CreateCertificateForPackageRequest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Code": "QuotaExceeded",
                "Message": "free certificate quota used up"
            })))
            .mount(&server)
            .await;

        let err = provider(&server)
            .apply_certificate("example.com", &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("QuotaExceeded"));

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "Code": "Forbidden.RAM",
                "Message": "not authorized"
            })))
            .mount(&server)
            .await;
        let err = provider(&server)
            .apply_certificate("example.com", &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Forbidden.RAM: not authorized"));
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        let (cert, key) = self_signed(&["example.com"], 90);
        mount_state(&server, "1", json!({"Type": "process"})).await;
        mount_state(&server, "2", json!({"Type": "verify_fail"})).await;
        mount_state(
            &server,
            "3",
            json!({"Type": "certificate", "Certificate": cert, "PrivateKey": key}),
        )
        .await;
        mount_state(&server, "4", json!({"Type": "certificate"})).await;

        let p = provider(&server);
        assert_eq!(
            p.check_certificate_status("1").await.unwrap(),
            CloudCertificateStatus::Pending("process".to_string())
        );
        assert!(matches!(
            p.check_certificate_status("2").await.unwrap(),
            CloudCertificateStatus::Failed(_)
        ));
        match p.check_certificate_status("3").await.unwrap() {
            CloudCertificateStatus::Issued(Some(bundle)) => {
                assert_eq!(bundle.certificate_pem, cert);
                assert_eq!(bundle.private_key_pem, key);
            }
            other => panic!("unexpected status {:?}", other),
        }
        assert_eq!(
            p.check_certificate_status("4").await.unwrap(),
            CloudCertificateStatus::Issued(None)
        );
    }

    #[tokio::test]
    async fn test_download_and_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-acs-action", "GetUserCertificateDetail"))
            .and(query_param("CertId", "42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Cert": "CERT-PEM",
                "Key": "KEY-PEM",
                "Common": "example.com"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("x-acs-action", "ListUserCertificateOrder"))
            .and(query_param("ShowSize", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "CertificateOrderList": [{
                    "CertificateId": 42,
                    "Domain": "example.com",
                    "Sans": "[\"example.com\",\"www.example.com\"]",
                    "StartDate": "2026-01-01",
                    "EndDate": "2026-04-01",
                    "Issuer": "DigiCert"
                }]
            })))
            .mount(&server)
            .await;

        let p = provider(&server);
        let bundle = p.download_certificate("42").await.unwrap();
        assert_eq!(bundle.certificate_pem, "CERT-PEM");

        let listed = p.list_certificates().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].cert_id, "42");
        assert_eq!(listed[0].san_domains, vec!["example.com", "www.example.com"]);
        assert_eq!(listed[0].not_after, NaiveDate::from_ymd_opt(2026, 4, 1));
    }

    #[tokio::test]
    async fn test_directory_resolves_accounts() {
        let codec = Arc::new(EncryptionService::new(&EncryptionService::generate_key()).unwrap());
        let accounts = vec![
            CloudAccountEntry {
                id: 1,
                name: "prod".to_string(),
                vendor: "aliyun".to_string(),
                access_key_id: "LTAI".to_string(),
                access_key_secret: codec.encode("secret").unwrap(),
                region: None,
            },
            CloudAccountEntry {
                id: 2,
                name: "other".to_string(),
                vendor: "tencent".to_string(),
                access_key_id: "AK".to_string(),
                access_key_secret: codec.encode("secret").unwrap(),
                region: None,
            },
            CloudAccountEntry {
                id: 3,
                name: "broken".to_string(),
                vendor: "aliyun".to_string(),
                access_key_id: "LTAI".to_string(),
                access_key_secret: "not-encrypted".to_string(),
                region: None,
            },
        ];
        let directory = InventoryCloudDirectory::new(&accounts, codec);

        assert_eq!(directory.account(1).await.unwrap().vendor, CloudVendor::Aliyun);
        assert_eq!(
            directory.provider(1).await.unwrap().vendor(),
            CloudVendor::Aliyun
        );
        assert!(matches!(
            directory.provider(2).await,
            Err(CloudCaError::UnsupportedVendor(_))
        ));
        assert!(matches!(
            directory.provider(3).await,
            Err(CloudCaError::InvalidCredentials(_))
        ));
        assert!(matches!(
            directory.account(9).await,
            Err(CloudCaError::AccountNotFound(9))
        ));
    }
}
