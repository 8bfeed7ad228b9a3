//! AWS Route 53 DNS provider
//!
//! Required IAM permissions:
//! - route53:ListHostedZones
//! - route53:ListResourceRecordSets
//! - route53:ChangeResourceRecordSets

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::credentials::Route53Credentials;
use super::traits::{
    fqdn, normalize_domain, quote_txt, root_domain, DnsChallengeProvider, DnsProviderType,
    TXT_RECORD_TTL,
};
use crate::errors::DnsError;

const AWS_ROUTE53_ENDPOINT: &str = "https://route53.amazonaws.com";
const ROUTE53_XMLNS: &str = "https://route53.amazonaws.com/doc/2013-04-01/";

pub struct Route53Provider {
    client: Client,
    credentials: Route53Credentials,
    region: String,
    endpoint: String,
}

/// AWS Signature V4
mod aws_signing {
    use crate::signing::{hmac_sha256, sha256_hex, SigningError};
    use chrono::{DateTime, Utc};

    pub struct SignedRequest {
        pub authorization: String,
        pub amz_date: String,
    }

    #[allow(clippy::too_many_arguments)]
    pub fn sign_request(
        method: &str,
        uri: &str,
        query_string: &str,
        headers: &[(&str, &str)],
        payload: &str,
        access_key: &str,
        secret_key: &str,
        region: &str,
        service: &str,
        now: DateTime<Utc>,
    ) -> Result<SignedRequest, SigningError> {
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let payload_hash = sha256_hex(payload.as_bytes());

        let mut all_headers: Vec<(String, String)> = headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.trim().to_string()))
            .collect();
        all_headers.push(("x-amz-date".to_string(), amz_date.clone()));
        all_headers.sort();

        let signed_headers = all_headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = all_headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, uri, query_string, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/{}/aws4_request", date_stamp, region, service);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            sha256_hex(canonical_request.as_bytes())
        );

        let k_date = hmac_sha256(
            format!("AWS4{}", secret_key).as_bytes(),
            date_stamp.as_bytes(),
        )?;
        let k_region = hmac_sha256(&k_date, region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, service.as_bytes())?;
        let k_signing = hmac_sha256(&k_service, b"aws4_request")?;
        let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes())?);

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            access_key, credential_scope, signed_headers, signature
        );

        Ok(SignedRequest {
            authorization,
            amz_date,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ListHostedZonesResponse {
    #[serde(rename = "HostedZones")]
    hosted_zones: Option<HostedZonesWrapper>,
}

#[derive(Debug, Deserialize)]
struct HostedZonesWrapper {
    #[serde(rename = "HostedZone", default)]
    hosted_zone: Vec<HostedZone>,
}

#[derive(Debug, Deserialize)]
struct HostedZone {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ListResourceRecordSetsResponse {
    #[serde(rename = "ResourceRecordSets")]
    resource_record_sets: Option<ResourceRecordSetsWrapper>,
}

#[derive(Debug, Deserialize)]
struct ResourceRecordSetsWrapper {
    #[serde(rename = "ResourceRecordSet", default)]
    resource_record_set: Vec<ResourceRecordSet>,
}

#[derive(Debug, Deserialize, Clone)]
struct ResourceRecordSet {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Type")]
    record_type: String,
    #[serde(rename = "TTL")]
    ttl: Option<u32>,
    #[serde(rename = "ResourceRecords")]
    resource_records: Option<ResourceRecordsWrapper>,
}

#[derive(Debug, Deserialize, Clone)]
struct ResourceRecordsWrapper {
    #[serde(rename = "ResourceRecord", default)]
    resource_record: Vec<ResourceRecord>,
}

#[derive(Debug, Deserialize, Clone)]
struct ResourceRecord {
    #[serde(rename = "Value")]
    value: String,
}

impl ResourceRecordSet {
    fn values(&self) -> Vec<String> {
        self.resource_records
            .as_ref()
            .map(|w| w.resource_record.iter().map(|r| r.value.clone()).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
struct ChangeResourceRecordSetsRequest {
    #[serde(rename = "ChangeBatch")]
    change_batch: ChangeBatch,
}

#[derive(Debug, Serialize)]
struct ChangeBatch {
    #[serde(rename = "Comment")]
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
    #[serde(rename = "Changes")]
    changes: Changes,
}

#[derive(Debug, Serialize)]
struct Changes {
    #[serde(rename = "Change")]
    change: Vec<Change>,
}

#[derive(Debug, Serialize)]
struct Change {
    #[serde(rename = "Action")]
    action: String,
    #[serde(rename = "ResourceRecordSet")]
    resource_record_set: ChangeResourceRecordSet,
}

#[derive(Debug, Serialize)]
struct ChangeResourceRecordSet {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Type")]
    record_type: String,
    #[serde(rename = "TTL")]
    ttl: u32,
    #[serde(rename = "ResourceRecords")]
    resource_records: ChangeResourceRecords,
}

#[derive(Debug, Serialize)]
struct ChangeResourceRecords {
    #[serde(rename = "ResourceRecord")]
    resource_record: Vec<ChangeResourceRecord>,
}

#[derive(Debug, Serialize)]
struct ChangeResourceRecord {
    #[serde(rename = "Value")]
    value: String,
}

impl Route53Provider {
    pub fn new(credentials: Route53Credentials) -> Result<Self, DnsError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| DnsError::ApiError(format!("route53 client: {}", e)))?;

        let region = credentials
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        Ok(Self {
            client,
            credentials,
            region,
            endpoint: AWS_ROUTE53_ENDPOINT.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    async fn api_request(
        &self,
        method: Method,
        path: &str,
        query_string: &str,
        body: Option<&str>,
    ) -> Result<String, DnsError> {
        let url = reqwest::Url::parse(&self.endpoint)
            .map_err(|e| DnsError::ApiError(format!("route53 endpoint {}: {}", self.endpoint, e)))?;
        let host = match (url.host_str(), url.port()) {
            (Some(h), Some(p)) => format!("{}:{}", h, p),
            (Some(h), None) => h.to_string(),
            _ => {
                return Err(DnsError::ApiError(format!(
                    "route53 endpoint {} has no host",
                    self.endpoint
                )))
            }
        };
        let payload = body.unwrap_or("");

        let signed = aws_signing::sign_request(
            method.as_str(),
            path,
            query_string,
            &[("host", host.as_str())],
            payload,
            &self.credentials.access_key_id,
            &self.credentials.secret_access_key,
            &self.region,
            "route53",
            chrono::Utc::now(),
        )?;

        let full_url = if query_string.is_empty() {
            format!("{}{}", self.endpoint, path)
        } else {
            format!("{}{}?{}", self.endpoint, path, query_string)
        };

        debug!("route53 {} {}", method, path);
        let mut request = self
            .client
            .request(method, &full_url)
            .header("Host", host)
            .header("X-Amz-Date", signed.amz_date)
            .header("Authorization", signed.authorization)
            .header("Content-Type", "application/xml");

        if let Some(body) = body {
            request = request.body(body.to_string());
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(DnsError::ApiError(format!("route53 returned {}: {}", status, text)));
        }
        Ok(text)
    }

    async fn list_hosted_zones(&self) -> Result<Vec<HostedZone>, DnsError> {
        let response = self
            .api_request(Method::GET, "/2013-04-01/hostedzone", "", None)
            .await?;
        let parsed: ListHostedZonesResponse = parse_xml(&response)?;
        Ok(parsed
            .hosted_zones
            .map(|w| w.hosted_zone)
            .unwrap_or_default())
    }

    /// Hosted zone id (without the `/hostedzone/` prefix) for `root`
    async fn zone_id(&self, root: &str) -> Result<String, DnsError> {
        self.list_hosted_zones()
            .await?
            .into_iter()
            .find(|zone| normalize_domain(&zone.name) == root)
            .map(|zone| zone.id.trim_start_matches("/hostedzone/").to_string())
            .ok_or_else(|| DnsError::ZoneNotFound(root.to_string()))
    }

    async fn txt_record_set(
        &self,
        zone_id: &str,
        name: &str,
    ) -> Result<Option<ResourceRecordSet>, DnsError> {
        let path = format!("/2013-04-01/hostedzone/{}/rrset", zone_id);
        let fq = format!("{}.", name);
        let query = crate::signing::canonical_query([
            ("maxitems", "1"),
            ("name", fq.as_str()),
            ("type", "TXT"),
        ]);
        let response = self.api_request(Method::GET, &path, &query, None).await?;
        let parsed: ListResourceRecordSetsResponse = parse_xml(&response)?;

        // The listing starts at `name` but may return the next set instead
        Ok(parsed
            .resource_record_sets
            .map(|w| w.resource_record_set)
            .unwrap_or_default()
            .into_iter()
            .find(|rs| normalize_domain(&rs.name) == name && rs.record_type == "TXT"))
    }

    async fn change(
        &self,
        zone_id: &str,
        action: &str,
        name: &str,
        ttl: u32,
        values: Vec<String>,
    ) -> Result<(), DnsError> {
        let batch = ChangeResourceRecordSetsRequest {
            change_batch: ChangeBatch {
                comment: Some("certpilot DNS-01 challenge".to_string()),
                changes: Changes {
                    change: vec![Change {
                        action: action.to_string(),
                        resource_record_set: ChangeResourceRecordSet {
                            name: format!("{}.", name),
                            record_type: "TXT".to_string(),
                            ttl,
                            resource_records: ChangeResourceRecords {
                                resource_record: values
                                    .into_iter()
                                    .map(|value| ChangeResourceRecord { value })
                                    .collect(),
                            },
                        },
                    }],
                },
            },
        };

        let body = render_change_request(&batch)?;
        let path = format!("/2013-04-01/hostedzone/{}/rrset", zone_id);
        self.api_request(Method::POST, &path, "", Some(&body)).await?;
        Ok(())
    }
}

fn parse_xml<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, DnsError> {
    quick_xml::de::from_str(body)
        .map_err(|e| DnsError::ApiError(format!("malformed route53 response: {}", e)))
}

fn render_change_request(batch: &ChangeResourceRecordSetsRequest) -> Result<String, DnsError> {
    let body = quick_xml::se::to_string(batch)
        .map_err(|e| DnsError::ApiError(format!("cannot encode change batch: {}", e)))?;
    Ok(body.replace(
        "<ChangeResourceRecordSetsRequest>",
        &format!("<ChangeResourceRecordSetsRequest xmlns=\"{}\">", ROUTE53_XMLNS),
    ))
}

#[async_trait]
impl DnsChallengeProvider for Route53Provider {
    fn provider_type(&self) -> DnsProviderType {
        DnsProviderType::Route53
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
        let quoted = quote_txt(value);

        let mut values = self
            .txt_record_set(&zone_id, &name)
            .await?
            .map(|rs| rs.values())
            .unwrap_or_default();
        if values.contains(&quoted) {
            debug!("TXT record {} already present", name);
            return Ok(());
        }
        values.push(quoted);

        self.change(&zone_id, "UPSERT", &name, TXT_RECORD_TTL, values)
            .await?;
        info!("Upserted TXT record {} in zone {}", name, zone_id);
        Ok(())
    }

    async fn delete_txt_record(&self, domain: &str, record_name: &str) -> Result<(), DnsError> {
        let root = root_domain(domain);
        let zone_id = self.zone_id(&root).await?;
        let name = fqdn(record_name, &root);

        // DELETE must repeat the exact TTL and values of the set
        let Some(existing) = self.txt_record_set(&zone_id, &name).await? else {
            debug!("No TXT record {} to delete", name);
            return Ok(());
        };
        let ttl = existing.ttl.unwrap_or(TXT_RECORD_TTL);
        self.change(&zone_id, "DELETE", &name, ttl, existing.values())
            .await?;
        info!("Deleted TXT record {} from zone {}", name, zone_id);
        Ok(())
    }

    async fn test_connection(&self) -> Result<(), DnsError> {
        match self.list_hosted_zones().await {
            Ok(zones) => {
                debug!("route53 credentials see {} hosted zone(s)", zones.len());
                Ok(())
            }
            Err(e) => {
                warn!("route53 connection test failed: {}", e);
                Err(DnsError::ConnectionFailed(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ZONES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListHostedZonesResponse xmlns="https://route53.amazonaws.com/doc/2013-04-01/">
    <HostedZones>
        <HostedZone>
            <Id>/hostedzone/Z2OTHERZONE77</Id>
            <Name>notexample.com.</Name>
            <CallerReference>ref-2</CallerReference>
        </HostedZone>
        <HostedZone>
            <Id>/hostedzone/Z3EXAMPLEZONE1</Id>
            <Name>example.com.</Name>
            <CallerReference>ref-1</CallerReference>
        </HostedZone>
    </HostedZones>
    <IsTruncated>false</IsTruncated>
    <MaxItems>100</MaxItems>
</ListHostedZonesResponse>"#;

    fn provider(server: &MockServer) -> Route53Provider {
        Route53Provider::new(Route53Credentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMIexample".to_string(),
            region: None,
        })
        .unwrap()
        .with_endpoint(server.uri())
    }

    fn rrset_xml(name: &str, values: &[&str]) -> String {
        let records: String = values
            .iter()
            .map(|v| format!("<ResourceRecord><Value>{}</Value></ResourceRecord>", v))
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ListResourceRecordSetsResponse xmlns="https://route53.amazonaws.com/doc/2013-04-01/">
    <ResourceRecordSets>
        <ResourceRecordSet>
            <Name>{}</Name>
            <Type>TXT</Type>
            <TTL>600</TTL>
            <ResourceRecords>{}</ResourceRecords>
        </ResourceRecordSet>
    </ResourceRecordSets>
    <IsTruncated>false</IsTruncated>
    <MaxItems>1</MaxItems>
</ListResourceRecordSetsResponse>"#,
            name, records
        )
    }

    #[test]
    fn test_sign_request_format() {
        let now = chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let signed = aws_signing::sign_request(
            "GET",
            "/2013-04-01/hostedzone",
            "",
            &[("host", "route53.amazonaws.com")],
            "",
            "AKIDEXAMPLE",
            "secret",
            "us-east-1",
            "route53",
            now,
        )
        .unwrap();
        assert_eq!(signed.amz_date, "20260301T120000Z");
        assert!(signed.authorization.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20260301/us-east-1/route53/aws4_request, SignedHeaders=host;x-amz-date, Signature="
        ));
    }

    #[test]
    fn test_change_request_has_namespace() {
        let request = ChangeResourceRecordSetsRequest {
            change_batch: ChangeBatch {
                comment: None,
                changes: Changes {
                    change: vec![Change {
                        action: "UPSERT".to_string(),
                        resource_record_set: ChangeResourceRecordSet {
                            name: "_acme-challenge.example.com.".to_string(),
                            record_type: "TXT".to_string(),
                            ttl: 600,
                            resource_records: ChangeResourceRecords {
                                resource_record: vec![ChangeResourceRecord {
                                    value: "\"abc\"".to_string(),
                                }],
                            },
                        },
                    }],
                },
            },
        };
        let xml = render_change_request(&request).unwrap();
        assert!(xml.starts_with(
            "<ChangeResourceRecordSetsRequest xmlns=\"https://route53.amazonaws.com/doc/2013-04-01/\">"
        ));
        assert!(xml.contains("<Action>UPSERT</Action>"));
        assert!(xml.contains("<TTL>600</TTL>"));
    }

    #[tokio::test]
    async fn test_create_merges_existing_values() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/2013-04-01/hostedzone"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ZONES_XML))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/2013-04-01/hostedzone/Z3EXAMPLEZONE1/rrset"))
            .and(query_param("name", "_acme-challenge.example.com."))
            .and(query_param("type", "TXT"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rrset_xml(
                "_acme-challenge.example.com.",
                &["&quot;apex&quot;"],
            )))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/2013-04-01/hostedzone/Z3EXAMPLEZONE1/rrset"))
            .and(body_string_contains("<Action>UPSERT</Action>"))
            .and(body_string_contains("apex"))
            .and(body_string_contains("wildcard"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<ChangeResourceRecordSetsResponse/>"))
            .expect(1)
            .mount(&server)
            .await;

        provider(&server)
            .create_txt_record("*.example.com", "_acme-challenge.example.com", "wildcard")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_repeats_existing_values() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/2013-04-01/hostedzone"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ZONES_XML))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/2013-04-01/hostedzone/Z3EXAMPLEZONE1/rrset"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rrset_xml(
                "_acme-challenge.example.com.",
                &["&quot;one&quot;", "&quot;two&quot;"],
            )))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/2013-04-01/hostedzone/Z3EXAMPLEZONE1/rrset"))
            .and(body_string_contains("<Action>DELETE</Action>"))
            .and(body_string_contains("one"))
            .and(body_string_contains("two"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<ChangeResourceRecordSetsResponse/>"))
            .expect(1)
            .mount(&server)
            .await;

        provider(&server)
            .delete_txt_record("example.com", "_acme-challenge.example.com")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_without_record_is_noop() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/2013-04-01/hostedzone"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ZONES_XML))
            .mount(&server)
            .await;

        // Listing returns the next set in order, not the one asked for
        Mock::given(method("GET"))
            .and(path("/2013-04-01/hostedzone/Z3EXAMPLEZONE1/rrset"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(rrset_xml("www.example.com.", &["&quot;x&quot;"])),
            )
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        provider(&server)
            .delete_txt_record("example.com", "_acme-challenge.example.com")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_connection_failure_maps_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("<ErrorResponse/>"))
            .mount(&server)
            .await;

        let err = provider(&server).test_connection().await.unwrap_err();
        assert!(matches!(err, DnsError::ConnectionFailed(msg) if msg.contains("403")));
    }
}
