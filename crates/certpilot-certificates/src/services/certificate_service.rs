use certpilot_core::now;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::cloud::CloudVendor;
use crate::engine::{CertificateEngine, CloudSyncOutcome, Dispatched};
use crate::errors::{CertificateError, CloudCaError};
use crate::ledger;
use crate::models::*;
use crate::x509::issued_certificate;

const DEFAULT_RENEW_DAYS_BEFORE: i32 = 30;
const MANUAL_CA: &str = "manual";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCertificateRequest {
    /// Defaults to the domain
    #[serde(default)]
    pub name: String,
    pub domain: String,
    #[serde(default)]
    pub san_domains: Vec<String>,
    pub source_type: SourceType,
    /// ACME CA name, or the cloud vendor for cloud certificates
    pub ca_provider: Option<String>,
    pub key_algorithm: Option<KeyAlgorithm>,
    pub dns_provider_id: Option<i32>,
    pub acme_email: Option<String>,
    pub cloud_account_id: Option<i32>,
    pub auto_renew: Option<bool>,
    pub renew_days_before: Option<i32>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ImportCertificateRequest {
    pub name: Option<String>,
    pub certificate_pem: String,
    pub private_key_pem: String,
    /// Intermediates, when not already bundled after the leaf
    pub chain_pem: Option<String>,
    pub renew_days_before: Option<i32>,
}

impl std::fmt::Debug for ImportCertificateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportCertificateRequest")
            .field("name", &self.name)
            .field("private_key_pem", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// Decrypted certificate bundle
#[derive(Clone, Serialize)]
pub struct CertificateContent {
    pub certificate_pem: String,
    pub private_key_pem: String,
    pub chain_pem: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CertificateStats {
    pub total: u64,
    pub by_status: HashMap<String, u64>,
}

/// A created certificate and the issue worker started for it
pub struct CreatedCertificate {
    pub certificate: Certificate,
    pub issue: Dispatched,
}

pub struct CertificateService {
    engine: Arc<CertificateEngine>,
}

impl CertificateService {
    pub fn new(engine: Arc<CertificateEngine>) -> Self {
        Self { engine }
    }

    /// Stores a pending certificate and starts issuing it in the background.
    pub async fn create_certificate(
        &self,
        request: CreateCertificateRequest,
    ) -> Result<CreatedCertificate, CertificateError> {
        let domain = normalize_domain(&request.domain);
        if domain.is_empty() {
            return Err(CertificateError::Validation("domain is required".to_string()));
        }
        let san_domains = normalize_sans(&domain, &request.san_domains);
        let renew_days_before = validate_renew_days(request.renew_days_before)?;
        let name = match request.name.trim() {
            "" => domain.clone(),
            name => name.to_string(),
        };

        let new = match request.source_type {
            SourceType::Acme => {
                let provider_id = request.dns_provider_id.ok_or_else(|| {
                    CertificateError::Validation(
                        "dns provider is required for ACME certificates".to_string(),
                    )
                })?;
                // Fails for missing or disabled providers
                self.engine.dns().challenge_provider(provider_id).await?;
                let email = self.resolve_email(request.acme_email.as_deref())?;
                let ca = CaProvider::resolve(request.ca_provider.as_deref().unwrap_or_default());

                NewCertificate {
                    name,
                    domain,
                    san_domains,
                    source_type: SourceType::Acme,
                    ca_provider: ca.to_string(),
                    key_algorithm: request.key_algorithm.unwrap_or(KeyAlgorithm::Rsa2048),
                    dns_provider_id: Some(provider_id),
                    acme_email: Some(email),
                    cloud_account_id: None,
                    status: CertificateStatus::Pending,
                    auto_renew: request.auto_renew.unwrap_or(true),
                    renew_days_before,
                }
            }
            SourceType::Cloud => {
                let account_id = request.cloud_account_id.ok_or_else(|| {
                    CertificateError::Validation(
                        "cloud account is required for cloud certificates".to_string(),
                    )
                })?;
                let account = self.engine.cloud().account(account_id).await?;
                if let Some(requested) = request.ca_provider.as_deref().filter(|v| !v.is_empty()) {
                    let vendor: CloudVendor = requested.parse()?;
                    if vendor != account.vendor {
                        return Err(CertificateError::Validation(format!(
                            "cloud account {} belongs to {}, not {}",
                            account.id, account.vendor, vendor
                        )));
                    }
                }

                NewCertificate {
                    name,
                    domain,
                    san_domains,
                    source_type: SourceType::Cloud,
                    ca_provider: account.vendor.to_string(),
                    key_algorithm: request.key_algorithm.unwrap_or(KeyAlgorithm::Ec256),
                    dns_provider_id: request.dns_provider_id,
                    acme_email: None,
                    cloud_account_id: Some(account.id),
                    status: CertificateStatus::Pending,
                    auto_renew: request.auto_renew.unwrap_or(true),
                    renew_days_before,
                }
            }
            SourceType::Manual => {
                return Err(CertificateError::Validation(
                    "manual certificates are imported, not created".to_string(),
                ))
            }
        };

        let certificate = self.engine.certificates().create(new).await?;
        info!(
            "Created {} certificate {} for {}",
            certificate.source_type, certificate.id, certificate.domain
        );

        let issue = match certificate.source_type {
            SourceType::Cloud => {
                self.engine
                    .dispatch_cloud_issue(&certificate, TriggerType::Manual)
                    .await?
            }
            _ => {
                self.engine
                    .dispatch_acme(&certificate, TaskType::Issue, TriggerType::Manual)
                    .await?
            }
        };
        Ok(CreatedCertificate { certificate, issue })
    }

    fn resolve_email(&self, requested: Option<&str>) -> Result<String, CertificateError> {
        requested
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .or(self.engine.settings().acme_email.as_deref())
            .map(str::to_string)
            .ok_or_else(|| {
                CertificateError::Validation(
                    "ACME email is required: set one on the certificate or in the configuration"
                        .to_string(),
                )
            })
    }

    /// Stores externally issued material. The status follows from expiry.
    pub async fn import_certificate(
        &self,
        request: ImportCertificateRequest,
    ) -> Result<Certificate, CertificateError> {
        if !request.private_key_pem.contains("PRIVATE KEY") {
            return Err(CertificateError::Validation(
                "private key must be PEM encoded".to_string(),
            ));
        }
        let renew_days_before = validate_renew_days(request.renew_days_before)?;

        let mut bundle = request.certificate_pem.trim().to_string();
        if let Some(chain) = request.chain_pem.as_deref().map(str::trim) {
            if !chain.is_empty() && !bundle.contains(chain) {
                bundle.push('\n');
                bundle.push_str(chain);
            }
        }
        bundle.push('\n');
        let issued = issued_certificate(bundle, request.private_key_pem)?;

        let domain = issued.details.dns_names.first().cloned().ok_or_else(|| {
            CertificateError::Validation("certificate has no DNS names".to_string())
        })?;
        let san_domains = normalize_sans(&domain, &issued.details.dns_names);
        let status = ledger::status_from_expiry(issued.details.not_after, renew_days_before, now());

        let certificate = self
            .engine
            .certificates()
            .create(NewCertificate {
                name: request
                    .name
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| domain.clone()),
                domain,
                san_domains,
                source_type: SourceType::Manual,
                ca_provider: MANUAL_CA.to_string(),
                key_algorithm: KeyAlgorithm::default(),
                dns_provider_id: None,
                acme_email: None,
                cloud_account_id: None,
                status,
                auto_renew: false,
                renew_days_before,
            })
            .await?;

        let certificates = self.engine.certificates();
        certificates.update_material(certificate.id, &issued).await?;
        if status != CertificateStatus::Active {
            certificates.update_status(certificate.id, status, None).await?;
        }
        info!(
            "Imported certificate {} for {} ({})",
            certificate.id, certificate.domain, status
        );
        self.engine.load_certificate(certificate.id).await
    }

    pub async fn get_certificate(&self, id: i32) -> Result<Certificate, CertificateError> {
        self.engine.load_certificate(id).await
    }

    pub async fn list_certificates(
        &self,
        filter: &CertificateFilter,
    ) -> Result<Page<Certificate>, CertificateError> {
        Ok(self.engine.certificates().list(filter).await?)
    }

    pub async fn update_certificate(
        &self,
        id: i32,
        update: CertificateUpdate,
    ) -> Result<Certificate, CertificateError> {
        if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(CertificateError::Validation("name cannot be empty".to_string()));
        }
        if let Some(days) = update.renew_days_before {
            validate_renew_days(Some(days))?;
        }
        if let Some(provider_id) = update.dns_provider_id {
            self.engine.dns().challenge_provider(provider_id).await?;
        }
        Ok(self.engine.certificates().update(id, update).await?)
    }

    /// Refused while the certificate has a pending or running task.
    pub async fn delete_certificate(&self, id: i32) -> Result<(), CertificateError> {
        let certificate = self.engine.load_certificate(id).await?;
        if self.engine.tasks().has_in_flight(id).await? {
            return Err(CertificateError::ConcurrencyConflict(format!(
                "certificate {} has a task in progress",
                id
            )));
        }

        let deploy_configs = self.engine.deploy_configs();
        for config in deploy_configs.list_by_certificate(id).await? {
            deploy_configs.delete(config.id).await?;
        }
        self.engine.certificates().delete(id).await?;
        info!("Deleted certificate {} ({})", id, certificate.domain);
        Ok(())
    }

    /// Starts a manual renewal through the same claim as the scheduler.
    pub async fn renew_certificate(&self, id: i32) -> Result<Dispatched, CertificateError> {
        let certificate = self.engine.load_certificate(id).await?;
        self.engine
            .dispatch_acme(&certificate, TaskType::Renew, TriggerType::Manual)
            .await
    }

    /// Checks a pending cloud certificate with its vendor right away.
    pub async fn sync_cloud_certificate(&self, id: i32) -> Result<Certificate, CertificateError> {
        let certificate = self.engine.load_certificate(id).await?;
        if certificate.source_type != SourceType::Cloud {
            return Err(CertificateError::Validation(
                "only cloud certificates can be synced".to_string(),
            ));
        }
        if certificate.status != CertificateStatus::Pending {
            return Err(CertificateError::Validation(
                "certificate is not in pending status".to_string(),
            ));
        }

        match self.engine.sync_cloud_certificate(&certificate).await? {
            CloudSyncOutcome::Issued => self.engine.load_certificate(id).await,
            CloudSyncOutcome::Pending(message) => Err(CertificateError::Validation(format!(
                "certificate is still pending: {}",
                message
            ))),
            CloudSyncOutcome::Failed(message) => Err(CloudCaError::Api(format!(
                "certificate issuance failed: {}",
                message
            ))
            .into()),
        }
    }

    pub async fn get_certificate_content(
        &self,
        id: i32,
    ) -> Result<CertificateContent, CertificateError> {
        let certificate = self.engine.load_certificate(id).await?;
        let material = certificate.material().ok_or_else(|| {
            CertificateError::Validation("certificate has not been issued yet".to_string())
        })?;
        Ok(CertificateContent {
            certificate_pem: material.certificate_pem,
            private_key_pem: material.private_key_pem,
            chain_pem: material.chain_pem,
        })
    }

    pub async fn certificate_stats(&self) -> Result<CertificateStats, CertificateError> {
        let by_status = self.engine.certificates().count_by_status().await?;
        Ok(CertificateStats {
            total: by_status.values().sum(),
            by_status,
        })
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_lowercase()
}

/// Lowercased SANs without blanks, duplicates or the primary domain
fn normalize_sans(domain: &str, sans: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for san in sans.iter().map(|s| normalize_domain(s)) {
        if !san.is_empty() && san != domain && !out.contains(&san) {
            out.push(san);
        }
    }
    out
}

fn validate_renew_days(days: Option<i32>) -> Result<i32, CertificateError> {
    let days = days.unwrap_or(DEFAULT_RENEW_DAYS_BEFORE);
    if !(1..=365).contains(&days) {
        return Err(CertificateError::Validation(format!(
            "renew_days_before must be between 1 and 365, got {}",
            days
        )));
    }
    Ok(days)
}
