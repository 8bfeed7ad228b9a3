//! ACME issuance over DNS-01
//!
//! [`InstantAcmeClient`] drives one order end to end: fresh certificate key,
//! account registration, TXT records through the supplied
//! [`DnsChallengeProvider`], polling, finalization and cleanup.
//! [`AcmeOrchestrator`] runs a client call on its own task and races the
//! result against a deadline.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use certpilot_core::{AcmeConfig, ExternalAccountCredentials};
use certpilot_dns::{challenge_record_name, DnsChallengeProvider};
use instant_acme::{
    Account, AuthorizationStatus, ChallengeType, ExternalAccountKey, Identifier, NewAccount,
    NewOrder, Order, OrderStatus,
};
use rcgen::{CertificateParams, DistinguishedName, KeyPair};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::AcmeError;
use crate::models::{CaProvider, IssuedCertificate, KeyAlgorithm};
use crate::x509::issued_certificate;

const MAX_READY_ATTEMPTS: u32 = 6;
const MAX_CERTIFICATE_ATTEMPTS: u32 = 30;
const BASE_DELAY_SECS: u64 = 1;
const MAX_DELAY_SECS: u64 = 30;

/// Everything one issuance needs besides the DNS responder
#[derive(Debug, Clone)]
pub struct AcmeRequest {
    /// Primary domain first
    pub domains: Vec<String>,
    pub ca: CaProvider,
    pub staging: bool,
    pub key_algorithm: KeyAlgorithm,
    pub email: String,
}

#[async_trait]
pub trait AcmeClient: Send + Sync {
    async fn obtain(
        &self,
        request: &AcmeRequest,
        dns: Arc<dyn DnsChallengeProvider>,
    ) -> Result<IssuedCertificate, AcmeError>;
}

/// Generates the certificate key for `algorithm`.
pub fn generate_key(algorithm: KeyAlgorithm) -> Result<KeyPair, AcmeError> {
    let bits = match algorithm {
        KeyAlgorithm::Ec256 => return Ok(KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?),
        KeyAlgorithm::Ec384 => return Ok(KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384)?),
        KeyAlgorithm::Rsa2048 => 2048,
        KeyAlgorithm::Rsa3072 => 3072,
        KeyAlgorithm::Rsa4096 => 4096,
    };

    use rsa::pkcs8::{EncodePrivateKey, LineEnding};
    let key = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, bits)
        .map_err(|e| AcmeError::KeyGeneration(format!("RSA-{}: {}", bits, e)))?;
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| AcmeError::KeyGeneration(format!("RSA-{}: {}", bits, e)))?;
    Ok(KeyPair::from_pem_and_sign_algo(
        pem.as_str(),
        &rcgen::PKCS_RSA_SHA256,
    )?)
}

/// Decodes a CA-issued HMAC key; CAs hand them out base64url encoded.
fn decode_hmac_key(encoded: &str) -> Result<Vec<u8>, AcmeError> {
    URL_SAFE_NO_PAD
        .decode(encoded.trim().trim_end_matches('='))
        .map_err(|e| AcmeError::Registration(format!("invalid EAB HMAC key: {}", e)))
}

/// Client backed by `instant-acme`
pub struct InstantAcmeClient {
    propagation_delay: Duration,
    external_account_bindings: HashMap<String, ExternalAccountCredentials>,
}

impl InstantAcmeClient {
    pub fn new(config: &AcmeConfig) -> Self {
        Self {
            propagation_delay: config.propagation_delay(),
            external_account_bindings: config.external_account_bindings.clone(),
        }
    }

    async fn register(&self, request: &AcmeRequest) -> Result<Account, AcmeError> {
        let eab = match self.external_account_bindings.get(request.ca.as_str()) {
            Some(creds) => Some(ExternalAccountKey::new(
                creds.key_id.clone(),
                &decode_hmac_key(&creds.hmac_key)?,
            )),
            None if request.ca.requires_external_account() => {
                return Err(AcmeError::Registration(format!(
                    "{} requires external account binding credentials",
                    request.ca
                )))
            }
            None => None,
        };

        let contact = format!("mailto:{}", request.email);
        let directory = request.ca.directory_url(request.staging);
        debug!("Registering ACME account {} at {}", request.email, directory);

        let (account, _credentials) = Account::create(
            &NewAccount {
                contact: &[contact.as_str()],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            directory,
            eab.as_ref(),
        )
        .await
        .map_err(|e| AcmeError::Registration(e.to_string()))?;
        Ok(account)
    }

    /// Presents one TXT record per pending authorization and returns the
    /// challenge URLs to mark ready. Presented records are pushed to
    /// `presented` as soon as they exist so cleanup sees partial progress.
    async fn present_challenges(
        &self,
        order: &mut Order,
        dns: &dyn DnsChallengeProvider,
        presented: &mut Vec<(String, String)>,
    ) -> Result<Vec<String>, AcmeError> {
        let authorizations = order.authorizations().await?;
        let mut ready_urls = Vec::with_capacity(authorizations.len());

        for authz in &authorizations {
            #[allow(unreachable_patterns)]
            let domain = match &authz.identifier {
                Identifier::Dns(domain) => domain.clone(),
                other => {
                    return Err(AcmeError::Challenge(format!(
                        "unsupported identifier {:?}",
                        other
                    )))
                }
            };

            match authz.status {
                AuthorizationStatus::Pending => {}
                AuthorizationStatus::Valid => {
                    debug!("Authorization for {} is already valid", domain);
                    continue;
                }
                status => {
                    return Err(AcmeError::Challenge(format!(
                        "authorization for {} is {:?}",
                        domain, status
                    )))
                }
            }

            let challenge = authz
                .challenges
                .iter()
                .find(|c| c.r#type == ChallengeType::Dns01)
                .ok_or_else(|| {
                    AcmeError::Challenge(format!("no dns-01 challenge offered for {}", domain))
                })?;

            let value = order.key_authorization(challenge).dns_value();
            let record_name = challenge_record_name(&domain);
            dns.create_txt_record(&domain, &record_name, &value).await?;
            info!("Presented {} for {}", record_name, domain);

            presented.push((domain, record_name));
            ready_urls.push(challenge.url.clone());
        }

        Ok(ready_urls)
    }

    async fn validate_and_finalize(
        &self,
        order: &mut Order,
        request: &AcmeRequest,
        dns: &dyn DnsChallengeProvider,
        presented: &mut Vec<(String, String)>,
    ) -> Result<IssuedCertificate, AcmeError> {
        let ready_urls = self.present_challenges(order, dns, presented).await?;

        if !ready_urls.is_empty() {
            if !self.propagation_delay.is_zero() {
                debug!(
                    "Waiting {}s for TXT records to propagate",
                    self.propagation_delay.as_secs()
                );
                tokio::time::sleep(self.propagation_delay).await;
            }
            for url in &ready_urls {
                order.set_challenge_ready(url).await?;
            }
        }

        wait_for_order_ready(order).await?;

        let key_pair = generate_key(request.key_algorithm)?;
        let mut params = CertificateParams::new(request.domains.clone())?;
        params.distinguished_name = DistinguishedName::new();
        let csr = params.serialize_request(&key_pair)?;
        order.finalize(csr.der()).await?;

        let bundle = wait_for_certificate(order).await?;
        Ok(issued_certificate(bundle, key_pair.serialize_pem())?)
    }
}

#[async_trait]
impl AcmeClient for InstantAcmeClient {
    async fn obtain(
        &self,
        request: &AcmeRequest,
        dns: Arc<dyn DnsChallengeProvider>,
    ) -> Result<IssuedCertificate, AcmeError> {
        if request.domains.is_empty() {
            return Err(AcmeError::Protocol("no domains requested".to_string()));
        }
        info!(
            "Obtaining certificate for {} from {}{}",
            request.domains.join(", "),
            request.ca,
            if request.staging { " (staging)" } else { "" }
        );

        let account = self.register(request).await?;
        let identifiers: Vec<Identifier> = request
            .domains
            .iter()
            .map(|d| Identifier::Dns(d.clone()))
            .collect();
        let mut order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await?;

        let mut presented = Vec::new();
        let outcome = self
            .validate_and_finalize(&mut order, request, dns.as_ref(), &mut presented)
            .await;
        cleanup_challenges(dns.as_ref(), &presented).await;
        outcome
    }
}

/// Removes presented records. A wildcard and its apex share one record name,
/// which is deleted once. Failures are logged only.
pub async fn cleanup_challenges(dns: &dyn DnsChallengeProvider, presented: &[(String, String)]) {
    let mut seen = HashSet::new();
    for (domain, record_name) in presented {
        if !seen.insert(record_name.as_str()) {
            continue;
        }
        if let Err(e) = dns.delete_txt_record(domain, record_name).await {
            warn!("Failed to clean up {}: {}", record_name, e);
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let secs = BASE_DELAY_SECS
        .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
        .min(MAX_DELAY_SECS);
    Duration::from_secs(secs)
}

async fn wait_for_order_ready(order: &mut Order) -> Result<(), AcmeError> {
    for attempt in 1..=MAX_READY_ATTEMPTS {
        tokio::time::sleep(backoff_delay(attempt)).await;
        let state = order.refresh().await?;

        match state.status {
            OrderStatus::Ready | OrderStatus::Valid => {
                info!("Order is ready after {} attempt(s)", attempt);
                return Ok(());
            }
            OrderStatus::Invalid => {
                return Err(AcmeError::Challenge(format!(
                    "order validation failed after {} attempt(s)",
                    attempt
                )))
            }
            _ => debug!(
                "Order not ready yet (attempt {}/{})",
                attempt, MAX_READY_ATTEMPTS
            ),
        }
    }

    Err(AcmeError::Challenge(format!(
        "order validation timed out after {} attempts",
        MAX_READY_ATTEMPTS
    )))
}

async fn wait_for_certificate(order: &mut Order) -> Result<String, AcmeError> {
    for attempt in 1..=MAX_CERTIFICATE_ATTEMPTS {
        if let Some(bundle) = order.certificate().await? {
            return Ok(bundle);
        }
        tokio::time::sleep(backoff_delay(attempt.min(3))).await;
    }
    Err(AcmeError::Protocol(
        "certificate was not issued after finalization".to_string(),
    ))
}

/// Runs [`AcmeClient::obtain`] under a deadline.
///
/// The call runs on a spawned task that reports through a oneshot channel.
/// When the deadline or the cancellation token fires first, the caller gets
/// [`AcmeError::Cancelled`] and the spawned call is left to finish on its
/// own; its result is dropped.
#[derive(Clone)]
pub struct AcmeOrchestrator {
    client: Arc<dyn AcmeClient>,
    deadline: Duration,
}

impl AcmeOrchestrator {
    pub fn new(client: Arc<dyn AcmeClient>, deadline: Duration) -> Self {
        Self { client, deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub async fn obtain(
        &self,
        request: AcmeRequest,
        dns: Arc<dyn DnsChallengeProvider>,
        cancel: &CancellationToken,
    ) -> Result<IssuedCertificate, AcmeError> {
        let label = request.domains.join(", ");
        let (tx, rx) = oneshot::channel();
        let client = self.client.clone();

        tokio::spawn(async move {
            let result = client.obtain(&request, dns).await;
            // Nobody is listening after a timeout
            let _ = tx.send(result);
        });

        tokio::select! {
            result = rx => result.unwrap_or_else(|_| {
                Err(AcmeError::Protocol("ACME call ended without a result".to_string()))
            }),
            _ = tokio::time::sleep(self.deadline) => {
                warn!("ACME call for {} exceeded {:?}", label, self.deadline);
                Err(AcmeError::Cancelled(format!(
                    "deadline of {}s exceeded for {}",
                    self.deadline.as_secs(),
                    label
                )))
            }
            _ = cancel.cancelled() => Err(AcmeError::Cancelled(format!(
                "shutdown requested while issuing {}",
                label
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeAcmeClient, RecordingDnsProvider};

    fn request(domains: &[&str]) -> AcmeRequest {
        AcmeRequest {
            domains: domains.iter().map(|d| d.to_string()).collect(),
            ca: CaProvider::LetsEncrypt,
            staging: true,
            key_algorithm: KeyAlgorithm::Ec256,
            email: "ops@example.com".to_string(),
        }
    }

    #[test]
    fn test_generate_ec_keys() {
        for algorithm in [KeyAlgorithm::Ec256, KeyAlgorithm::Ec384] {
            let key = generate_key(algorithm).unwrap();
            assert!(key.serialize_pem().contains("PRIVATE KEY"));
        }
    }

    #[test]
    fn test_backoff_delay_is_capped() {
        let delays: Vec<u64> = (1..=7).map(|a| backoff_delay(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn test_decode_hmac_key_accepts_padding() {
        assert_eq!(decode_hmac_key("aGVsbG8").unwrap(), b"hello");
        assert_eq!(decode_hmac_key("aGVsbG8=").unwrap(), b"hello");
        assert!(decode_hmac_key("not base64!").is_err());
    }

    #[tokio::test]
    async fn test_cleanup_deletes_each_record_once_and_tolerates_failures() {
        let dns = RecordingDnsProvider::failing_deletes();
        let presented = vec![
            (
                "*.example.com".to_string(),
                "_acme-challenge.example.com".to_string(),
            ),
            (
                "example.com".to_string(),
                "_acme-challenge.example.com".to_string(),
            ),
            (
                "api.example.com".to_string(),
                "_acme-challenge.api.example.com".to_string(),
            ),
        ];

        cleanup_challenges(&dns, &presented).await;
        assert_eq!(
            dns.deleted(),
            vec![
                "_acme-challenge.example.com".to_string(),
                "_acme-challenge.api.example.com".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_orchestrator_returns_client_result() {
        let orchestrator =
            AcmeOrchestrator::new(Arc::new(FakeAcmeClient::default()), Duration::from_secs(5));
        let dns = Arc::new(RecordingDnsProvider::default());

        let issued = orchestrator
            .obtain(
                request(&["example.com", "www.example.com"]),
                dns.clone(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(issued.details.dns_names, vec!["example.com", "www.example.com"]);
        assert_eq!(dns.created().len(), 2);
    }

    #[tokio::test]
    async fn test_orchestrator_cancels_at_deadline() {
        let client = Arc::new(FakeAcmeClient::default().with_delay(Duration::from_secs(30)));
        let orchestrator = AcmeOrchestrator::new(client.clone(), Duration::from_millis(50));

        let started = std::time::Instant::now();
        let err = orchestrator
            .obtain(
                request(&["slow.example.com"]),
                Arc::new(RecordingDnsProvider::default()),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AcmeError::Cancelled(_)));
        assert!(err.to_string().contains("cancelled"));
        assert!(started.elapsed() < Duration::from_secs(5));
        // The detached call was started and is still running
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_orchestrator_honours_cancellation_token() {
        let client = Arc::new(FakeAcmeClient::default().with_delay(Duration::from_secs(30)));
        let orchestrator = AcmeOrchestrator::new(client, Duration::from_secs(600));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orchestrator
            .obtain(
                request(&["example.com"]),
                Arc::new(RecordingDnsProvider::default()),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AcmeError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_orchestrator_preserves_client_errors() {
        let client = Arc::new(FakeAcmeClient::default().failing_with("zone example.com not found"));
        let orchestrator = AcmeOrchestrator::new(client, Duration::from_secs(5));

        let err = orchestrator
            .obtain(
                request(&["example.com"]),
                Arc::new(RecordingDnsProvider::default()),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("zone example.com not found"));
    }
}
