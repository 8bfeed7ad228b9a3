//! In-memory stores and fakes for exercising the engine without a database,
//! a CA or a network.

use async_trait::async_trait;
use certpilot_core::{now, UtcDateTime};
use certpilot_deployer::{
    CertificateMaterial, DeployError, DeployTarget, DeployTargetFactory, DeployType,
};
use certpilot_dns::{
    challenge_record_name, DnsChallengeProvider, DnsError, DnsProviderFactory, DnsProviderType,
};
use chrono::{Datelike, Duration as ChronoDuration};
use rcgen::{date_time_ymd, CertificateParams, DnType, KeyPair};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::acme::{cleanup_challenges, AcmeClient, AcmeOrchestrator, AcmeRequest};
use crate::cloud::{
    ApplyResult, ApplyStatus, CertificateBundle, CloudAccount, CloudCaDirectory, CloudCaProvider,
    CloudCertificateInfo, CloudCertificateStatus, CloudVendor, DnsValidationRecord,
};
use crate::engine::{CertificateEngine, ChallengeProviders, EngineDeps, EngineSettings};
use crate::errors::{AcmeError, CloudCaError, RepositoryError};
use crate::ledger;
use crate::models::*;
use crate::repository::{CertificateRepository, DeployConfigRepository, TaskRepository};
use crate::x509::issued_certificate;

pub const TEST_DNS_PROVIDER_ID: i32 = 1;
pub const TEST_CLOUD_ACCOUNT_ID: i32 = 1;
pub const TEST_ACME_EMAIL: &str = "ops@example.com";

fn locked<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Self-signed PEM certificate and key valid from yesterday for `days` days.
/// A negative `days` gives an already expired certificate.
pub fn self_signed(domains: &[&str], days: i64) -> (String, String) {
    let names: Vec<String> = domains.iter().map(|d| d.to_string()).collect();
    let mut params = CertificateParams::new(names).expect("valid subject alt names");
    if let Some(first) = domains.first() {
        params.distinguished_name.push(DnType::CommonName, *first);
    }

    let now = chrono::Utc::now();
    let not_after = now + ChronoDuration::days(days);
    let not_before = std::cmp::min(now, not_after) - ChronoDuration::days(1);
    params.not_before = date_time_ymd(
        not_before.year(),
        not_before.month() as u8,
        not_before.day() as u8,
    );
    params.not_after = date_time_ymd(
        not_after.year(),
        not_after.month() as u8,
        not_after.day() as u8,
    );

    let key = KeyPair::generate().expect("key generation");
    let cert = params.self_signed(&key).expect("self-signed certificate");
    (cert.pem(), key.serialize_pem())
}

pub fn issued_for(domains: &[&str], days: i64) -> IssuedCertificate {
    let (cert, key) = self_signed(domains, days);
    issued_certificate(cert, key).expect("parsable test certificate")
}

pub fn new_acme_certificate(domain: &str) -> NewCertificate {
    NewCertificate {
        name: domain.to_string(),
        domain: domain.to_string(),
        san_domains: Vec::new(),
        source_type: SourceType::Acme,
        ca_provider: CaProvider::LetsEncrypt.to_string(),
        key_algorithm: KeyAlgorithm::Ec256,
        dns_provider_id: Some(TEST_DNS_PROVIDER_ID),
        acme_email: None,
        cloud_account_id: None,
        status: CertificateStatus::Pending,
        auto_renew: true,
        renew_days_before: 30,
    }
}

pub fn new_cloud_certificate(domain: &str) -> NewCertificate {
    NewCertificate {
        name: domain.to_string(),
        domain: domain.to_string(),
        san_domains: Vec::new(),
        source_type: SourceType::Cloud,
        ca_provider: CloudVendor::Aliyun.to_string(),
        key_algorithm: KeyAlgorithm::Rsa2048,
        dns_provider_id: None,
        acme_email: None,
        cloud_account_id: Some(TEST_CLOUD_ACCOUNT_ID),
        status: CertificateStatus::Pending,
        auto_renew: false,
        renew_days_before: 30,
    }
}

/// Polls until the task reaches a terminal status or five seconds pass.
pub async fn wait_for_task(tasks: &dyn TaskRepository, id: i32) -> RenewTask {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let task = tasks
            .get(id)
            .await
            .expect("task lookup")
            .expect("task exists");
        if task.status.is_terminal() || tokio::time::Instant::now() >= deadline {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn paginate<T: Clone>(mut items: Vec<T>, page: u64, page_size: u64) -> Page<T> {
    let (page, page_size) = normalize_page(page, page_size);
    let total = items.len() as u64;
    let start = ((page - 1) * page_size).min(total) as usize;
    let end = (start + page_size as usize).min(items.len());
    let items = items.drain(start..end).collect();
    Page {
        items,
        total,
        page,
        page_size,
    }
}

#[derive(Default)]
pub struct InMemoryCertificateRepository {
    rows: Mutex<BTreeMap<i32, Certificate>>,
    next_id: AtomicI32,
}

impl InMemoryCertificateRepository {
    async fn modify<F>(&self, id: i32, apply: F) -> Result<Certificate, RepositoryError>
    where
        F: FnOnce(&mut Certificate),
    {
        let mut rows = self.rows.lock().await;
        let cert = rows
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("certificate {}", id)))?;
        apply(cert);
        cert.updated_at = now();
        Ok(cert.clone())
    }
}

#[async_trait]
impl CertificateRepository for InMemoryCertificateRepository {
    async fn create(&self, new: NewCertificate) -> Result<Certificate, RepositoryError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let timestamp = now();
        let cert = Certificate {
            id,
            name: new.name,
            domain: new.domain,
            san_domains: new.san_domains,
            source_type: new.source_type,
            ca_provider: new.ca_provider,
            key_algorithm: new.key_algorithm,
            dns_provider_id: new.dns_provider_id,
            acme_email: new.acme_email,
            cloud_account_id: new.cloud_account_id,
            cloud_cert_id: None,
            status: new.status,
            auto_renew: new.auto_renew,
            renew_days_before: new.renew_days_before,
            certificate_pem: None,
            private_key_pem: None,
            chain_pem: None,
            not_before: None,
            not_after: None,
            fingerprint: None,
            issuer: None,
            subject: None,
            last_error: None,
            last_renew_at: None,
            created_at: timestamp,
            updated_at: timestamp,
        };
        self.rows.lock().await.insert(id, cert.clone());
        Ok(cert)
    }

    async fn get(&self, id: i32) -> Result<Option<Certificate>, RepositoryError> {
        Ok(self.rows.lock().await.get(&id).cloned())
    }

    async fn list(&self, filter: &CertificateFilter) -> Result<Page<Certificate>, RepositoryError> {
        let rows = self.rows.lock().await;
        let items: Vec<Certificate> = rows
            .values()
            .rev()
            .filter(|c| filter.status.map_or(true, |s| c.status == s))
            .filter(|c| filter.source_type.map_or(true, |s| c.source_type == s))
            .filter(|c| {
                filter
                    .domain
                    .as_deref()
                    .map_or(true, |d| c.domain.contains(d))
            })
            .cloned()
            .collect();
        Ok(paginate(items, filter.page, filter.page_size))
    }

    async fn update(
        &self,
        id: i32,
        update: CertificateUpdate,
    ) -> Result<Certificate, RepositoryError> {
        self.modify(id, |cert| {
            if let Some(name) = update.name {
                cert.name = name;
            }
            if let Some(auto_renew) = update.auto_renew {
                cert.auto_renew = auto_renew;
            }
            if let Some(days) = update.renew_days_before {
                cert.renew_days_before = days;
            }
            if let Some(provider_id) = update.dns_provider_id {
                cert.dns_provider_id = Some(provider_id);
            }
            if let Some(email) = update.acme_email {
                cert.acme_email = Some(email).filter(|e| !e.is_empty());
            }
        })
        .await
    }

    async fn delete(&self, id: i32) -> Result<(), RepositoryError> {
        self.rows
            .lock()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(format!("certificate {}", id)))
    }

    async fn update_status(
        &self,
        id: i32,
        status: CertificateStatus,
        last_error: Option<String>,
    ) -> Result<(), RepositoryError> {
        self.modify(id, |cert| {
            cert.status = status;
            cert.last_error = last_error;
        })
        .await
        .map(|_| ())
    }

    async fn update_material(
        &self,
        id: i32,
        issued: &IssuedCertificate,
    ) -> Result<(), RepositoryError> {
        self.modify(id, |cert| {
            cert.certificate_pem = Some(issued.certificate_pem.clone());
            cert.private_key_pem = Some(issued.private_key_pem.clone());
            cert.chain_pem = issued.chain_pem.clone();
            cert.not_before = Some(issued.details.not_before);
            cert.not_after = Some(issued.details.not_after);
            cert.fingerprint = Some(issued.details.fingerprint.clone());
            cert.issuer = Some(issued.details.issuer.clone());
            cert.subject = Some(issued.details.subject.clone());
            cert.status = CertificateStatus::Active;
            cert.last_error = None;
            cert.last_renew_at = Some(now());
        })
        .await
        .map(|_| ())
    }

    async fn set_cloud_cert_id(
        &self,
        id: i32,
        cloud_cert_id: &str,
    ) -> Result<(), RepositoryError> {
        self.modify(id, |cert| cert.cloud_cert_id = Some(cloud_cert_id.to_string()))
            .await
            .map(|_| ())
    }

    async fn list_expiring(&self, now: UtcDateTime) -> Result<Vec<Certificate>, RepositoryError> {
        let mut due: Vec<Certificate> = self
            .rows
            .lock()
            .await
            .values()
            .filter(|c| ledger::is_due_for_renewal(c, now))
            .cloned()
            .collect();
        due.sort_by_key(|c| c.not_after);
        Ok(due)
    }

    async fn list_classifiable(&self) -> Result<Vec<Certificate>, RepositoryError> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .filter(|c| c.not_after.is_some())
            .filter(|c| {
                !matches!(c.status, CertificateStatus::Expired | CertificateStatus::Error)
            })
            .cloned()
            .collect())
    }

    async fn list_pending_cloud(&self) -> Result<Vec<Certificate>, RepositoryError> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .filter(|c| c.status == CertificateStatus::Pending)
            .filter(|c| c.source_type == SourceType::Cloud)
            .filter(|c| c.cloud_cert_id.as_deref().is_some_and(|id| !id.is_empty()))
            .cloned()
            .collect())
    }

    async fn count_by_status(&self) -> Result<HashMap<String, u64>, RepositoryError> {
        let mut counts = HashMap::new();
        for cert in self.rows.lock().await.values() {
            *counts.entry(cert.status.to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

/// Task store whose claim is atomic under one lock, like the unique index
#[derive(Default)]
pub struct InMemoryTaskRepository {
    rows: Mutex<BTreeMap<i32, RenewTask>>,
    next_id: AtomicI32,
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn claim(&self, task: NewTask) -> Result<RenewTask, RepositoryError> {
        if task.status.is_terminal() {
            return Err(RepositoryError::InvalidData(format!(
                "cannot claim a task in status {}",
                task.status
            )));
        }

        let mut rows = self.rows.lock().await;
        if rows
            .values()
            .any(|t| t.certificate_id == task.certificate_id && t.status.is_in_flight())
        {
            return Err(RepositoryError::Conflict(format!(
                "certificate {} already has a task in progress",
                task.certificate_id
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let timestamp = now();
        let claimed = RenewTask {
            id,
            certificate_id: task.certificate_id,
            task_type: task.task_type,
            status: task.status,
            trigger_type: task.trigger_type,
            started_at: (task.status == TaskStatus::Running).then_some(timestamp),
            finished_at: None,
            error_message: None,
            result: None,
            created_at: timestamp,
        };
        rows.insert(id, claimed.clone());
        Ok(claimed)
    }

    async fn get(&self, id: i32) -> Result<Option<RenewTask>, RepositoryError> {
        Ok(self.rows.lock().await.get(&id).cloned())
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Page<RenewTask>, RepositoryError> {
        let rows = self.rows.lock().await;
        let items: Vec<RenewTask> = rows
            .values()
            .rev()
            .filter(|t| filter.certificate_id.map_or(true, |id| t.certificate_id == id))
            .filter(|t| filter.task_type.map_or(true, |k| t.task_type == k))
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| filter.trigger_type.map_or(true, |k| t.trigger_type == k))
            .cloned()
            .collect();
        Ok(paginate(items, filter.page, filter.page_size))
    }

    async fn list_by_certificate(
        &self,
        certificate_id: i32,
        limit: u64,
    ) -> Result<Vec<RenewTask>, RepositoryError> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .rev()
            .filter(|t| t.certificate_id == certificate_id)
            .take(limit.max(1) as usize)
            .cloned()
            .collect())
    }

    async fn latest(
        &self,
        certificate_id: i32,
        task_type: Option<TaskType>,
    ) -> Result<Option<RenewTask>, RepositoryError> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .rev()
            .find(|t| {
                t.certificate_id == certificate_id && task_type.map_or(true, |k| t.task_type == k)
            })
            .cloned())
    }

    async fn has_in_flight(&self, certificate_id: i32) -> Result<bool, RepositoryError> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .any(|t| t.certificate_id == certificate_id && t.status.is_in_flight()))
    }

    async fn transition(
        &self,
        id: i32,
        status: TaskStatus,
        error_message: Option<String>,
        result: Option<TaskResult>,
    ) -> Result<RenewTask, RepositoryError> {
        let mut rows = self.rows.lock().await;
        let task = rows
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("task {}", id)))?;
        if !task.status.can_transition_to(status) {
            return Err(RepositoryError::IllegalTransition(format!(
                "task {} cannot move from {} to {}",
                id, task.status, status
            )));
        }

        let timestamp = now();
        if status == TaskStatus::Running && task.started_at.is_none() {
            task.started_at = Some(timestamp);
        }
        if status.is_terminal() {
            task.finished_at = Some(timestamp);
        }
        if error_message.is_some() {
            task.error_message = error_message;
        }
        if result.is_some() {
            task.result = result;
        }
        task.status = status;
        Ok(task.clone())
    }

    async fn record_progress(&self, id: i32, message: &str) -> Result<(), RepositoryError> {
        if let Some(task) = self.rows.lock().await.get_mut(&id) {
            if task.status.is_in_flight() {
                task.result = Some(TaskResult {
                    message: message.to_string(),
                    ..Default::default()
                });
            }
        }
        Ok(())
    }

    async fn finish_in_flight(
        &self,
        certificate_id: i32,
        task_type: TaskType,
        status: TaskStatus,
        result: TaskResult,
    ) -> Result<u64, RepositoryError> {
        if !status.is_terminal() {
            return Err(RepositoryError::IllegalTransition(format!(
                "{} is not a terminal status",
                status
            )));
        }

        let timestamp = now();
        let mut finished = 0;
        for task in self.rows.lock().await.values_mut() {
            if task.certificate_id != certificate_id
                || task.task_type != task_type
                || !task.status.can_transition_to(status)
            {
                continue;
            }
            task.status = status;
            task.finished_at = Some(timestamp);
            if !result.success {
                task.error_message = Some(result.message.clone());
            }
            task.result = Some(result.clone());
            finished += 1;
        }
        Ok(finished)
    }

    async fn fail_interrupted(&self, message: &str) -> Result<Vec<RenewTask>, RepositoryError> {
        let timestamp = now();
        let mut swept = Vec::new();
        for task in self.rows.lock().await.values_mut() {
            if !task.status.is_in_flight() {
                continue;
            }
            swept.push(task.clone());
            task.status = TaskStatus::Failed;
            task.error_message = Some(message.to_string());
            task.result = Some(TaskResult::failed(message));
            task.finished_at = Some(timestamp);
        }
        Ok(swept)
    }
}

#[derive(Default)]
pub struct InMemoryDeployConfigRepository {
    rows: Mutex<BTreeMap<i32, DeployConfig>>,
    next_id: AtomicI32,
}

#[async_trait]
impl DeployConfigRepository for InMemoryDeployConfigRepository {
    async fn create(&self, new: NewDeployConfig) -> Result<DeployConfig, RepositoryError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let config = DeployConfig {
            id,
            certificate_id: new.certificate_id,
            name: new.name,
            deploy_type: new.deploy_type,
            target_config: new.target_config,
            auto_deploy: new.auto_deploy,
            enabled: new.enabled,
            last_deploy_ok: None,
            last_deploy_at: None,
            last_error: None,
            created_at: now(),
        };
        self.rows.lock().await.insert(id, config.clone());
        Ok(config)
    }

    async fn get(&self, id: i32) -> Result<Option<DeployConfig>, RepositoryError> {
        Ok(self.rows.lock().await.get(&id).cloned())
    }

    async fn list_by_certificate(
        &self,
        certificate_id: i32,
    ) -> Result<Vec<DeployConfig>, RepositoryError> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .filter(|c| c.certificate_id == certificate_id)
            .cloned()
            .collect())
    }

    async fn list_auto_deploy(
        &self,
        certificate_id: i32,
    ) -> Result<Vec<DeployConfig>, RepositoryError> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .filter(|c| c.certificate_id == certificate_id && c.enabled && c.auto_deploy)
            .cloned()
            .collect())
    }

    async fn update(
        &self,
        id: i32,
        update: DeployConfigUpdate,
    ) -> Result<DeployConfig, RepositoryError> {
        let mut rows = self.rows.lock().await;
        let config = rows
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("deploy config {}", id)))?;
        if let Some(name) = update.name {
            config.name = name;
        }
        if let Some(target_config) = update.target_config {
            config.target_config = target_config;
        }
        if let Some(auto_deploy) = update.auto_deploy {
            config.auto_deploy = auto_deploy;
        }
        if let Some(enabled) = update.enabled {
            config.enabled = enabled;
        }
        Ok(config.clone())
    }

    async fn delete(&self, id: i32) -> Result<(), RepositoryError> {
        self.rows
            .lock()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(format!("deploy config {}", id)))
    }

    async fn record_result(
        &self,
        id: i32,
        ok: bool,
        error: Option<String>,
    ) -> Result<(), RepositoryError> {
        let mut rows = self.rows.lock().await;
        let config = rows
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("deploy config {}", id)))?;
        config.last_deploy_ok = Some(ok);
        config.last_deploy_at = Some(now());
        config.last_error = error;
        Ok(())
    }
}

/// DNS provider that remembers what it was asked to do
#[derive(Default)]
pub struct RecordingDnsProvider {
    created: std::sync::Mutex<Vec<(String, String)>>,
    deleted: std::sync::Mutex<Vec<String>>,
    fail_deletes: bool,
    test_failure: Option<String>,
}

impl RecordingDnsProvider {
    /// Records deletes but reports each as failed
    pub fn failing_deletes() -> Self {
        Self {
            fail_deletes: true,
            ..Default::default()
        }
    }

    /// Fails `test_connection` with an API error carrying `message`
    pub fn failing_test(message: &str) -> Self {
        Self {
            test_failure: Some(message.to_string()),
            ..Default::default()
        }
    }

    /// `(record_name, value)` pairs in creation order
    pub fn created(&self) -> Vec<(String, String)> {
        locked(&self.created).clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        locked(&self.deleted).clone()
    }
}

#[async_trait]
impl DnsChallengeProvider for RecordingDnsProvider {
    fn provider_type(&self) -> DnsProviderType {
        DnsProviderType::Cloudflare
    }

    async fn create_txt_record(
        &self,
        _domain: &str,
        record_name: &str,
        value: &str,
    ) -> Result<(), DnsError> {
        locked(&self.created).push((record_name.to_string(), value.to_string()));
        Ok(())
    }

    async fn delete_txt_record(&self, _domain: &str, record_name: &str) -> Result<(), DnsError> {
        locked(&self.deleted).push(record_name.to_string());
        if self.fail_deletes {
            return Err(DnsError::ApiError(format!("cannot delete {}", record_name)));
        }
        Ok(())
    }

    async fn test_connection(&self) -> Result<(), DnsError> {
        match &self.test_failure {
            Some(message) => Err(DnsError::ApiError(message.clone())),
            None => Ok(()),
        }
    }
}

/// Challenge providers keyed by id
#[derive(Default)]
pub struct StaticChallengeProviders {
    providers: HashMap<i32, Arc<dyn DnsChallengeProvider>>,
}

impl StaticChallengeProviders {
    pub fn with(mut self, provider_id: i32, provider: Arc<dyn DnsChallengeProvider>) -> Self {
        self.providers.insert(provider_id, provider);
        self
    }
}

#[async_trait]
impl ChallengeProviders for StaticChallengeProviders {
    async fn challenge_provider(
        &self,
        provider_id: i32,
    ) -> Result<Arc<dyn DnsChallengeProvider>, DnsError> {
        self.providers
            .get(&provider_id)
            .cloned()
            .ok_or(DnsError::ProviderNotFound(provider_id))
    }
}

/// DNS factory returning the same provider for every type and config
pub struct FixedDnsProviderFactory {
    provider: Arc<dyn DnsChallengeProvider>,
}

impl FixedDnsProviderFactory {
    pub fn new(provider: Arc<dyn DnsChallengeProvider>) -> Self {
        Self { provider }
    }
}

impl DnsProviderFactory for FixedDnsProviderFactory {
    fn create(
        &self,
        _provider_type: DnsProviderType,
        _config: &Value,
    ) -> Result<Arc<dyn DnsChallengeProvider>, DnsError> {
        Ok(self.provider.clone())
    }
}

/// ACME client that presents one TXT record per domain and issues a
/// self-signed certificate
#[derive(Default)]
pub struct FakeAcmeClient {
    delay: Option<Duration>,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl FakeAcmeClient {
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_with(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AcmeClient for FakeAcmeClient {
    async fn obtain(
        &self,
        request: &AcmeRequest,
        dns: Arc<dyn DnsChallengeProvider>,
    ) -> Result<IssuedCertificate, AcmeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.failure {
            return Err(AcmeError::Protocol(message.clone()));
        }

        let mut presented = Vec::new();
        let mut outcome = Ok(());
        for domain in &request.domains {
            let record_name = challenge_record_name(domain);
            if let Err(e) = dns.create_txt_record(domain, &record_name, "token").await {
                outcome = Err(e);
                break;
            }
            presented.push((domain.clone(), record_name));
        }
        cleanup_challenges(dns.as_ref(), &presented).await;
        outcome?;

        let domains: Vec<&str> = request.domains.iter().map(String::as_str).collect();
        Ok(issued_for(&domains, 90))
    }
}

/// Cloud CA whose order state is set by the test
pub struct FakeCloudCa {
    delay: Option<Duration>,
    state: std::sync::Mutex<CloudCertificateStatus>,
    applications: AtomicUsize,
}

impl Default for FakeCloudCa {
    fn default() -> Self {
        Self {
            delay: None,
            state: std::sync::Mutex::new(CloudCertificateStatus::Pending(
                "domain_verify".to_string(),
            )),
            applications: AtomicUsize::new(0),
        }
    }
}

impl FakeCloudCa {
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes the order issued with a fresh certificate for `domains`
    pub fn issue(&self, domains: &[&str]) {
        let (certificate_pem, private_key_pem) = self_signed(domains, 365);
        *locked(&self.state) = CloudCertificateStatus::Issued(Some(CertificateBundle {
            certificate_pem,
            private_key_pem,
        }));
    }

    pub fn fail(&self, message: &str) {
        *locked(&self.state) = CloudCertificateStatus::Failed(message.to_string());
    }

    pub fn applications(&self) -> usize {
        self.applications.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl CloudCaProvider for FakeCloudCa {
    fn vendor(&self) -> CloudVendor {
        CloudVendor::Aliyun
    }

    async fn apply_certificate(
        &self,
        domain: &str,
        _san_domains: &[String],
    ) -> Result<ApplyResult, CloudCaError> {
        self.pause().await;
        let n = self.applications.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ApplyResult {
            order_id: format!("order-{}", n),
            cert_id: None,
            status: ApplyStatus::PendingValidation(DnsValidationRecord {
                name: format!("_dnsauth.{}", domain),
                record_type: "TXT".to_string(),
                value: "validation-token".to_string(),
            }),
        })
    }

    async fn check_certificate_status(
        &self,
        _id: &str,
    ) -> Result<CloudCertificateStatus, CloudCaError> {
        self.pause().await;
        Ok(locked(&self.state).clone())
    }

    async fn download_certificate(&self, id: &str) -> Result<CertificateBundle, CloudCaError> {
        self.pause().await;
        match &*locked(&self.state) {
            CloudCertificateStatus::Issued(Some(bundle)) => Ok(bundle.clone()),
            _ => Err(CloudCaError::Api(format!("certificate {} is not issued", id))),
        }
    }

    async fn list_certificates(&self) -> Result<Vec<CloudCertificateInfo>, CloudCaError> {
        Ok(Vec::new())
    }
}

/// Directory with a single account backed by one provider
pub struct FakeCloudDirectory {
    provider: Arc<FakeCloudCa>,
}

impl FakeCloudDirectory {
    pub fn new(provider: Arc<FakeCloudCa>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl CloudCaDirectory for FakeCloudDirectory {
    async fn account(&self, account_id: i32) -> Result<CloudAccount, CloudCaError> {
        if account_id != TEST_CLOUD_ACCOUNT_ID {
            return Err(CloudCaError::AccountNotFound(account_id));
        }
        Ok(CloudAccount {
            id: account_id,
            name: "test account".to_string(),
            vendor: CloudVendor::Aliyun,
        })
    }

    async fn provider(&self, account_id: i32) -> Result<Arc<dyn CloudCaProvider>, CloudCaError> {
        self.account(account_id).await?;
        Ok(self.provider.clone())
    }
}

/// Deploy target that records deployments. A config with `"fail": true`
/// fails both deploy and test.
#[derive(Default)]
pub struct RecordingDeployTarget {
    deployments: std::sync::Mutex<Vec<(String, Value)>>,
}

impl RecordingDeployTarget {
    /// `(certificate_pem, target_config)` in deploy order
    pub fn deployments(&self) -> Vec<(String, Value)> {
        locked(&self.deployments).clone()
    }

    fn check(config: &Value) -> Result<(), DeployError> {
        if config.get("fail").and_then(Value::as_bool).unwrap_or(false) {
            return Err(DeployError::Connection("target unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DeployTarget for RecordingDeployTarget {
    fn deploy_type(&self) -> DeployType {
        DeployType::ClusterSecret
    }

    async fn deploy(
        &self,
        material: &CertificateMaterial,
        config: &Value,
    ) -> Result<(), DeployError> {
        Self::check(config)?;
        locked(&self.deployments).push((material.certificate_pem.clone(), config.clone()));
        Ok(())
    }

    async fn test(&self, config: &Value) -> Result<(), DeployError> {
        Self::check(config)
    }
}

pub struct RecordingDeployFactory {
    target: Arc<RecordingDeployTarget>,
}

impl RecordingDeployFactory {
    pub fn new(target: Arc<RecordingDeployTarget>) -> Self {
        Self { target }
    }
}

impl DeployTargetFactory for RecordingDeployFactory {
    fn create(&self, _deploy_type: DeployType) -> Result<Arc<dyn DeployTarget>, DeployError> {
        Ok(self.target.clone())
    }
}

/// Engine wired to in-memory stores and fakes
pub struct TestEngine {
    pub engine: Arc<CertificateEngine>,
    pub certificates: Arc<InMemoryCertificateRepository>,
    pub tasks: Arc<InMemoryTaskRepository>,
    pub deploy_configs: Arc<InMemoryDeployConfigRepository>,
    pub dns: Arc<RecordingDnsProvider>,
    pub acme: Arc<FakeAcmeClient>,
    pub cloud: Arc<FakeCloudCa>,
    pub deployer: Arc<RecordingDeployTarget>,
}

impl TestEngine {
    pub fn builder() -> TestEngineBuilder {
        TestEngineBuilder::default()
    }

    /// Enabled auto-deploy cluster secret config
    pub fn cluster_config(
        &self,
        certificate_id: i32,
        name: &str,
        target_config: Value,
    ) -> NewDeployConfig {
        NewDeployConfig {
            certificate_id,
            name: name.to_string(),
            deploy_type: DeployType::ClusterSecret,
            target_config,
            auto_deploy: true,
            enabled: true,
        }
    }
}

pub struct TestEngineBuilder {
    acme: FakeAcmeClient,
    acme_deadline: Duration,
    cloud: FakeCloudCa,
    cloud_deadline: Duration,
    acme_email: Option<String>,
    max_workers: Option<usize>,
}

impl Default for TestEngineBuilder {
    fn default() -> Self {
        Self {
            acme: FakeAcmeClient::default(),
            acme_deadline: Duration::from_secs(5),
            cloud: FakeCloudCa::default(),
            cloud_deadline: Duration::from_secs(5),
            acme_email: Some(TEST_ACME_EMAIL.to_string()),
            max_workers: None,
        }
    }
}

impl TestEngineBuilder {
    pub fn acme_failure(mut self, message: &str) -> Self {
        self.acme = self.acme.failing_with(message);
        self
    }

    pub fn acme_delay(mut self, delay: Duration) -> Self {
        self.acme = self.acme.with_delay(delay);
        self
    }

    pub fn acme_deadline(mut self, deadline: Duration) -> Self {
        self.acme_deadline = deadline;
        self
    }

    pub fn cloud_delay(mut self, delay: Duration) -> Self {
        self.cloud = self.cloud.with_delay(delay);
        self
    }

    pub fn cloud_deadline(mut self, deadline: Duration) -> Self {
        self.cloud_deadline = deadline;
        self
    }

    pub fn without_default_email(mut self) -> Self {
        self.acme_email = None;
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    pub fn build(self) -> TestEngine {
        let certificates = Arc::new(InMemoryCertificateRepository::default());
        let tasks = Arc::new(InMemoryTaskRepository::default());
        let deploy_configs = Arc::new(InMemoryDeployConfigRepository::default());
        let dns = Arc::new(RecordingDnsProvider::default());
        let acme = Arc::new(self.acme);
        let cloud = Arc::new(self.cloud);
        let deployer = Arc::new(RecordingDeployTarget::default());

        let deps = EngineDeps {
            certificates: certificates.clone(),
            tasks: tasks.clone(),
            deploy_configs: deploy_configs.clone(),
            dns: Arc::new(StaticChallengeProviders::default().with(TEST_DNS_PROVIDER_ID, dns.clone())),
            acme: AcmeOrchestrator::new(acme.clone(), self.acme_deadline),
            cloud: Arc::new(FakeCloudDirectory::new(cloud.clone())),
            deployers: Arc::new(RecordingDeployFactory::new(deployer.clone())),
        };
        let settings = EngineSettings {
            acme_email: self.acme_email,
            staging: true,
            cloud_deadline: self.cloud_deadline,
            max_concurrent_workers: self.max_workers,
        };

        TestEngine {
            engine: Arc::new(CertificateEngine::new(deps, settings)),
            certificates,
            tasks,
            deploy_configs,
            dns,
            acme,
            cloud,
            deployer,
        }
    }
}
