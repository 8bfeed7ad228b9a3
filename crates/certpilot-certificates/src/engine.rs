//! Issuance workers and the auto-deploy cascade
//!
//! Every issuance runs as a spawned worker that owns one claimed task. The
//! task is claimed `pending` and moves to `running` once the worker holds a
//! slot. A worker never returns its error: outcomes land in the task row and
//! in the certificate's `status`/`last_error`.

use async_trait::async_trait;
use certpilot_core::{EngineConfig, UtcDateTime};
use certpilot_deployer::DeployTargetFactory;
use certpilot_dns::{DnsChallengeProvider, DnsError, DnsProviderService};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::acme::{AcmeOrchestrator, AcmeRequest};
use crate::cloud::{ApplyStatus, CertificateBundle, CloudCaDirectory, CloudCertificateStatus, DnsValidationRecord};
use crate::errors::{CertificateError, CloudCaError};
use crate::models::*;
use crate::repository::{CertificateRepository, DeployConfigRepository, TaskRepository};
use crate::x509::issued_certificate;

pub const INTERRUPTED_MESSAGE: &str = "task interrupted by service restart, please re-run";

/// Source of DNS challenge responders by provider id
#[async_trait]
pub trait ChallengeProviders: Send + Sync {
    async fn challenge_provider(
        &self,
        provider_id: i32,
    ) -> Result<Arc<dyn DnsChallengeProvider>, DnsError>;
}

#[async_trait]
impl ChallengeProviders for DnsProviderService {
    async fn challenge_provider(
        &self,
        provider_id: i32,
    ) -> Result<Arc<dyn DnsChallengeProvider>, DnsError> {
        self.build_provider(provider_id).await
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Fallback contact for certificates without their own email
    pub acme_email: Option<String>,
    pub staging: bool,
    pub cloud_deadline: Duration,
    pub max_concurrent_workers: Option<usize>,
}

impl EngineSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            acme_email: config.acme.email.clone().filter(|e| !e.trim().is_empty()),
            staging: config.acme.staging,
            cloud_deadline: config.scheduler.cloud_deadline(),
            max_concurrent_workers: config.scheduler.max_concurrent_workers,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            acme_email: None,
            staging: false,
            cloud_deadline: Duration::from_secs(300),
            max_concurrent_workers: None,
        }
    }
}

/// Collaborators the engine drives
pub struct EngineDeps {
    pub certificates: Arc<dyn CertificateRepository>,
    pub tasks: Arc<dyn TaskRepository>,
    pub deploy_configs: Arc<dyn DeployConfigRepository>,
    pub dns: Arc<dyn ChallengeProviders>,
    pub acme: AcmeOrchestrator,
    pub cloud: Arc<dyn CloudCaDirectory>,
    pub deployers: Arc<dyn DeployTargetFactory>,
}

/// A claimed task and the worker processing it
pub struct Dispatched {
    pub task: RenewTask,
    pub handle: JoinHandle<()>,
}

/// Result of checking a pending cloud certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudSyncOutcome {
    Issued,
    Pending(String),
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployReport {
    pub deployed_to: Vec<String>,
    pub errors: Vec<String>,
}

enum CloudIssueOutcome {
    Issued,
    AwaitingValidation(DnsValidationRecord),
}

pub struct CertificateEngine {
    certificates: Arc<dyn CertificateRepository>,
    tasks: Arc<dyn TaskRepository>,
    deploy_configs: Arc<dyn DeployConfigRepository>,
    dns: Arc<dyn ChallengeProviders>,
    acme: AcmeOrchestrator,
    cloud: Arc<dyn CloudCaDirectory>,
    deployers: Arc<dyn DeployTargetFactory>,
    settings: EngineSettings,
    workers: Option<Arc<Semaphore>>,
    running: TaskTracker,
    shutdown: CancellationToken,
}

impl CertificateEngine {
    pub fn new(deps: EngineDeps, settings: EngineSettings) -> Self {
        let workers = settings
            .max_concurrent_workers
            .filter(|n| *n > 0)
            .map(|n| Arc::new(Semaphore::new(n)));
        Self {
            certificates: deps.certificates,
            tasks: deps.tasks,
            deploy_configs: deps.deploy_configs,
            dns: deps.dns,
            acme: deps.acme,
            cloud: deps.cloud,
            deployers: deps.deployers,
            settings,
            workers,
            running: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn certificates(&self) -> &Arc<dyn CertificateRepository> {
        &self.certificates
    }

    pub fn tasks(&self) -> &Arc<dyn TaskRepository> {
        &self.tasks
    }

    pub fn deploy_configs(&self) -> &Arc<dyn DeployConfigRepository> {
        &self.deploy_configs
    }

    pub fn dns(&self) -> &Arc<dyn ChallengeProviders> {
        &self.dns
    }

    pub fn cloud(&self) -> &Arc<dyn CloudCaDirectory> {
        &self.cloud
    }

    pub fn deployers(&self) -> &Arc<dyn DeployTargetFactory> {
        &self.deployers
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Cancels in-flight ACME calls and waits for every worker to return.
    /// Tasks cut short stay in flight for [`Self::recover_interrupted`] and
    /// their certificates keep their status.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.running.close();
        self.running.wait().await;
    }

    pub async fn load_certificate(&self, id: i32) -> Result<Certificate, CertificateError> {
        self.certificates
            .get(id)
            .await?
            .ok_or_else(|| CertificateError::NotFound(format!("certificate {}", id)))
    }

    /// Certificate email, else the configured one
    pub fn resolve_email(&self, cert: &Certificate) -> Result<String, CertificateError> {
        cert.acme_email
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .or(self.settings.acme_email.as_deref())
            .map(|e| e.trim().to_string())
            .ok_or_else(|| {
                CertificateError::Validation(format!(
                    "no ACME email configured for certificate {}",
                    cert.id
                ))
            })
    }

    /// Fails every task left running by a previous process.
    pub async fn recover_interrupted(&self) -> Result<Vec<RenewTask>, CertificateError> {
        let swept = self.tasks.fail_interrupted(INTERRUPTED_MESSAGE).await?;
        for task in &swept {
            warn!(
                "Task {} ({} of certificate {}) was interrupted and marked failed",
                task.id, task.task_type, task.certificate_id
            );
        }
        Ok(swept)
    }

    /// Claims an ACME issue/renew task and starts its worker.
    pub async fn dispatch_acme(
        self: &Arc<Self>,
        cert: &Certificate,
        task_type: TaskType,
        trigger: TriggerType,
    ) -> Result<Dispatched, CertificateError> {
        if cert.dns_provider_id.is_none() {
            return Err(CertificateError::Validation(
                "certificate has no dns provider configured".to_string(),
            ));
        }
        let task = self
            .tasks
            .claim(NewTask::pending(cert.id, task_type, trigger))
            .await?;
        info!(
            "Dispatching {} task {} for certificate {} ({})",
            task_type, task.id, cert.id, cert.domain
        );

        let engine = Arc::clone(self);
        let worker_task = task.clone();
        let handle = self
            .running
            .spawn(async move { engine.run_acme_task(worker_task).await });
        Ok(Dispatched { task, handle })
    }

    /// Claims a cloud issue task and starts its worker.
    pub async fn dispatch_cloud_issue(
        self: &Arc<Self>,
        cert: &Certificate,
        trigger: TriggerType,
    ) -> Result<Dispatched, CertificateError> {
        let task = self
            .tasks
            .claim(NewTask::pending(cert.id, TaskType::Issue, trigger))
            .await?;
        info!(
            "Dispatching cloud issue task {} for certificate {} ({})",
            task.id, cert.id, cert.domain
        );

        let engine = Arc::clone(self);
        let worker_task = task.clone();
        let handle = self
            .running
            .spawn(async move { engine.run_cloud_issue_task(worker_task).await });
        Ok(Dispatched { task, handle })
    }

    async fn acquire_worker(&self) -> Option<OwnedSemaphorePermit> {
        match &self.workers {
            Some(semaphore) => semaphore.clone().acquire_owned().await.ok(),
            None => None,
        }
    }

    /// Moves a claimed task to `running`. Call with the worker slot held.
    /// A task still waiting when the engine shuts down is left for recovery.
    async fn start(&self, task: &RenewTask) -> bool {
        if self.shutdown.is_cancelled() {
            info!("Task {} not started, engine is shutting down", task.id);
            return false;
        }
        match self
            .tasks
            .transition(task.id, TaskStatus::Running, None, None)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!("Failed to start task {}: {}", task.id, e);
                false
            }
        }
    }

    /// Leaves a task cut short by shutdown in flight. The next start fails
    /// it as interrupted; the certificate keeps its status.
    fn interrupted(&self, task: &RenewTask, err: &CertificateError) {
        warn!(
            "Task {} for certificate {} interrupted by shutdown: {}",
            task.id, task.certificate_id, err
        );
    }

    async fn progress(&self, task_id: i32, message: &str) {
        debug!("Task {}: {}", task_id, message);
        if let Err(e) = self.tasks.record_progress(task_id, message).await {
            warn!("Failed to record progress of task {}: {}", task_id, e);
        }
    }

    async fn run_acme_task(&self, task: RenewTask) {
        let _permit = self.acquire_worker().await;
        if !self.start(&task).await {
            return;
        }
        match self.obtain_via_acme(&task).await {
            Ok(not_after) => {
                let verb = match task.task_type {
                    TaskType::Renew => "renewed",
                    _ => "issued",
                };
                self.finish_success(
                    &task,
                    format!("certificate {}, valid until {}", verb, not_after.to_rfc3339()),
                )
                .await;
                self.auto_deploy(task.certificate_id).await;
            }
            Err(e) if self.shutdown.is_cancelled() => self.interrupted(&task, &e),
            Err(e) => self.finish_failure(&task, &e).await,
        }
    }

    async fn obtain_via_acme(&self, task: &RenewTask) -> Result<UtcDateTime, CertificateError> {
        let cert = self.load_certificate(task.certificate_id).await?;
        let provider_id = cert.dns_provider_id.ok_or_else(|| {
            CertificateError::Validation("certificate has no dns provider configured".to_string())
        })?;
        let email = self.resolve_email(&cert)?;

        self.progress(task.id, "preparing DNS provider").await;
        let dns = self.dns.challenge_provider(provider_id).await?;

        let request = AcmeRequest {
            domains: cert.all_domains(),
            ca: CaProvider::resolve(&cert.ca_provider),
            staging: self.settings.staging,
            key_algorithm: cert.key_algorithm,
            email,
        };
        self.progress(task.id, "requesting certificate from ACME CA").await;
        let issued = self.acme.obtain(request, dns, &self.shutdown).await?;

        self.certificates.update_material(cert.id, &issued).await?;
        Ok(issued.details.not_after)
    }

    async fn run_cloud_issue_task(&self, task: RenewTask) {
        let _permit = self.acquire_worker().await;
        if !self.start(&task).await {
            return;
        }
        match self.issue_via_cloud(&task).await {
            Ok(CloudIssueOutcome::Issued) => {
                self.finish_success(&task, "certificate issued by cloud CA".to_string())
                    .await;
                self.auto_deploy(task.certificate_id).await;
            }
            Ok(CloudIssueOutcome::AwaitingValidation(record)) => {
                info!(
                    "Certificate {} awaits DNS validation via {}",
                    task.certificate_id, record
                );
            }
            Err(e) => self.finish_failure(&task, &e).await,
        }
    }

    async fn issue_via_cloud(&self, task: &RenewTask) -> Result<CloudIssueOutcome, CertificateError> {
        let cert = self.load_certificate(task.certificate_id).await?;
        let account_id = cert.cloud_account_id.ok_or_else(|| {
            CertificateError::Validation("cloud account not configured".to_string())
        })?;
        let provider = self.cloud.provider(account_id).await?;

        self.progress(task.id, "applying for certificate").await;
        let applied = self
            .with_cloud_deadline(
                "apply certificate",
                provider.apply_certificate(&cert.domain, &cert.san_domains),
            )
            .await?;
        self.certificates
            .set_cloud_cert_id(cert.id, applied.tracking_id())
            .await?;

        match applied.status {
            ApplyStatus::PendingValidation(record) => {
                let message = format!("add DNS record: {}", record);
                self.progress(task.id, &message).await;
                self.certificates
                    .update_status(cert.id, CertificateStatus::Pending, Some(message))
                    .await?;
                Ok(CloudIssueOutcome::AwaitingValidation(record))
            }
            ApplyStatus::Issued(bundle) => {
                self.store_bundle(cert.id, bundle).await?;
                Ok(CloudIssueOutcome::Issued)
            }
            ApplyStatus::Failed(message) => Err(CloudCaError::Api(format!(
                "certificate issuance failed: {}",
                message
            ))
            .into()),
        }
    }

    /// Polls the vendor for a pending cloud certificate. Issued material is
    /// stored, the open issue task completed and auto-deploy run. No task is
    /// created.
    pub async fn sync_cloud_certificate(
        &self,
        cert: &Certificate,
    ) -> Result<CloudSyncOutcome, CertificateError> {
        let account_id = cert.cloud_account_id.ok_or_else(|| {
            CertificateError::Validation("cloud account not configured".to_string())
        })?;
        let cloud_id = cert
            .cloud_cert_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                CertificateError::Validation("cloud certificate id not found".to_string())
            })?;
        let provider = self.cloud.provider(account_id).await?;

        let status = self
            .with_cloud_deadline(
                "check certificate status",
                provider.check_certificate_status(cloud_id),
            )
            .await?;

        match status {
            CloudCertificateStatus::Issued(bundle) => {
                let bundle = match bundle {
                    Some(bundle) => bundle,
                    None => {
                        self.with_cloud_deadline(
                            "download certificate",
                            provider.download_certificate(cloud_id),
                        )
                        .await?
                    }
                };
                self.store_bundle(cert.id, bundle).await?;
                let completed = self
                    .tasks
                    .finish_in_flight(
                        cert.id,
                        TaskType::Issue,
                        TaskStatus::Success,
                        TaskResult::succeeded("certificate issued by cloud CA"),
                    )
                    .await?;
                info!(
                    "Cloud certificate {} ({}) issued, {} task(s) completed",
                    cert.id, cert.domain, completed
                );
                self.auto_deploy(cert.id).await;
                Ok(CloudSyncOutcome::Issued)
            }
            CloudCertificateStatus::Failed(message) => {
                warn!(
                    "Cloud certificate {} ({}) failed: {}",
                    cert.id, cert.domain, message
                );
                self.certificates
                    .update_status(cert.id, CertificateStatus::Error, Some(message.clone()))
                    .await?;
                self.tasks
                    .finish_in_flight(
                        cert.id,
                        TaskType::Issue,
                        TaskStatus::Failed,
                        TaskResult::failed(message.clone()),
                    )
                    .await?;
                Ok(CloudSyncOutcome::Failed(message))
            }
            CloudCertificateStatus::Pending(message) => {
                debug!("Cloud certificate {} still pending: {}", cert.id, message);
                Ok(CloudSyncOutcome::Pending(message))
            }
        }
    }

    async fn store_bundle(
        &self,
        certificate_id: i32,
        bundle: CertificateBundle,
    ) -> Result<(), CertificateError> {
        let issued = issued_certificate(bundle.certificate_pem, bundle.private_key_pem)?;
        self.certificates
            .update_material(certificate_id, &issued)
            .await?;
        Ok(())
    }

    async fn with_cloud_deadline<T, F>(&self, what: &str, call: F) -> Result<T, CloudCaError>
    where
        F: Future<Output = Result<T, CloudCaError>>,
    {
        tokio::time::timeout(self.settings.cloud_deadline, call)
            .await
            .map_err(|_| {
                CloudCaError::Timeout(format!(
                    "{} exceeded {}s",
                    what,
                    self.settings.cloud_deadline.as_secs()
                ))
            })?
    }

    async fn finish_success(&self, task: &RenewTask, message: String) {
        info!(
            "Task {} for certificate {} succeeded: {}",
            task.id, task.certificate_id, message
        );
        if let Err(e) = self
            .tasks
            .transition(task.id, TaskStatus::Success, None, Some(TaskResult::succeeded(message)))
            .await
        {
            error!("Failed to mark task {} successful: {}", task.id, e);
        }
    }

    async fn finish_failure(&self, task: &RenewTask, err: &CertificateError) {
        let message = err.to_string();
        error!(
            "Task {} for certificate {} failed: {}",
            task.id, task.certificate_id, message
        );
        if let Err(e) = self
            .tasks
            .transition(
                task.id,
                TaskStatus::Failed,
                Some(message.clone()),
                Some(TaskResult::failed(message.clone())),
            )
            .await
        {
            error!("Failed to mark task {} failed: {}", task.id, e);
        }
        if let Err(e) = self
            .certificates
            .update_status(task.certificate_id, CertificateStatus::Error, Some(message))
            .await
        {
            error!(
                "Failed to record error on certificate {}: {}",
                task.certificate_id, e
            );
        }
    }

    /// Deploys to every enabled auto-deploy config in turn. Each target's
    /// outcome is recorded on its config; one failure does not stop the rest.
    pub async fn auto_deploy(&self, certificate_id: i32) -> DeployReport {
        let mut report = DeployReport::default();

        let cert = match self.load_certificate(certificate_id).await {
            Ok(cert) => cert,
            Err(e) => {
                warn!("Auto-deploy skipped for certificate {}: {}", certificate_id, e);
                return report;
            }
        };
        let configs = match self.deploy_configs.list_auto_deploy(certificate_id).await {
            Ok(configs) => configs,
            Err(e) => {
                warn!(
                    "Failed to list deploy configs of certificate {}: {}",
                    certificate_id, e
                );
                return report;
            }
        };

        for config in configs {
            match self.deploy_config(&cert, &config).await {
                Ok(()) => report.deployed_to.push(config.name.clone()),
                Err(e) => report.errors.push(format!("{}: {}", config.name, e)),
            }
        }

        if !report.deployed_to.is_empty() || !report.errors.is_empty() {
            info!(
                "Auto-deploy of certificate {}: {} succeeded, {} failed",
                certificate_id,
                report.deployed_to.len(),
                report.errors.len()
            );
        }
        report
    }

    /// Pushes the certificate to one target and records the outcome on the
    /// config. A target that cannot be built is skipped without a record.
    pub async fn deploy_config(
        &self,
        cert: &Certificate,
        config: &DeployConfig,
    ) -> Result<(), CertificateError> {
        let material = cert.material().ok_or_else(|| {
            CertificateError::Validation(format!(
                "certificate {} has no issued material",
                cert.id
            ))
        })?;
        let target = self.deployers.create(config.deploy_type).map_err(|e| {
            warn!("Cannot build {} target for '{}': {}", config.deploy_type, config.name, e);
            e
        })?;

        let outcome = target.deploy(&material, &config.target_config).await;
        let error = outcome.as_ref().err().map(|e| e.to_string());
        match &error {
            None => info!(
                "Deployed certificate {} to '{}' ({})",
                cert.id, config.name, config.deploy_type
            ),
            Some(message) => warn!(
                "Deploying certificate {} to '{}' failed: {}",
                cert.id, config.name, message
            ),
        }

        if let Err(e) = self
            .deploy_configs
            .record_result(config.id, outcome.is_ok(), error)
            .await
        {
            warn!("Failed to record deploy result of '{}': {}", config.name, e);
        }
        Ok(outcome?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        issued_for, new_acme_certificate, new_cloud_certificate, wait_for_task, TestEngine,
    };
    use serde_json::json;

    #[tokio::test]
    async fn test_acme_worker_issues_and_completes_task() {
        let t = TestEngine::builder().build();
        let cert = t.certificates.create(new_acme_certificate("example.com")).await.unwrap();

        let dispatched = t
            .engine
            .dispatch_acme(&cert, TaskType::Issue, TriggerType::Manual)
            .await
            .unwrap();
        assert_eq!(dispatched.task.status, TaskStatus::Pending);
        assert!(dispatched.task.started_at.is_none());
        dispatched.handle.await.unwrap();

        let task = t.tasks.get(dispatched.task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Success);
        assert!(task.started_at.is_some());
        assert!(task.finished_at.is_some());
        assert!(task.result.unwrap().message.starts_with("certificate issued"));

        let stored = t.certificates.get(cert.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CertificateStatus::Active);
        assert!(stored.private_key_pem.is_some());
        assert!(stored.last_renew_at.is_some());
        assert_eq!(t.dns.created().len(), 1);
        assert_eq!(t.dns.deleted(), vec!["_acme-challenge.example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_acme_worker_failure_marks_certificate_error() {
        let t = TestEngine::builder()
            .acme_failure("urn:ietf:params:acme:error:rateLimited")
            .build();
        let cert = t.certificates.create(new_acme_certificate("example.com")).await.unwrap();

        let dispatched = t
            .engine
            .dispatch_acme(&cert, TaskType::Renew, TriggerType::Auto)
            .await
            .unwrap();
        dispatched.handle.await.unwrap();

        let task = t.tasks.get(dispatched.task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error_message.unwrap().contains("rateLimited"));

        let stored = t.certificates.get(cert.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CertificateStatus::Error);
        assert!(stored.last_error.unwrap().contains("rateLimited"));
    }

    #[tokio::test]
    async fn test_missing_email_fails_task_without_calling_ca() {
        let t = TestEngine::builder().without_default_email().build();
        let mut new = new_acme_certificate("example.com");
        new.acme_email = None;
        let cert = t.certificates.create(new).await.unwrap();

        let dispatched = t
            .engine
            .dispatch_acme(&cert, TaskType::Issue, TriggerType::Manual)
            .await
            .unwrap();
        dispatched.handle.await.unwrap();

        let task = t.tasks.get(dispatched.task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error_message.unwrap().contains("no ACME email"));
        assert_eq!(t.acme.calls(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_is_deduplicated() {
        let t = TestEngine::builder()
            .acme_delay(Duration::from_millis(200))
            .build();
        let cert = t.certificates.create(new_acme_certificate("example.com")).await.unwrap();

        let first = t
            .engine
            .dispatch_acme(&cert, TaskType::Renew, TriggerType::Auto)
            .await
            .unwrap();
        let second = t
            .engine
            .dispatch_acme(&cert, TaskType::Renew, TriggerType::Manual)
            .await;
        assert!(matches!(second, Err(CertificateError::ConcurrencyConflict(_))));

        first.handle.await.unwrap();
        assert_eq!(t.acme.calls(), 1);
    }

    #[tokio::test]
    async fn test_task_stays_pending_until_a_worker_slot_frees() {
        let t = TestEngine::builder()
            .max_workers(1)
            .acme_delay(Duration::from_millis(200))
            .build();
        let a = t.certificates.create(new_acme_certificate("a.example.com")).await.unwrap();
        let b = t.certificates.create(new_acme_certificate("b.example.com")).await.unwrap();

        let first = t
            .engine
            .dispatch_acme(&a, TaskType::Issue, TriggerType::Manual)
            .await
            .unwrap();
        let second = t
            .engine
            .dispatch_acme(&b, TaskType::Issue, TriggerType::Manual)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let running = t.tasks.get(first.task.id).await.unwrap().unwrap();
        assert_eq!(running.status, TaskStatus::Running);
        assert!(running.started_at.is_some());
        let waiting = t.tasks.get(second.task.id).await.unwrap().unwrap();
        assert_eq!(waiting.status, TaskStatus::Pending);
        assert!(waiting.started_at.is_none());

        first.handle.await.unwrap();
        second.handle.await.unwrap();
        let first = t.tasks.get(first.task.id).await.unwrap().unwrap();
        let second = t.tasks.get(second.task.id).await.unwrap().unwrap();
        assert_eq!(second.status, TaskStatus::Success);
        assert!(second.started_at >= first.finished_at);
    }

    #[tokio::test]
    async fn test_shutdown_leaves_tasks_for_recovery() {
        let t = TestEngine::builder()
            .max_workers(1)
            .acme_delay(Duration::from_secs(30))
            .acme_deadline(Duration::from_secs(60))
            .build();
        let a = t.certificates.create(new_acme_certificate("a.example.com")).await.unwrap();
        t.certificates
            .update_material(a.id, &issued_for(&["a.example.com"], 5))
            .await
            .unwrap();
        let b = t.certificates.create(new_acme_certificate("b.example.com")).await.unwrap();

        let renewing = t
            .engine
            .dispatch_acme(&a, TaskType::Renew, TriggerType::Auto)
            .await
            .unwrap();
        let queued = t
            .engine
            .dispatch_acme(&b, TaskType::Issue, TriggerType::Manual)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::time::timeout(Duration::from_secs(5), t.engine.shutdown())
            .await
            .unwrap();
        assert!(renewing.handle.is_finished());
        assert!(queued.handle.is_finished());

        let renewing = t.tasks.get(renewing.task.id).await.unwrap().unwrap();
        assert_eq!(renewing.status, TaskStatus::Running);
        let queued = t.tasks.get(queued.task.id).await.unwrap().unwrap();
        assert_eq!(queued.status, TaskStatus::Pending);

        // a restart mid-renewal must not take the certificate out of rotation
        let stored = t.certificates.get(a.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CertificateStatus::Active);
        assert!(stored.last_error.is_none());
        assert_ne!(
            t.certificates.get(b.id).await.unwrap().unwrap().status,
            CertificateStatus::Error
        );

        let swept = t.engine.recover_interrupted().await.unwrap();
        assert_eq!(swept.len(), 2);
        let renewing = t.tasks.get(renewing.id).await.unwrap().unwrap();
        assert_eq!(renewing.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
        assert!(!t.tasks.has_in_flight(a.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_recover_interrupted() {
        let t = TestEngine::builder().build();
        let cert = t.certificates.create(new_acme_certificate("example.com")).await.unwrap();
        let task = t
            .tasks
            .claim(NewTask::running(cert.id, TaskType::Renew, TriggerType::Auto))
            .await
            .unwrap();

        let swept = t.engine.recover_interrupted().await.unwrap();
        assert_eq!(swept.len(), 1);

        let task = t.tasks.get(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
        assert!(task.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_auto_deploy_isolates_failures() {
        let t = TestEngine::builder().build();
        let cert = t.certificates.create(new_acme_certificate("example.com")).await.unwrap();
        t.certificates
            .update_material(cert.id, &issued_for(&["example.com"], 90))
            .await
            .unwrap();

        let failing = t
            .deploy_configs
            .create(t.cluster_config(cert.id, "broken", json!({"fail": true})))
            .await
            .unwrap();
        let healthy = t
            .deploy_configs
            .create(t.cluster_config(cert.id, "edge", json!({})))
            .await
            .unwrap();

        let report = t.engine.auto_deploy(cert.id).await;
        assert_eq!(report.deployed_to, vec!["edge".to_string()]);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("broken:"));

        let failing = t.deploy_configs.get(failing.id).await.unwrap().unwrap();
        assert_eq!(failing.last_deploy_ok, Some(false));
        assert!(failing.last_error.is_some());
        let healthy = t.deploy_configs.get(healthy.id).await.unwrap().unwrap();
        assert_eq!(healthy.last_deploy_ok, Some(true));
        assert_eq!(t.deployer.deployments().len(), 1);
    }

    #[tokio::test]
    async fn test_cloud_issue_waits_for_validation() {
        let t = TestEngine::builder().build();
        let cert = t.certificates.create(new_cloud_certificate("shop.example.com")).await.unwrap();

        let dispatched = t
            .engine
            .dispatch_cloud_issue(&cert, TriggerType::Manual)
            .await
            .unwrap();
        dispatched.handle.await.unwrap();

        // Task stays open until a sync sees the issued certificate
        let task = t.tasks.get(dispatched.task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.result.unwrap().message.starts_with("add DNS record: _dnsauth.shop.example.com"));

        let stored = t.certificates.get(cert.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CertificateStatus::Pending);
        assert_eq!(stored.cloud_cert_id.as_deref(), Some("order-1"));

        t.cloud.issue(&["shop.example.com"]);
        let outcome = t.engine.sync_cloud_certificate(&stored).await.unwrap();
        assert_eq!(outcome, CloudSyncOutcome::Issued);

        let task = wait_for_task(t.tasks.as_ref(), task.id).await;
        assert_eq!(task.status, TaskStatus::Success);
        let stored = t.certificates.get(cert.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CertificateStatus::Active);
    }

    #[tokio::test]
    async fn test_cloud_sync_failure_marks_error() {
        let t = TestEngine::builder().build();
        let cert = t.certificates.create(new_cloud_certificate("shop.example.com")).await.unwrap();
        t.certificates.set_cloud_cert_id(cert.id, "order-1").await.unwrap();
        let cert = t.certificates.get(cert.id).await.unwrap().unwrap();

        t.cloud.fail("domain validation failed");
        let outcome = t.engine.sync_cloud_certificate(&cert).await.unwrap();
        assert_eq!(
            outcome,
            CloudSyncOutcome::Failed("domain validation failed".to_string())
        );
        let stored = t.certificates.get(cert.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CertificateStatus::Error);
    }

    #[tokio::test]
    async fn test_cloud_calls_respect_deadline() {
        let t = TestEngine::builder()
            .cloud_delay(Duration::from_secs(30))
            .cloud_deadline(Duration::from_millis(50))
            .build();
        let cert = t.certificates.create(new_cloud_certificate("shop.example.com")).await.unwrap();

        let dispatched = t
            .engine
            .dispatch_cloud_issue(&cert, TriggerType::Manual)
            .await
            .unwrap();
        dispatched.handle.await.unwrap();

        let task = t.tasks.get(dispatched.task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error_message.unwrap().contains("timed out"));
    }
}
