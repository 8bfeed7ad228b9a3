//! Periodic renewal scheduler
//!
//! Each cycle:
//! 1. Reclassifies certificate statuses from `not_after`
//! 2. Syncs pending cloud certificates that already have a vendor id
//! 3. Dispatches a renewal worker for every certificate due for renewal
//!
//! The loop only dispatches; workers run on their own tasks. A cycle in
//! progress is never dropped: stopping is observed between certificates.

use certpilot_core::now;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::{CertificateEngine, CloudSyncOutcome, Dispatched};
use crate::errors::CertificateError;
use crate::ledger;
use crate::models::{TaskType, TriggerType};

/// What one cycle did
#[derive(Default)]
pub struct CycleReport {
    pub reclassified: usize,
    pub synced: usize,
    pub skipped: usize,
    pub dispatched: Vec<Dispatched>,
}

impl CycleReport {
    /// Waits for every worker started by the cycle.
    pub async fn join(self) {
        for dispatched in self.dispatched {
            if let Err(e) = dispatched.handle.await {
                error!("Worker for task {} panicked: {}", dispatched.task.id, e);
            }
        }
    }
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct RenewalScheduler {
    engine: Arc<CertificateEngine>,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl RenewalScheduler {
    pub fn new(engine: Arc<CertificateEngine>, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            running: Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Fails tasks left running by a previous process, then starts the
    /// loop with an immediate first cycle. Calling it again while running
    /// does nothing.
    pub async fn start(self: &Arc<Self>) -> Result<(), CertificateError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("Renewal scheduler already running");
            return Ok(());
        }

        let swept = self.engine.recover_interrupted().await?;
        if !swept.is_empty() {
            info!("Marked {} interrupted task(s) as failed", swept.len());
        }

        let token = CancellationToken::new();
        let scheduler = Arc::clone(self);
        let loop_token = token.clone();
        let handle = tokio::spawn(async move { scheduler.run_loop(loop_token).await });
        *running = Some(Running { token, handle });

        info!(
            "Renewal scheduler started, checking every {}s",
            self.interval.as_secs()
        );
        Ok(())
    }

    /// Signals the loop and waits for it to exit. The certificate being
    /// handled when the signal arrives is finished first, and no cycle runs
    /// after this returns. Workers already dispatched keep running.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        running.token.cancel();
        if let Err(e) = running.handle.await {
            error!("Renewal scheduler loop ended abnormally: {}", e);
        }
        info!("Renewal scheduler stopped");
    }

    async fn run_loop(&self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.run_cycle(&token).await {
                Ok(report) => debug!(
                    "Renewal cycle: {} reclassified, {} synced, {} dispatched, {} skipped",
                    report.reclassified,
                    report.synced,
                    report.dispatched.len(),
                    report.skipped
                ),
                Err(e) => error!("Renewal cycle failed: {}", e),
            }
        }
        debug!("Renewal scheduler loop exited");
    }

    /// Runs a single cycle. Per-certificate failures are logged and skipped.
    pub async fn run_once(&self) -> Result<CycleReport, CertificateError> {
        self.run_cycle(&CancellationToken::new()).await
    }

    async fn run_cycle(&self, stop: &CancellationToken) -> Result<CycleReport, CertificateError> {
        let mut report = CycleReport::default();
        let certificates = self.engine.certificates();
        let tasks = self.engine.tasks();

        match ledger::reclassify(certificates.as_ref(), now()).await {
            Ok(changed) => report.reclassified = changed,
            Err(e) => warn!("Failed to reclassify certificates: {}", e),
        }

        match certificates.list_pending_cloud().await {
            Ok(pending) => {
                for cert in pending {
                    if stop.is_cancelled() {
                        debug!("Cycle stopped before syncing certificate {}", cert.id);
                        return Ok(report);
                    }
                    match self.engine.sync_cloud_certificate(&cert).await {
                        Ok(CloudSyncOutcome::Issued) => report.synced += 1,
                        Ok(CloudSyncOutcome::Failed(message)) => {
                            warn!(
                                "Cloud certificate {} ({}) failed: {}",
                                cert.id, cert.domain, message
                            )
                        }
                        Ok(CloudSyncOutcome::Pending(_)) => {}
                        Err(e) => warn!(
                            "Failed to sync cloud certificate {} ({}): {}",
                            cert.id, cert.domain, e
                        ),
                    }
                }
            }
            Err(e) => warn!("Failed to list pending cloud certificates: {}", e),
        }

        for cert in certificates.list_expiring(now()).await? {
            if stop.is_cancelled() {
                debug!("Cycle stopped before renewing certificate {}", cert.id);
                break;
            }
            match tasks.has_in_flight(cert.id).await {
                Ok(true) => {
                    debug!(
                        "Certificate {} ({}) already has a task in progress",
                        cert.id, cert.domain
                    );
                    report.skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to check tasks of certificate {}: {}", cert.id, e);
                    report.skipped += 1;
                    continue;
                }
            }
            if cert.dns_provider_id.is_none() {
                warn!(
                    "Certificate {} ({}) is due for renewal but has no DNS provider",
                    cert.id, cert.domain
                );
                report.skipped += 1;
                continue;
            }

            match self
                .engine
                .dispatch_acme(&cert, TaskType::Renew, TriggerType::Auto)
                .await
            {
                Ok(dispatched) => report.dispatched.push(dispatched),
                // lost the claim to a concurrent trigger
                Err(CertificateError::ConcurrencyConflict(_)) => report.skipped += 1,
                Err(e) => {
                    warn!(
                        "Failed to dispatch renewal of certificate {} ({}): {}",
                        cert.id, cert.domain, e
                    );
                    report.skipped += 1;
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::INTERRUPTED_MESSAGE;
    use crate::models::{CertificateStatus, NewTask, TaskStatus};
    use crate::repository::{CertificateRepository, DeployConfigRepository, TaskRepository};
    use crate::test_utils::{
        issued_for, new_acme_certificate, new_cloud_certificate, wait_for_task, TestEngine,
    };
    use serde_json::json;

    async fn due_certificate(t: &TestEngine, domain: &str) -> i32 {
        let cert = t.certificates.create(new_acme_certificate(domain)).await.unwrap();
        t.certificates
            .update_material(cert.id, &issued_for(&[domain], 10))
            .await
            .unwrap();
        cert.id
    }

    #[tokio::test]
    async fn test_run_once_renews_due_certificates() {
        let t = TestEngine::builder().build();
        let due = due_certificate(&t, "due.example.com").await;
        let fresh = t
            .certificates
            .create(new_acme_certificate("fresh.example.com"))
            .await
            .unwrap();
        t.certificates
            .update_material(fresh.id, &issued_for(&["fresh.example.com"], 80))
            .await
            .unwrap();

        let scheduler = RenewalScheduler::new(t.engine.clone(), Duration::from_secs(3600));
        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.reclassified, 1);
        assert_eq!(report.dispatched.len(), 1);
        assert_eq!(report.dispatched[0].task.certificate_id, due);
        assert_eq!(report.dispatched[0].task.trigger_type, TriggerType::Auto);
        report.join().await;

        let renewed = t.certificates.get(due).await.unwrap().unwrap();
        assert_eq!(renewed.status, CertificateStatus::Active);
        assert!(renewed.days_until_expiry(now()).unwrap() > 80);
    }

    #[tokio::test]
    async fn test_run_once_skips_in_flight_and_providerless() {
        let t = TestEngine::builder().build();
        let busy = due_certificate(&t, "busy.example.com").await;
        t.tasks
            .claim(NewTask::pending(busy, TaskType::Deploy, TriggerType::Manual))
            .await
            .unwrap();

        let mut orphan = new_acme_certificate("orphan.example.com");
        orphan.dns_provider_id = None;
        let orphan = t.certificates.create(orphan).await.unwrap();
        t.certificates
            .update_material(orphan.id, &issued_for(&["orphan.example.com"], 5))
            .await
            .unwrap();

        let scheduler = RenewalScheduler::new(t.engine.clone(), Duration::from_secs(3600));
        let report = scheduler.run_once().await.unwrap();
        assert!(report.dispatched.is_empty());
        assert_eq!(report.skipped, 2);
        assert_eq!(t.acme.calls(), 0);
    }

    #[tokio::test]
    async fn test_start_recovers_and_is_idempotent() {
        let t = TestEngine::builder().build();
        let cert = t
            .certificates
            .create(new_acme_certificate("example.com"))
            .await
            .unwrap();
        let stale = t
            .tasks
            .claim(NewTask::running(cert.id, TaskType::Issue, TriggerType::Manual))
            .await
            .unwrap();

        let scheduler = Arc::new(RenewalScheduler::new(
            t.engine.clone(),
            Duration::from_secs(3600),
        ));
        scheduler.start().await.unwrap();
        scheduler.start().await.unwrap();
        assert!(scheduler.is_running().await);

        let stale = t.tasks.get(stale.id).await.unwrap().unwrap();
        assert_eq!(stale.status, TaskStatus::Failed);
        assert_eq!(stale.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));

        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
        // stopping twice is harmless
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_no_cycle_after_stop() {
        let t = TestEngine::builder().build();
        let scheduler = Arc::new(RenewalScheduler::new(
            t.engine.clone(),
            Duration::from_millis(20),
        ));
        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop().await;

        // A certificate that becomes due after stop is never picked up
        due_certificate(&t, "late.example.com").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(t.acme.calls(), 0);
        assert!(t.tasks.list_by_certificate(1, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_runs_first_cycle_immediately() {
        let t = TestEngine::builder().build();
        let due = due_certificate(&t, "due.example.com").await;

        let scheduler = Arc::new(RenewalScheduler::new(
            t.engine.clone(),
            Duration::from_secs(3600),
        ));
        scheduler.start().await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        let task = loop {
            if let Some(task) = t.tasks.latest(due, Some(TaskType::Renew)).await.unwrap() {
                break task;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "no renewal dispatched before the first interval"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert_eq!(task.trigger_type, TriggerType::Auto);

        let task = wait_for_task(t.tasks.as_ref(), task.id).await;
        assert_eq!(task.status, TaskStatus::Success);
        scheduler.stop().await;
        assert_eq!(t.acme.calls(), 1);
    }

    #[tokio::test]
    async fn test_stop_finishes_the_certificate_in_progress() {
        let t = TestEngine::builder()
            .cloud_delay(Duration::from_millis(200))
            .build();
        let mut ids = Vec::new();
        for domain in ["a.example.com", "b.example.com"] {
            let cert = t.certificates.create(new_cloud_certificate(domain)).await.unwrap();
            t.certificates.set_cloud_cert_id(cert.id, "order-1").await.unwrap();
            ids.push(cert.id);
        }
        let (first, second) = (ids[0], ids[1]);
        let issue = t
            .tasks
            .claim(NewTask::running(first, TaskType::Issue, TriggerType::Manual))
            .await
            .unwrap();
        t.deploy_configs
            .create(t.cluster_config(first, "edge", json!({})))
            .await
            .unwrap();
        t.cloud.issue(&["a.example.com", "b.example.com"]);

        let scheduler = Arc::new(RenewalScheduler::new(
            t.engine.clone(),
            Duration::from_secs(3600),
        ));
        scheduler.start().await.unwrap();
        // the first sync is now waiting on the vendor
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop().await;

        let task = t.tasks.get(issue.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Success);
        let synced = t.certificates.get(first).await.unwrap().unwrap();
        assert_eq!(synced.status, CertificateStatus::Active);
        assert_eq!(t.deployer.deployments().len(), 1);

        let untouched = t.certificates.get(second).await.unwrap().unwrap();
        assert_eq!(untouched.status, CertificateStatus::Pending);
    }
}
