//! Persistence for certificates, tasks and deploy configs
//!
//! Each store is a trait with a sea-orm implementation here and an in-memory
//! one in [`crate::test_utils`]. Private keys pass through the injected
//! [`SecretCodec`] on the way in and out; nothing above this layer sees
//! ciphertext.

use async_trait::async_trait;
use certpilot_core::{now, SecretCodec, UtcDateTime};
use certpilot_database::DbConnection;
use certpilot_entities::{certificates, deploy_configs, renew_tasks};
use sea_orm::sea_query::Expr;
use sea_orm::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::errors::RepositoryError;
use crate::ledger;
use crate::models::*;

#[async_trait]
pub trait CertificateRepository: Send + Sync {
    async fn create(&self, new: NewCertificate) -> Result<Certificate, RepositoryError>;
    async fn get(&self, id: i32) -> Result<Option<Certificate>, RepositoryError>;
    async fn list(&self, filter: &CertificateFilter) -> Result<Page<Certificate>, RepositoryError>;
    async fn update(&self, id: i32, update: CertificateUpdate)
        -> Result<Certificate, RepositoryError>;
    async fn delete(&self, id: i32) -> Result<(), RepositoryError>;

    async fn update_status(
        &self,
        id: i32,
        status: CertificateStatus,
        last_error: Option<String>,
    ) -> Result<(), RepositoryError>;

    /// Stores issued material; also marks the certificate active, clears
    /// `last_error` and stamps `last_renew_at`.
    async fn update_material(
        &self,
        id: i32,
        issued: &IssuedCertificate,
    ) -> Result<(), RepositoryError>;

    async fn set_cloud_cert_id(&self, id: i32, cloud_cert_id: &str)
        -> Result<(), RepositoryError>;

    // The three scheduler queries below return rows without
    // `private_key_pem` and skip rows that fail to convert.

    /// Auto-renew certificates, not in error, whose renewal window has opened
    async fn list_expiring(&self, now: UtcDateTime) -> Result<Vec<Certificate>, RepositoryError>;

    /// Certificates whose status still follows from `not_after`
    async fn list_classifiable(&self) -> Result<Vec<Certificate>, RepositoryError>;

    /// Pending cloud certificates that already have a vendor id
    async fn list_pending_cloud(&self) -> Result<Vec<Certificate>, RepositoryError>;

    async fn count_by_status(&self) -> Result<HashMap<String, u64>, RepositoryError>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Inserts a task unless the certificate already has one pending or
    /// running, in which case [`RepositoryError::Conflict`] is returned.
    async fn claim(&self, task: NewTask) -> Result<RenewTask, RepositoryError>;
    async fn get(&self, id: i32) -> Result<Option<RenewTask>, RepositoryError>;
    async fn list(&self, filter: &TaskFilter) -> Result<Page<RenewTask>, RepositoryError>;
    async fn list_by_certificate(
        &self,
        certificate_id: i32,
        limit: u64,
    ) -> Result<Vec<RenewTask>, RepositoryError>;
    async fn latest(
        &self,
        certificate_id: i32,
        task_type: Option<TaskType>,
    ) -> Result<Option<RenewTask>, RepositoryError>;
    async fn has_in_flight(&self, certificate_id: i32) -> Result<bool, RepositoryError>;

    /// Moves a task forward. Backward moves and changes to finished tasks
    /// are rejected with [`RepositoryError::IllegalTransition`].
    async fn transition(
        &self,
        id: i32,
        status: TaskStatus,
        error_message: Option<String>,
        result: Option<TaskResult>,
    ) -> Result<RenewTask, RepositoryError>;

    /// Replaces the result of an in-flight task without changing its status
    async fn record_progress(&self, id: i32, message: &str) -> Result<(), RepositoryError>;

    /// Finishes every in-flight task of `task_type` for a certificate.
    /// Success only applies to running tasks.
    async fn finish_in_flight(
        &self,
        certificate_id: i32,
        task_type: TaskType,
        status: TaskStatus,
        result: TaskResult,
    ) -> Result<u64, RepositoryError>;

    /// Fails every pending or running task, returning the tasks that were swept
    async fn fail_interrupted(&self, message: &str) -> Result<Vec<RenewTask>, RepositoryError>;
}

#[async_trait]
pub trait DeployConfigRepository: Send + Sync {
    async fn create(&self, new: NewDeployConfig) -> Result<DeployConfig, RepositoryError>;
    async fn get(&self, id: i32) -> Result<Option<DeployConfig>, RepositoryError>;
    async fn list_by_certificate(
        &self,
        certificate_id: i32,
    ) -> Result<Vec<DeployConfig>, RepositoryError>;
    /// Enabled configs with auto-deploy on, in creation order
    async fn list_auto_deploy(
        &self,
        certificate_id: i32,
    ) -> Result<Vec<DeployConfig>, RepositoryError>;
    async fn update(
        &self,
        id: i32,
        update: DeployConfigUpdate,
    ) -> Result<DeployConfig, RepositoryError>;
    async fn delete(&self, id: i32) -> Result<(), RepositoryError>;
    async fn record_result(
        &self,
        id: i32,
        ok: bool,
        error: Option<String>,
    ) -> Result<(), RepositoryError>;
}

pub struct DefaultCertificateRepository {
    db: Arc<DbConnection>,
    codec: Arc<dyn SecretCodec>,
}

impl DefaultCertificateRepository {
    pub fn new(db: Arc<DbConnection>, codec: Arc<dyn SecretCodec>) -> Self {
        Self { db, codec }
    }

    fn load(&self, model: certificates::Model) -> Result<Certificate, RepositoryError> {
        let mut cert = Certificate::try_from(model)?;
        cert.private_key_pem = match cert.private_key_pem.take().filter(|k| !k.is_empty()) {
            Some(encrypted) => Some(self.codec.decode(&encrypted).map_err(|e| {
                RepositoryError::Encryption(format!("Failed to decrypt private key: {}", e))
            })?),
            None => None,
        };
        Ok(cert)
    }

    fn load_all(
        &self,
        models: Vec<certificates::Model>,
    ) -> Result<Vec<Certificate>, RepositoryError> {
        models.into_iter().map(|m| self.load(m)).collect()
    }

    /// Converts rows for the scheduler without touching the private key.
    /// A row that fails to convert is logged and left out.
    fn summarize_all(models: Vec<certificates::Model>) -> Vec<Certificate> {
        models
            .into_iter()
            .filter_map(|model| {
                let id = model.id;
                match Certificate::try_from(model) {
                    Ok(mut cert) => {
                        cert.private_key_pem = None;
                        Some(cert)
                    }
                    Err(e) => {
                        warn!("Skipping unreadable certificate {}: {}", id, e);
                        None
                    }
                }
            })
            .collect()
    }

    async fn find_model(&self, id: i32) -> Result<certificates::Model, RepositoryError> {
        certificates::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("certificate {}", id)))
    }

    async fn update_columns(
        &self,
        id: i32,
        columns: Vec<(certificates::Column, sea_orm::Value)>,
    ) -> Result<(), RepositoryError> {
        let mut update = certificates::Entity::update_many()
            .col_expr(certificates::Column::UpdatedAt, Expr::value(now()))
            .filter(certificates::Column::Id.eq(id));
        for (column, value) in columns {
            update = update.col_expr(column, Expr::value(value));
        }
        let result = update.exec(self.db.as_ref()).await?;
        if result.rows_affected == 0 {
            return Err(RepositoryError::NotFound(format!("certificate {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl CertificateRepository for DefaultCertificateRepository {
    async fn create(&self, new: NewCertificate) -> Result<Certificate, RepositoryError> {
        let model = certificates::ActiveModel {
            name: Set(new.name),
            domain: Set(new.domain),
            san_domains: Set(serde_json::to_value(&new.san_domains)?),
            source_type: Set(new.source_type.to_string()),
            ca_provider: Set(new.ca_provider),
            key_algorithm: Set(new.key_algorithm.to_string()),
            dns_provider_id: Set(new.dns_provider_id),
            acme_email: Set(new.acme_email),
            cloud_account_id: Set(new.cloud_account_id),
            status: Set(new.status.to_string()),
            auto_renew: Set(new.auto_renew),
            renew_days_before: Set(new.renew_days_before),
            ..Default::default()
        };
        let inserted = model.insert(self.db.as_ref()).await?;
        self.load(inserted)
    }

    async fn get(&self, id: i32) -> Result<Option<Certificate>, RepositoryError> {
        certificates::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .map(|m| self.load(m))
            .transpose()
    }

    async fn list(&self, filter: &CertificateFilter) -> Result<Page<Certificate>, RepositoryError> {
        let mut query = certificates::Entity::find();
        if let Some(status) = filter.status {
            query = query.filter(certificates::Column::Status.eq(status.as_str()));
        }
        if let Some(source_type) = filter.source_type {
            query = query.filter(certificates::Column::SourceType.eq(source_type.as_str()));
        }
        if let Some(domain) = filter.domain.as_deref().filter(|d| !d.is_empty()) {
            query = query.filter(certificates::Column::Domain.contains(domain));
        }

        let (page, page_size) = normalize_page(filter.page, filter.page_size);
        let paginator = query
            .order_by_desc(certificates::Column::Id)
            .paginate(self.db.as_ref(), page_size);
        let total = paginator.num_items().await?;
        let models = paginator.fetch_page(page - 1).await?;

        Ok(Page {
            items: self.load_all(models)?,
            total,
            page,
            page_size,
        })
    }

    async fn update(
        &self,
        id: i32,
        update: CertificateUpdate,
    ) -> Result<Certificate, RepositoryError> {
        let mut active = self.find_model(id).await?.into_active_model();
        if let Some(name) = update.name {
            active.name = Set(name);
        }
        if let Some(auto_renew) = update.auto_renew {
            active.auto_renew = Set(auto_renew);
        }
        if let Some(days) = update.renew_days_before {
            active.renew_days_before = Set(days);
        }
        if let Some(provider_id) = update.dns_provider_id {
            active.dns_provider_id = Set(Some(provider_id));
        }
        if let Some(email) = update.acme_email {
            active.acme_email = Set(Some(email).filter(|e| !e.is_empty()));
        }
        let updated = active.update(self.db.as_ref()).await?;
        self.load(updated)
    }

    async fn delete(&self, id: i32) -> Result<(), RepositoryError> {
        let result = certificates::Entity::delete_by_id(id)
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected == 0 {
            return Err(RepositoryError::NotFound(format!("certificate {}", id)));
        }
        Ok(())
    }

    async fn update_status(
        &self,
        id: i32,
        status: CertificateStatus,
        last_error: Option<String>,
    ) -> Result<(), RepositoryError> {
        self.update_columns(
            id,
            vec![
                (certificates::Column::Status, status.as_str().into()),
                (certificates::Column::LastError, last_error.into()),
            ],
        )
        .await
    }

    async fn update_material(
        &self,
        id: i32,
        issued: &IssuedCertificate,
    ) -> Result<(), RepositoryError> {
        let encrypted_key = self.codec.encode(&issued.private_key_pem).map_err(|e| {
            RepositoryError::Encryption(format!("Failed to encrypt private key: {}", e))
        })?;
        let details = &issued.details;

        self.update_columns(
            id,
            vec![
                (
                    certificates::Column::CertificatePem,
                    Some(issued.certificate_pem.clone()).into(),
                ),
                (certificates::Column::PrivateKeyPem, Some(encrypted_key).into()),
                (certificates::Column::ChainPem, issued.chain_pem.clone().into()),
                (certificates::Column::NotBefore, Some(details.not_before).into()),
                (certificates::Column::NotAfter, Some(details.not_after).into()),
                (
                    certificates::Column::Fingerprint,
                    Some(details.fingerprint.clone()).into(),
                ),
                (certificates::Column::Issuer, Some(details.issuer.clone()).into()),
                (certificates::Column::Subject, Some(details.subject.clone()).into()),
                (
                    certificates::Column::Status,
                    CertificateStatus::Active.as_str().into(),
                ),
                (certificates::Column::LastError, Option::<String>::None.into()),
                (certificates::Column::LastRenewAt, Some(now()).into()),
            ],
        )
        .await
    }

    async fn set_cloud_cert_id(
        &self,
        id: i32,
        cloud_cert_id: &str,
    ) -> Result<(), RepositoryError> {
        self.update_columns(
            id,
            vec![(
                certificates::Column::CloudCertId,
                Some(cloud_cert_id.to_string()).into(),
            )],
        )
        .await
    }

    async fn list_expiring(&self, now: UtcDateTime) -> Result<Vec<Certificate>, RepositoryError> {
        let models = certificates::Entity::find()
            .filter(certificates::Column::AutoRenew.eq(true))
            .filter(certificates::Column::Status.ne(CertificateStatus::Error.as_str()))
            .filter(certificates::Column::NotAfter.is_not_null())
            .order_by_asc(certificates::Column::NotAfter)
            .all(self.db.as_ref())
            .await?;

        // renew_days_before differs per row, so the window is checked here
        Ok(Self::summarize_all(models)
            .into_iter()
            .filter(|c| ledger::is_due_for_renewal(c, now))
            .collect())
    }

    async fn list_classifiable(&self) -> Result<Vec<Certificate>, RepositoryError> {
        let models = certificates::Entity::find()
            .filter(certificates::Column::NotAfter.is_not_null())
            .filter(certificates::Column::Status.is_not_in([
                CertificateStatus::Expired.as_str(),
                CertificateStatus::Error.as_str(),
            ]))
            .all(self.db.as_ref())
            .await?;
        Ok(Self::summarize_all(models))
    }

    async fn list_pending_cloud(&self) -> Result<Vec<Certificate>, RepositoryError> {
        let models = certificates::Entity::find()
            .filter(certificates::Column::Status.eq(CertificateStatus::Pending.as_str()))
            .filter(certificates::Column::SourceType.eq(SourceType::Cloud.as_str()))
            .filter(certificates::Column::CloudCertId.is_not_null())
            .filter(certificates::Column::CloudCertId.ne(""))
            .all(self.db.as_ref())
            .await?;
        Ok(Self::summarize_all(models))
    }

    async fn count_by_status(&self) -> Result<HashMap<String, u64>, RepositoryError> {
        let rows: Vec<(String, i64)> = certificates::Entity::find()
            .select_only()
            .column(certificates::Column::Status)
            .column_as(certificates::Column::Id.count(), "count")
            .group_by(certificates::Column::Status)
            .into_tuple()
            .all(self.db.as_ref())
            .await?;
        Ok(rows
            .into_iter()
            .map(|(status, count)| (status, count.max(0) as u64))
            .collect())
    }
}

pub struct DefaultTaskRepository {
    db: Arc<DbConnection>,
}

impl DefaultTaskRepository {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    async fn find(&self, id: i32) -> Result<RenewTask, RepositoryError> {
        renew_tasks::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("task {}", id)))?
            .try_into()
    }
}

fn in_flight_statuses() -> [&'static str; 2] {
    [TaskStatus::Pending.as_str(), TaskStatus::Running.as_str()]
}

fn load_tasks(models: Vec<renew_tasks::Model>) -> Result<Vec<RenewTask>, RepositoryError> {
    models.into_iter().map(RenewTask::try_from).collect()
}

#[async_trait]
impl TaskRepository for DefaultTaskRepository {
    async fn claim(&self, task: NewTask) -> Result<RenewTask, RepositoryError> {
        if task.status.is_terminal() {
            return Err(RepositoryError::InvalidData(format!(
                "cannot claim a task in status {}",
                task.status
            )));
        }

        let started_at = (task.status == TaskStatus::Running).then(now);
        let model = renew_tasks::ActiveModel {
            certificate_id: Set(task.certificate_id),
            task_type: Set(task.task_type.to_string()),
            status: Set(task.status.to_string()),
            trigger_type: Set(task.trigger_type.to_string()),
            started_at: Set(started_at),
            ..Default::default()
        };

        // The partial unique index rejects a second in-flight row
        match model.insert(self.db.as_ref()).await {
            Ok(inserted) => inserted.try_into(),
            Err(e) if certpilot_database::is_unique_violation(&e) => {
                Err(RepositoryError::Conflict(format!(
                    "certificate {} already has a task in progress",
                    task.certificate_id
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: i32) -> Result<Option<RenewTask>, RepositoryError> {
        renew_tasks::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .map(RenewTask::try_from)
            .transpose()
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Page<RenewTask>, RepositoryError> {
        let mut query = renew_tasks::Entity::find();
        if let Some(id) = filter.certificate_id {
            query = query.filter(renew_tasks::Column::CertificateId.eq(id));
        }
        if let Some(task_type) = filter.task_type {
            query = query.filter(renew_tasks::Column::TaskType.eq(task_type.as_str()));
        }
        if let Some(status) = filter.status {
            query = query.filter(renew_tasks::Column::Status.eq(status.as_str()));
        }
        if let Some(trigger) = filter.trigger_type {
            query = query.filter(renew_tasks::Column::TriggerType.eq(trigger.as_str()));
        }

        let (page, page_size) = normalize_page(filter.page, filter.page_size);
        let paginator = query
            .order_by_desc(renew_tasks::Column::Id)
            .paginate(self.db.as_ref(), page_size);
        let total = paginator.num_items().await?;
        let models = paginator.fetch_page(page - 1).await?;

        Ok(Page {
            items: load_tasks(models)?,
            total,
            page,
            page_size,
        })
    }

    async fn list_by_certificate(
        &self,
        certificate_id: i32,
        limit: u64,
    ) -> Result<Vec<RenewTask>, RepositoryError> {
        let models = renew_tasks::Entity::find()
            .filter(renew_tasks::Column::CertificateId.eq(certificate_id))
            .order_by_desc(renew_tasks::Column::Id)
            .limit(limit.max(1))
            .all(self.db.as_ref())
            .await?;
        load_tasks(models)
    }

    async fn latest(
        &self,
        certificate_id: i32,
        task_type: Option<TaskType>,
    ) -> Result<Option<RenewTask>, RepositoryError> {
        let mut query =
            renew_tasks::Entity::find().filter(renew_tasks::Column::CertificateId.eq(certificate_id));
        if let Some(task_type) = task_type {
            query = query.filter(renew_tasks::Column::TaskType.eq(task_type.as_str()));
        }
        query
            .order_by_desc(renew_tasks::Column::Id)
            .one(self.db.as_ref())
            .await?
            .map(RenewTask::try_from)
            .transpose()
    }

    async fn has_in_flight(&self, certificate_id: i32) -> Result<bool, RepositoryError> {
        let count = renew_tasks::Entity::find()
            .filter(renew_tasks::Column::CertificateId.eq(certificate_id))
            .filter(renew_tasks::Column::Status.is_in(in_flight_statuses()))
            .count(self.db.as_ref())
            .await?;
        Ok(count > 0)
    }

    async fn transition(
        &self,
        id: i32,
        status: TaskStatus,
        error_message: Option<String>,
        result: Option<TaskResult>,
    ) -> Result<RenewTask, RepositoryError> {
        let current = self.find(id).await?;
        if !current.status.can_transition_to(status) {
            return Err(RepositoryError::IllegalTransition(format!(
                "task {} cannot move from {} to {}",
                id, current.status, status
            )));
        }

        let timestamp = now();
        let mut update = renew_tasks::Entity::update_many()
            .col_expr(renew_tasks::Column::Status, Expr::value(status.as_str()))
            .col_expr(renew_tasks::Column::UpdatedAt, Expr::value(timestamp))
            .filter(renew_tasks::Column::Id.eq(id))
            // compare-and-set against concurrent writers
            .filter(renew_tasks::Column::Status.eq(current.status.as_str()));

        if status == TaskStatus::Running && current.started_at.is_none() {
            update = update.col_expr(renew_tasks::Column::StartedAt, Expr::value(timestamp));
        }
        if status.is_terminal() {
            update = update.col_expr(renew_tasks::Column::FinishedAt, Expr::value(timestamp));
        }
        if let Some(message) = error_message {
            update = update.col_expr(renew_tasks::Column::ErrorMessage, Expr::value(message));
        }
        if let Some(result) = result {
            update = update.col_expr(
                renew_tasks::Column::Result,
                Expr::value(serde_json::to_value(result)?),
            );
        }

        let outcome = update.exec(self.db.as_ref()).await?;
        if outcome.rows_affected == 0 {
            return Err(RepositoryError::IllegalTransition(format!(
                "task {} changed concurrently",
                id
            )));
        }
        self.find(id).await
    }

    async fn record_progress(&self, id: i32, message: &str) -> Result<(), RepositoryError> {
        let result = serde_json::to_value(TaskResult {
            message: message.to_string(),
            ..Default::default()
        })?;
        renew_tasks::Entity::update_many()
            .col_expr(renew_tasks::Column::Result, Expr::value(result))
            .col_expr(renew_tasks::Column::UpdatedAt, Expr::value(now()))
            .filter(renew_tasks::Column::Id.eq(id))
            .filter(renew_tasks::Column::Status.is_in(in_flight_statuses()))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    async fn finish_in_flight(
        &self,
        certificate_id: i32,
        task_type: TaskType,
        status: TaskStatus,
        result: TaskResult,
    ) -> Result<u64, RepositoryError> {
        let from: Vec<&str> = match status {
            TaskStatus::Success => vec![TaskStatus::Running.as_str()],
            TaskStatus::Failed => in_flight_statuses().to_vec(),
            other => {
                return Err(RepositoryError::IllegalTransition(format!(
                    "{} is not a terminal status",
                    other
                )))
            }
        };

        let timestamp = now();
        let mut update = renew_tasks::Entity::update_many()
            .col_expr(renew_tasks::Column::Status, Expr::value(status.as_str()))
            .col_expr(renew_tasks::Column::FinishedAt, Expr::value(timestamp))
            .col_expr(renew_tasks::Column::UpdatedAt, Expr::value(timestamp))
            .col_expr(
                renew_tasks::Column::Result,
                Expr::value(serde_json::to_value(&result)?),
            )
            .filter(renew_tasks::Column::CertificateId.eq(certificate_id))
            .filter(renew_tasks::Column::TaskType.eq(task_type.as_str()))
            .filter(renew_tasks::Column::Status.is_in(from));
        if !result.success {
            update = update.col_expr(
                renew_tasks::Column::ErrorMessage,
                Expr::value(result.message.clone()),
            );
        }
        Ok(update.exec(self.db.as_ref()).await?.rows_affected)
    }

    async fn fail_interrupted(&self, message: &str) -> Result<Vec<RenewTask>, RepositoryError> {
        let running = renew_tasks::Entity::find()
            .filter(renew_tasks::Column::Status.is_in(in_flight_statuses()))
            .all(self.db.as_ref())
            .await?;
        if running.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i32> = running.iter().map(|t| t.id).collect();
        let timestamp = now();
        renew_tasks::Entity::update_many()
            .col_expr(
                renew_tasks::Column::Status,
                Expr::value(TaskStatus::Failed.as_str()),
            )
            .col_expr(renew_tasks::Column::ErrorMessage, Expr::value(message))
            .col_expr(
                renew_tasks::Column::Result,
                Expr::value(serde_json::to_value(TaskResult::failed(message))?),
            )
            .col_expr(renew_tasks::Column::FinishedAt, Expr::value(timestamp))
            .col_expr(renew_tasks::Column::UpdatedAt, Expr::value(timestamp))
            .filter(renew_tasks::Column::Id.is_in(ids))
            .filter(renew_tasks::Column::Status.is_in(in_flight_statuses()))
            .exec(self.db.as_ref())
            .await?;

        load_tasks(running)
    }
}

pub struct DefaultDeployConfigRepository {
    db: Arc<DbConnection>,
}

impl DefaultDeployConfigRepository {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    async fn find_model(&self, id: i32) -> Result<deploy_configs::Model, RepositoryError> {
        deploy_configs::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("deploy config {}", id)))
    }
}

fn load_configs(
    models: Vec<deploy_configs::Model>,
) -> Result<Vec<DeployConfig>, RepositoryError> {
    models.into_iter().map(DeployConfig::try_from).collect()
}

#[async_trait]
impl DeployConfigRepository for DefaultDeployConfigRepository {
    async fn create(&self, new: NewDeployConfig) -> Result<DeployConfig, RepositoryError> {
        let model = deploy_configs::ActiveModel {
            certificate_id: Set(new.certificate_id),
            name: Set(new.name),
            deploy_type: Set(new.deploy_type.to_string()),
            target_config: Set(new.target_config),
            auto_deploy: Set(new.auto_deploy),
            enabled: Set(new.enabled),
            ..Default::default()
        };
        model.insert(self.db.as_ref()).await?.try_into()
    }

    async fn get(&self, id: i32) -> Result<Option<DeployConfig>, RepositoryError> {
        deploy_configs::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .map(DeployConfig::try_from)
            .transpose()
    }

    async fn list_by_certificate(
        &self,
        certificate_id: i32,
    ) -> Result<Vec<DeployConfig>, RepositoryError> {
        let models = deploy_configs::Entity::find()
            .filter(deploy_configs::Column::CertificateId.eq(certificate_id))
            .order_by_asc(deploy_configs::Column::Id)
            .all(self.db.as_ref())
            .await?;
        load_configs(models)
    }

    async fn list_auto_deploy(
        &self,
        certificate_id: i32,
    ) -> Result<Vec<DeployConfig>, RepositoryError> {
        let models = deploy_configs::Entity::find()
            .filter(deploy_configs::Column::CertificateId.eq(certificate_id))
            .filter(deploy_configs::Column::Enabled.eq(true))
            .filter(deploy_configs::Column::AutoDeploy.eq(true))
            .order_by_asc(deploy_configs::Column::Id)
            .all(self.db.as_ref())
            .await?;
        load_configs(models)
    }

    async fn update(
        &self,
        id: i32,
        update: DeployConfigUpdate,
    ) -> Result<DeployConfig, RepositoryError> {
        let mut active = self.find_model(id).await?.into_active_model();
        if let Some(name) = update.name {
            active.name = Set(name);
        }
        if let Some(config) = update.target_config {
            active.target_config = Set(config);
        }
        if let Some(auto_deploy) = update.auto_deploy {
            active.auto_deploy = Set(auto_deploy);
        }
        if let Some(enabled) = update.enabled {
            active.enabled = Set(enabled);
        }
        active.update(self.db.as_ref()).await?.try_into()
    }

    async fn delete(&self, id: i32) -> Result<(), RepositoryError> {
        let result = deploy_configs::Entity::delete_by_id(id)
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected == 0 {
            return Err(RepositoryError::NotFound(format!("deploy config {}", id)));
        }
        Ok(())
    }

    async fn record_result(
        &self,
        id: i32,
        ok: bool,
        error: Option<String>,
    ) -> Result<(), RepositoryError> {
        let timestamp = now();
        let result = deploy_configs::Entity::update_many()
            .col_expr(deploy_configs::Column::LastDeployOk, Expr::value(Some(ok)))
            .col_expr(
                deploy_configs::Column::LastDeployAt,
                Expr::value(Some(timestamp)),
            )
            .col_expr(deploy_configs::Column::LastError, Expr::value(error))
            .col_expr(deploy_configs::Column::UpdatedAt, Expr::value(timestamp))
            .filter(deploy_configs::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected == 0 {
            return Err(RepositoryError::NotFound(format!("deploy config {}", id)));
        }
        Ok(())
    }
}
