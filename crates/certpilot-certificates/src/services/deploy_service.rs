use certpilot_deployer::validate_target_config;
use std::sync::Arc;
use tracing::info;

use crate::engine::CertificateEngine;
use crate::errors::CertificateError;
use crate::models::*;

pub struct DeployService {
    engine: Arc<CertificateEngine>,
}

impl DeployService {
    pub fn new(engine: Arc<CertificateEngine>) -> Self {
        Self { engine }
    }

    pub async fn create_deploy_config(
        &self,
        new: NewDeployConfig,
    ) -> Result<DeployConfig, CertificateError> {
        if new.name.trim().is_empty() {
            return Err(CertificateError::Validation("name is required".to_string()));
        }
        self.engine.load_certificate(new.certificate_id).await?;
        validate_target_config(new.deploy_type, &new.target_config)?;

        let config = self.engine.deploy_configs().create(new).await?;
        info!(
            "Created {} deploy config '{}' for certificate {}",
            config.deploy_type, config.name, config.certificate_id
        );
        Ok(config)
    }

    pub async fn get_deploy_config(&self, id: i32) -> Result<DeployConfig, CertificateError> {
        self.engine
            .deploy_configs()
            .get(id)
            .await?
            .ok_or_else(|| CertificateError::NotFound(format!("deploy config {}", id)))
    }

    pub async fn list_deploy_configs(
        &self,
        certificate_id: i32,
    ) -> Result<Vec<DeployConfig>, CertificateError> {
        Ok(self
            .engine
            .deploy_configs()
            .list_by_certificate(certificate_id)
            .await?)
    }

    pub async fn update_deploy_config(
        &self,
        id: i32,
        update: DeployConfigUpdate,
    ) -> Result<DeployConfig, CertificateError> {
        let existing = self.get_deploy_config(id).await?;
        if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(CertificateError::Validation("name cannot be empty".to_string()));
        }
        if let Some(target_config) = &update.target_config {
            validate_target_config(existing.deploy_type, target_config)?;
        }
        Ok(self.engine.deploy_configs().update(id, update).await?)
    }

    pub async fn delete_deploy_config(&self, id: i32) -> Result<(), CertificateError> {
        Ok(self.engine.deploy_configs().delete(id).await?)
    }

    /// Deploys now under a manual `deploy` task. The outcome is recorded on
    /// the config and the task; a failed deploy is also returned.
    pub async fn execute_deploy(&self, id: i32) -> Result<RenewTask, CertificateError> {
        let config = self.get_deploy_config(id).await?;
        let certificate = self.engine.load_certificate(config.certificate_id).await?;
        if certificate.material().is_none() {
            return Err(CertificateError::Validation(
                "certificate has not been issued yet".to_string(),
            ));
        }

        let tasks = self.engine.tasks();
        let claimed = tasks
            .claim(NewTask::pending(
                certificate.id,
                TaskType::Deploy,
                TriggerType::Manual,
            ))
            .await?;
        let task = tasks
            .transition(claimed.id, TaskStatus::Running, None, None)
            .await?;

        match self.engine.deploy_config(&certificate, &config).await {
            Ok(()) => {
                let result = TaskResult {
                    deployed_to: Some(vec![config.name.clone()]),
                    ..TaskResult::succeeded(format!("deployed to {}", config.name))
                };
                Ok(tasks
                    .transition(task.id, TaskStatus::Success, None, Some(result))
                    .await?)
            }
            Err(e) => {
                let message = e.to_string();
                let result = TaskResult {
                    deploy_errors: Some(vec![format!("{}: {}", config.name, message)]),
                    ..TaskResult::failed(message.clone())
                };
                tasks
                    .transition(task.id, TaskStatus::Failed, Some(message), Some(result))
                    .await?;
                Err(e)
            }
        }
    }

    /// Checks the target is reachable without deploying.
    pub async fn test_deploy_config(&self, id: i32) -> Result<(), CertificateError> {
        let config = self.get_deploy_config(id).await?;
        let target = self.engine.deployers().create(config.deploy_type)?;
        target.test(&config.target_config).await?;
        Ok(())
    }
}
