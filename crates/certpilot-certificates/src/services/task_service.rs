use std::sync::Arc;

use crate::errors::CertificateError;
use crate::models::*;
use crate::repository::TaskRepository;

const DEFAULT_HISTORY_LIMIT: u64 = 10;

pub struct TaskService {
    tasks: Arc<dyn TaskRepository>,
}

impl TaskService {
    pub fn new(tasks: Arc<dyn TaskRepository>) -> Self {
        Self { tasks }
    }

    pub async fn get_task(&self, id: i32) -> Result<RenewTask, CertificateError> {
        self.tasks
            .get(id)
            .await?
            .ok_or_else(|| CertificateError::NotFound(format!("task {}", id)))
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Page<RenewTask>, CertificateError> {
        Ok(self.tasks.list(filter).await?)
    }

    /// Newest first, ten unless `limit` says otherwise
    pub async fn list_tasks_by_certificate(
        &self,
        certificate_id: i32,
        limit: Option<u64>,
    ) -> Result<Vec<RenewTask>, CertificateError> {
        Ok(self
            .tasks
            .list_by_certificate(certificate_id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
            .await?)
    }

    pub async fn latest_task(
        &self,
        certificate_id: i32,
        task_type: Option<TaskType>,
    ) -> Result<Option<RenewTask>, CertificateError> {
        Ok(self.tasks.latest(certificate_id, task_type).await?)
    }
}
