use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

// Partial unique index: at most one pending/running task per certificate.
// Both sqlite and postgres accept the same statement.
const CREATE_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS idx_renew_tasks_one_in_flight \
     ON renew_tasks (certificate_id) WHERE status IN ('pending', 'running')";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(CREATE_INDEX)
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP INDEX IF EXISTS idx_renew_tasks_one_in_flight")
            .await?;
        Ok(())
    }
}
