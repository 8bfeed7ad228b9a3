//! Database migrations for certpilot

pub use sea_orm_migration::prelude::*;

mod migration;
pub use migration::Migrator;

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{ConnectOptions, ConnectionTrait, Database, DbBackend, Statement};

    async fn migrated() -> anyhow::Result<sea_orm::DatabaseConnection> {
        let mut opt = ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1).min_connections(1);
        let db = Database::connect(opt).await?;
        Migrator::up(&db, None).await?;
        Ok(db)
    }

    #[tokio::test]
    async fn test_migrations_create_tables() -> anyhow::Result<()> {
        let db = migrated().await?;
        for table in ["certificates", "renew_tasks", "deploy_configs", "dns_providers"] {
            let row = db
                .query_one(Statement::from_string(
                    DbBackend::Sqlite,
                    format!(
                        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = '{}'",
                        table
                    ),
                ))
                .await?;
            assert!(row.is_some(), "missing table {}", table);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_in_flight_index_rejects_second_running_task() -> anyhow::Result<()> {
        let db = migrated().await?;
        db.execute_unprepared(
            "INSERT INTO certificates (name, domain, san_domains, source_type, ca_provider, key_algorithm, status, auto_renew, renew_days_before) \
             VALUES ('c', 'example.com', '[]', 'acme', 'letsencrypt', 'ec256', 'pending', 1, 30)",
        )
        .await?;
        db.execute_unprepared(
            "INSERT INTO renew_tasks (certificate_id, task_type, status, trigger_type) VALUES (1, 'issue', 'running', 'manual')",
        )
        .await?;

        let duplicate = db
            .execute_unprepared(
                "INSERT INTO renew_tasks (certificate_id, task_type, status, trigger_type) VALUES (1, 'renew', 'pending', 'auto')",
            )
            .await;
        assert!(duplicate.is_err());

        // Finished tasks do not count towards the in-flight bound
        db.execute_unprepared("UPDATE renew_tasks SET status = 'failed' WHERE id = 1")
            .await?;
        db.execute_unprepared(
            "INSERT INTO renew_tasks (certificate_id, task_type, status, trigger_type) VALUES (1, 'renew', 'pending', 'auto')",
        )
        .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_down_drops_everything() -> anyhow::Result<()> {
        let db = migrated().await?;
        Migrator::down(&db, None).await?;
        let row = db
            .query_one(Statement::from_string(
                DbBackend::Sqlite,
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'certificates'"
                    .to_string(),
            ))
            .await?;
        assert!(row.is_none());
        Ok(())
    }
}
