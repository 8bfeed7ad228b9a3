//! Database connection and query utilities

pub use sea_orm;
mod connection;

pub use connection::{establish_connection, is_unique_violation, DbConnection};

// Shared by other crates' tests
pub mod test_utils;

#[cfg(test)]
mod tests {
    use super::*;
    use certpilot_core::DatabaseConfig;
    use sea_orm::{ConnectionTrait, DbBackend, Statement};

    #[tokio::test]
    async fn test_establish_connection_runs_migrations() -> anyhow::Result<()> {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 10,
            min_connections: 2,
        };
        let db = establish_connection(&config).await?;

        let row = db
            .query_one(Statement::from_string(
                DbBackend::Sqlite,
                "SELECT COUNT(*) AS n FROM renew_tasks".to_string(),
            ))
            .await?;
        assert!(row.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_establish_connection_rejects_bad_url() {
        let config = DatabaseConfig {
            url: "nosuchdriver://nowhere".to_string(),
            ..Default::default()
        };
        let err = establish_connection(&config).await.unwrap_err();
        assert!(matches!(err, certpilot_core::ServiceError::Database(_)));
    }

    #[tokio::test]
    async fn test_unique_violation_detection() -> anyhow::Result<()> {
        let db = test_utils::create_test_db().await?;
        db.execute_unprepared(
            "INSERT INTO certificates (name, domain, san_domains, source_type, ca_provider, key_algorithm, status, auto_renew, renew_days_before) \
             VALUES ('c', 'example.com', '[]', 'acme', 'letsencrypt', 'ec256', 'pending', 1, 30)",
        )
        .await?;
        let insert = "INSERT INTO renew_tasks (certificate_id, task_type, status, trigger_type) VALUES (1, 'renew', 'pending', 'auto')";
        db.execute_unprepared(insert).await?;

        let err = db.execute_unprepared(insert).await.unwrap_err();
        assert!(is_unique_violation(&err));
        assert!(!is_unique_violation(&sea_orm::DbErr::Custom("x".into())));
        Ok(())
    }
}
