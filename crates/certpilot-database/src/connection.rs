//! Database connection management

use certpilot_core::{DatabaseConfig, ServiceError, ServiceResult};
use certpilot_migrations::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, SqlErr};
use std::sync::Arc;
use tracing::info;

pub type DbConnection = DatabaseConnection;

/// Connects and brings the schema up to date.
pub async fn establish_connection(config: &DatabaseConfig) -> ServiceResult<Arc<DbConnection>> {
    let mut opt = ConnectOptions::new(config.url.as_str());
    if config.url.contains(":memory:") {
        // every pooled connection would otherwise see its own empty database
        opt.max_connections(1).min_connections(1);
    } else {
        opt.max_connections(config.max_connections)
            .min_connections(config.min_connections);
    }
    opt.sqlx_logging(false);

    let db = Database::connect(opt)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    Migrator::up(&db, None)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    info!(
        "Database ready on {:?} backend, migrations applied",
        db.get_database_backend()
    );

    Ok(Arc::new(db))
}

/// True when the error comes from a unique constraint or unique index.
pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
