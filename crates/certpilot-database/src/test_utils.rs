//! Test utilities for database-backed tests
//!
//! Every call returns a fresh in-memory sqlite database with all migrations
//! applied, so tests never share state.

use crate::DbConnection;
use certpilot_migrations::Migrator;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;

pub async fn create_test_db() -> anyhow::Result<Arc<DbConnection>> {
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).min_connections(1).sqlx_logging(false);

    let db = Database::connect(opt).await?;
    Migrator::up(&db, None).await?;
    Ok(Arc::new(db))
}
