//! Certificates entity
//!
//! One row per managed certificate. ACME rows reference a DNS provider,
//! cloud rows reference an inventory cloud account and carry the vendor's
//! order id. The private key column holds ciphertext only.

use async_trait::async_trait;
use certpilot_core::DBDateTime;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "certificates")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    /// Primary domain, may be a wildcard (`*.example.com`)
    pub domain: String,
    /// JSON array of additional names, in order
    pub san_domains: Json,
    /// acme, cloud or manual
    pub source_type: String,
    pub ca_provider: String,
    pub key_algorithm: String,
    pub dns_provider_id: Option<i32>,
    pub acme_email: Option<String>,
    pub cloud_account_id: Option<i32>,
    pub cloud_cert_id: Option<String>,
    /// pending, active, expiring, expired or error
    pub status: String,
    pub auto_renew: bool,
    pub renew_days_before: i32,
    pub certificate_pem: Option<String>,
    /// Encrypted PEM
    pub private_key_pem: Option<String>,
    pub chain_pem: Option<String>,
    pub not_before: Option<DBDateTime>,
    pub not_after: Option<DBDateTime>,
    pub fingerprint: Option<String>,
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub last_error: Option<String>,
    pub last_renew_at: Option<DBDateTime>,
    pub created_at: DBDateTime,
    pub updated_at: DBDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::renew_tasks::Entity")]
    RenewTasks,
    #[sea_orm(has_many = "super::deploy_configs::Entity")]
    DeployConfigs,
    #[sea_orm(
        belongs_to = "super::dns_providers::Entity",
        from = "Column::DnsProviderId",
        to = "super::dns_providers::Column::Id"
    )]
    DnsProvider,
}

impl Related<super::renew_tasks::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RenewTasks.def()
    }
}

impl Related<super::deploy_configs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeployConfigs.def()
    }
}

impl Related<super::dns_providers::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DnsProvider.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = chrono::Utc::now();

        if insert {
            if self.created_at.is_not_set() {
                self.created_at = Set(now);
            }
            if self.updated_at.is_not_set() {
                self.updated_at = Set(now);
            }
        } else {
            self.updated_at = Set(now);
        }

        Ok(self)
    }
}
