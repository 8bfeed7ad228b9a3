//! DNS provider service
//!
//! Manages the `dns_providers` rows:
//! - validating and encrypting credentials on create and update
//! - masking secrets on read
//! - building provider instances through a [`DnsProviderFactory`]
//! - recording connection test outcomes

use certpilot_core::{DBDateTime, SecretCodec};
use certpilot_entities::dns_providers;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder,
};
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::errors::DnsError;
use crate::providers::{
    mask_config, DefaultDnsProviderFactory, DnsChallengeProvider, DnsProviderFactory,
    DnsProviderType, ProviderCredentials,
};

#[derive(Clone)]
pub struct DnsProviderService {
    db: Arc<DatabaseConnection>,
    codec: Arc<dyn SecretCodec>,
    factory: Arc<dyn DnsProviderFactory>,
}

#[derive(Debug, Clone)]
pub struct CreateDnsProviderRequest {
    pub name: String,
    pub provider_type: DnsProviderType,
    /// Plain credentials JSON, encrypted before it is stored
    pub config: Value,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateDnsProviderRequest {
    pub name: Option<String>,
    pub config: Option<Value>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub enabled: Option<bool>,
}

/// Provider row without its credentials
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DnsProviderInfo {
    pub id: i32,
    pub name: String,
    pub provider_type: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub enabled: bool,
    pub last_test_ok: Option<bool>,
    pub last_test_at: Option<DBDateTime>,
    pub created_at: DBDateTime,
    pub updated_at: DBDateTime,
}

impl From<dns_providers::Model> for DnsProviderInfo {
    fn from(model: dns_providers::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            provider_type: model.provider_type,
            email: model.email,
            phone: model.phone,
            enabled: model.enabled,
            last_test_ok: model.last_test_ok,
            last_test_at: model.last_test_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

impl DnsProviderService {
    pub fn new(db: Arc<DatabaseConnection>, codec: Arc<dyn SecretCodec>) -> Self {
        Self {
            db,
            codec,
            factory: Arc::new(DefaultDnsProviderFactory),
        }
    }

    pub fn with_factory(mut self, factory: Arc<dyn DnsProviderFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub async fn create(
        &self,
        request: CreateDnsProviderRequest,
    ) -> Result<DnsProviderInfo, DnsError> {
        if request.name.trim().is_empty() {
            return Err(DnsError::Validation("provider name is required".to_string()));
        }
        debug!(
            "Creating DNS provider: {} ({})",
            request.name, request.provider_type
        );

        ProviderCredentials::parse(request.provider_type, &request.config)?;
        let encrypted = self.encrypt_config(&request.config)?;

        let provider = dns_providers::ActiveModel {
            name: Set(request.name),
            provider_type: Set(request.provider_type.to_string()),
            config: Set(encrypted),
            email: Set(request.email),
            phone: Set(request.phone),
            enabled: Set(request.enabled),
            ..Default::default()
        };

        let result = provider.insert(self.db.as_ref()).await?;
        info!("Created DNS provider with id: {}", result.id);

        Ok(result.into())
    }

    pub async fn get(&self, id: i32) -> Result<DnsProviderInfo, DnsError> {
        Ok(self.find(id).await?.into())
    }

    pub async fn list(&self) -> Result<Vec<DnsProviderInfo>, DnsError> {
        let providers = dns_providers::Entity::find()
            .order_by_asc(dns_providers::Column::Id)
            .all(self.db.as_ref())
            .await?;
        Ok(providers.into_iter().map(Into::into).collect())
    }

    pub async fn list_enabled(&self) -> Result<Vec<DnsProviderInfo>, DnsError> {
        let providers = dns_providers::Entity::find()
            .filter(dns_providers::Column::Enabled.eq(true))
            .order_by_asc(dns_providers::Column::Id)
            .all(self.db.as_ref())
            .await?;
        Ok(providers.into_iter().map(Into::into).collect())
    }

    pub async fn update(
        &self,
        id: i32,
        request: UpdateDnsProviderRequest,
    ) -> Result<DnsProviderInfo, DnsError> {
        let provider = self.find(id).await?;
        let provider_type = DnsProviderType::from_str(&provider.provider_type)?;

        let mut active_model: dns_providers::ActiveModel = provider.into();

        if let Some(name) = request.name {
            if name.trim().is_empty() {
                return Err(DnsError::Validation("provider name is required".to_string()));
            }
            active_model.name = Set(name);
        }

        if let Some(config) = request.config {
            ProviderCredentials::parse(provider_type, &config)?;
            active_model.config = Set(self.encrypt_config(&config)?);
        }

        if let Some(email) = request.email {
            active_model.email = Set(Some(email));
        }

        if let Some(phone) = request.phone {
            active_model.phone = Set(Some(phone));
        }

        if let Some(enabled) = request.enabled {
            active_model.enabled = Set(enabled);
        }

        let result = active_model.update(self.db.as_ref()).await?;
        debug!("Updated DNS provider with id: {}", id);

        Ok(result.into())
    }

    pub async fn delete(&self, id: i32) -> Result<(), DnsError> {
        let provider = self.find(id).await?;

        dns_providers::Entity::delete_by_id(provider.id)
            .exec(self.db.as_ref())
            .await?;

        info!("Deleted DNS provider with id: {}", id);
        Ok(())
    }

    /// Stored credentials with secret-like fields masked
    pub async fn masked_config(&self, id: i32) -> Result<Value, DnsError> {
        let provider = self.find(id).await?;
        Ok(mask_config(&self.decrypt_config(&provider)?))
    }

    /// Builds the provider for `id`; disabled providers are refused.
    pub async fn build_provider(
        &self,
        id: i32,
    ) -> Result<Arc<dyn DnsChallengeProvider>, DnsError> {
        let provider = self.find(id).await?;
        if !provider.enabled {
            return Err(DnsError::ProviderDisabled(id));
        }
        self.instantiate(&provider)
    }

    /// Runs the provider's connection test and records the outcome.
    pub async fn test_provider(&self, id: i32) -> Result<(), DnsError> {
        let provider = self.find(id).await?;

        let outcome = match self.instantiate(&provider) {
            Ok(instance) => instance.test_connection().await,
            Err(e) => Err(e),
        };

        let mut active_model: dns_providers::ActiveModel = provider.into();
        active_model.last_test_ok = Set(Some(outcome.is_ok()));
        active_model.last_test_at = Set(Some(chrono::Utc::now()));
        active_model.update(self.db.as_ref()).await?;

        match &outcome {
            Ok(()) => info!("DNS provider {} connection test passed", id),
            Err(e) => warn!("DNS provider {} connection test failed: {}", id, e),
        }
        outcome
    }

    /// Tests credentials that are not stored yet
    pub async fn test_config(
        &self,
        provider_type: DnsProviderType,
        config: &Value,
    ) -> Result<(), DnsError> {
        let instance = self.factory.create(provider_type, config)?;
        instance.test_connection().await
    }

    async fn find(&self, id: i32) -> Result<dns_providers::Model, DnsError> {
        dns_providers::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or(DnsError::ProviderNotFound(id))
    }

    fn instantiate(
        &self,
        provider: &dns_providers::Model,
    ) -> Result<Arc<dyn DnsChallengeProvider>, DnsError> {
        let provider_type = DnsProviderType::from_str(&provider.provider_type)?;
        let config = self.decrypt_config(provider)?;
        self.factory.create(provider_type, &config)
    }

    fn encrypt_config(&self, config: &Value) -> Result<String, DnsError> {
        let json = serde_json::to_string(config)?;
        self.codec
            .encode(&json)
            .map_err(|e| DnsError::Encryption(e.to_string()))
    }

    fn decrypt_config(&self, provider: &dns_providers::Model) -> Result<Value, DnsError> {
        let json = self
            .codec
            .decode(&provider.config)
            .map_err(|e| DnsError::Decryption(e.to_string()))?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use certpilot_core::EncryptionService;
    use certpilot_database::test_utils::create_test_db;
    use serde_json::json;

    /// Fails its connection test when the config carries `"fail": true`
    struct FakeProvider {
        provider_type: DnsProviderType,
        fail: bool,
    }

    #[async_trait]
    impl DnsChallengeProvider for FakeProvider {
        fn provider_type(&self) -> DnsProviderType {
            self.provider_type
        }

        async fn create_txt_record(&self, _: &str, _: &str, _: &str) -> Result<(), DnsError> {
            Ok(())
        }

        async fn delete_txt_record(&self, _: &str, _: &str) -> Result<(), DnsError> {
            Ok(())
        }

        async fn test_connection(&self) -> Result<(), DnsError> {
            if self.fail {
                Err(DnsError::ConnectionFailed("invalid access key".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct FakeFactory;

    impl DnsProviderFactory for FakeFactory {
        fn create(
            &self,
            provider_type: DnsProviderType,
            config: &Value,
        ) -> Result<Arc<dyn DnsChallengeProvider>, DnsError> {
            Ok(Arc::new(FakeProvider {
                provider_type,
                fail: config.get("fail").and_then(Value::as_bool).unwrap_or(false),
            }))
        }
    }

    async fn service() -> DnsProviderService {
        let db = create_test_db().await.unwrap();
        let codec = Arc::new(EncryptionService::new(&EncryptionService::generate_key()).unwrap());
        DnsProviderService::new(db, codec).with_factory(Arc::new(FakeFactory))
    }

    fn aliyun_request(config: Value) -> CreateDnsProviderRequest {
        CreateDnsProviderRequest {
            name: "aliyun-main".to_string(),
            provider_type: DnsProviderType::Aliyun,
            config,
            email: Some("ops@example.com".to_string()),
            phone: None,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_create_encrypts_and_masks() {
        let service = service().await;
        let created = service
            .create(aliyun_request(json!({
                "access_key_id": "LTAI5tExample",
                "access_key_secret": "verysecretvalue",
            })))
            .await
            .unwrap();

        let row = dns_providers::Entity::find_by_id(created.id)
            .one(service.db.as_ref())
            .await
            .unwrap()
            .unwrap();
        assert!(!row.config.contains("verysecretvalue"));

        let masked = service.masked_config(created.id).await.unwrap();
        assert_eq!(masked["access_key_id"], "LTAI****");
        assert_eq!(masked["access_key_secret"], "very****");
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_credentials() {
        let service = service().await;
        let err = service
            .create(aliyun_request(json!({"access_key_id": "LTAI"})))
            .await
            .unwrap_err();
        assert!(matches!(err, DnsError::InvalidCredentials(_)));
        assert!(service.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_revalidates_config_against_stored_type() {
        let service = service().await;
        let created = service
            .create(aliyun_request(json!({
                "access_key_id": "ak",
                "access_key_secret": "sk",
            })))
            .await
            .unwrap();

        let err = service
            .update(
                created.id,
                UpdateDnsProviderRequest {
                    config: Some(json!({"api_token": "cloudflare-style"})),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DnsError::InvalidCredentials(_)));

        let updated = service
            .update(
                created.id,
                UpdateDnsProviderRequest {
                    name: Some("renamed".to_string()),
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "renamed");
        assert!(!updated.enabled);
        assert!(service.list_enabled().await.unwrap().is_empty());
        assert_eq!(service.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_build_provider_refuses_disabled() {
        let service = service().await;
        let mut request = aliyun_request(json!({"access_key_id": "ak", "access_key_secret": "sk"}));
        request.enabled = false;
        let created = service.create(request).await.unwrap();

        assert!(matches!(
            service.build_provider(created.id).await,
            Err(DnsError::ProviderDisabled(id)) if id == created.id
        ));
        assert!(matches!(
            service.build_provider(9999).await,
            Err(DnsError::ProviderNotFound(9999))
        ));
    }

    #[tokio::test]
    async fn test_test_provider_records_outcome() {
        let service = service().await;
        let good = service
            .create(aliyun_request(json!({"access_key_id": "ak", "access_key_secret": "sk"})))
            .await
            .unwrap();
        let bad = service
            .create(aliyun_request(json!({
                "access_key_id": "ak",
                "access_key_secret": "sk",
                "fail": true,
            })))
            .await
            .unwrap();

        service.test_provider(good.id).await.unwrap();
        let err = service.test_provider(bad.id).await.unwrap_err();
        assert!(err.to_string().contains("invalid access key"));

        let good = service.get(good.id).await.unwrap();
        let bad = service.get(bad.id).await.unwrap();
        assert_eq!(good.last_test_ok, Some(true));
        assert_eq!(bad.last_test_ok, Some(false));
        assert!(bad.last_test_at.is_some());
    }

    #[tokio::test]
    async fn test_delete() {
        let service = service().await;
        let created = service
            .create(aliyun_request(json!({"access_key_id": "ak", "access_key_secret": "sk"})))
            .await
            .unwrap();
        service.delete(created.id).await.unwrap();
        assert!(matches!(
            service.get(created.id).await,
            Err(DnsError::ProviderNotFound(_))
        ));
    }
}
