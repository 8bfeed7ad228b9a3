//! DNS provider error types

use crate::signing::SigningError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DnsError {
    #[error("DNS provider not found: {0}")]
    ProviderNotFound(i32),

    #[error("DNS provider {0} is disabled")]
    ProviderDisabled(i32),

    #[error("Invalid provider type: {0}")]
    InvalidProviderType(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Zone not found: {0}")]
    ZoneNotFound(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Connection test failed: {0}")]
    ConnectionFailed(String),

    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
}
