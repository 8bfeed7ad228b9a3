use certpilot_deployer::DeployError;
use certpilot_dns::signing::SigningError;
use certpilot_dns::DnsError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CertificateError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("DNS provider error: {0}")]
    Provider(#[from] DnsError),

    #[error("ACME error: {0}")]
    Acme(#[from] AcmeError),

    #[error("Cloud CA error: {0}")]
    CloudCa(#[from] CloudCaError),

    #[error("Deploy error: {0}")]
    Deploy(#[from] DeployError),

    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Repository error: {0}")]
    Repository(RepositoryError),

    #[error("Invalid certificate: {0}")]
    Parse(#[from] CertificateParseError),
}

impl From<RepositoryError> for CertificateError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(msg) => CertificateError::NotFound(msg),
            RepositoryError::Conflict(msg) => CertificateError::ConcurrencyConflict(msg),
            other => CertificateError::Repository(other),
        }
    }
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Illegal task transition: {0}")]
    IllegalTransition(String),

    #[error("Encryption error: {0}")]
    Encryption(String),
}

impl From<sea_orm::DbErr> for RepositoryError {
    fn from(err: sea_orm::DbErr) -> Self {
        if certpilot_database::is_unique_violation(&err) {
            return RepositoryError::Conflict(err.to_string());
        }
        match err {
            sea_orm::DbErr::RecordNotFound(msg) => RepositoryError::NotFound(msg),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::InvalidData(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum AcmeError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Account registration failed: {0}")]
    Registration(String),

    #[error("{0}")]
    Protocol(String),

    #[error("Challenge failed: {0}")]
    Challenge(String),

    #[error("DNS provider error: {0}")]
    Dns(#[from] DnsError),

    #[error("Obtain certificate cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid certificate: {0}")]
    Parse(#[from] CertificateParseError),
}

impl From<instant_acme::Error> for AcmeError {
    fn from(err: instant_acme::Error) -> Self {
        AcmeError::Protocol(err.to_string())
    }
}

impl From<rcgen::Error> for AcmeError {
    fn from(err: rcgen::Error) -> Self {
        AcmeError::KeyGeneration(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum CloudCaError {
    #[error("Unsupported cloud vendor: {0}")]
    UnsupportedVendor(String),

    #[error("Cloud account not found: {0}")]
    AccountNotFound(i32),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Cloud CA call timed out: {0}")]
    Timeout(String),

    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// PEM that could not be read as an X.509 certificate
#[derive(Error, Debug)]
#[error("{0}")]
pub struct CertificateParseError(pub String);
