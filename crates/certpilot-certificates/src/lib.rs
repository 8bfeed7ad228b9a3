//! Certificate lifecycle engine
//!
//! Issues certificates through ACME (DNS-01) or a cloud CA, renews them
//! before they expire and pushes renewed material to the configured deploy
//! targets. Every issuance is recorded as a task, and a certificate has at
//! most one pending or running task at a time.

pub mod acme;
pub mod cloud;
pub mod engine;
pub mod errors;
pub mod ledger;
pub mod models;
pub mod repository;
pub mod scheduler;
pub mod services;
pub mod test_utils;
pub mod x509;

pub use acme::{AcmeClient, AcmeOrchestrator, AcmeRequest, InstantAcmeClient};
pub use cloud::{
    AliyunCasCredentials, AliyunCasProvider, CloudCaDirectory, CloudCaProvider, CloudVendor,
    InventoryCloudDirectory,
};
pub use engine::{
    CertificateEngine, ChallengeProviders, CloudSyncOutcome, DeployReport, Dispatched, EngineDeps,
    EngineSettings, INTERRUPTED_MESSAGE,
};
pub use errors::{AcmeError, CertificateError, CloudCaError, RepositoryError};
pub use models::*;
pub use repository::{
    CertificateRepository, DefaultCertificateRepository, DefaultDeployConfigRepository,
    DefaultTaskRepository, DeployConfigRepository, TaskRepository,
};
pub use scheduler::{CycleReport, RenewalScheduler};
pub use services::{
    CertificateContent, CertificateService, CertificateStats, CreateCertificateRequest,
    CreatedCertificate, DeployService, ImportCertificateRequest, TaskService,
};
