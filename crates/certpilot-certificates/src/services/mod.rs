//! Operator-facing operations over the engine

pub mod certificate_service;
pub mod deploy_service;
pub mod task_service;

pub use certificate_service::{
    CertificateContent, CertificateService, CertificateStats, CreateCertificateRequest,
    CreatedCertificate, ImportCertificateRequest,
};
pub use deploy_service::DeployService;
pub use task_service::TaskService;
