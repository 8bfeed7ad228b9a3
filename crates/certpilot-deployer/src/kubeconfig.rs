//! Kubeconfig parsing
//!
//! Cluster credentials are stored as whole kubeconfig documents. Resolving
//! one picks a context (the requested one or `current-context`) and returns
//! the API server, CA bundle and client authentication for it. Only
//! embedded credentials are honoured: token, client certificate data and
//! basic auth. Exec plugins are rejected.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum KubeconfigError {
    #[error("Failed to parse kubeconfig YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("No current context set in kubeconfig")]
    NoCurrentContext,
    #[error("Context '{0}' not found")]
    ContextNotFound(String),
    #[error("Cluster '{0}' not found")]
    ClusterNotFound(String),
    #[error("User '{0}' not found")]
    UserNotFound(String),
    #[error("Failed to decode base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Unsupported authentication for user '{0}': {1}")]
    UnsupportedAuth(String, String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    pub current_context: Option<String>,
    #[serde(default)]
    pub clusters: Vec<NamedCluster>,
    #[serde(default)]
    pub contexts: Vec<NamedContext>,
    #[serde(default)]
    pub users: Vec<NamedUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: ClusterConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterConfig {
    pub server: String,
    pub certificate_authority_data: Option<String>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextConfig {
    pub cluster: String,
    pub user: String,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedUser {
    pub name: String,
    #[serde(default)]
    pub user: UserConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserConfig {
    pub token: Option<String>,
    pub client_certificate_data: Option<String>,
    pub client_key_data: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub exec: Option<serde_yaml::Value>,
    pub token_file: Option<String>,
}

#[derive(Clone)]
pub enum KubeAuth {
    Token(String),
    /// PEM certificate and key
    ClientCert { cert: Vec<u8>, key: Vec<u8> },
    Basic { username: String, password: String },
    None,
}

impl std::fmt::Debug for KubeAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KubeAuth::Token(_) => f.write_str("Token(<redacted>)"),
            KubeAuth::ClientCert { .. } => f.write_str("ClientCert(<redacted>)"),
            KubeAuth::Basic { username, .. } => write!(f, "Basic({})", username),
            KubeAuth::None => f.write_str("None"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedKubeConfig {
    pub server: String,
    /// PEM CA bundle
    pub ca_cert: Option<Vec<u8>>,
    pub auth: KubeAuth,
    pub namespace: Option<String>,
    pub insecure_skip_tls_verify: bool,
}

impl Kubeconfig {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, KubeconfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Resolves `context`, or `current-context` when `None`.
    pub fn resolve(&self, context: Option<&str>) -> Result<ResolvedKubeConfig, KubeconfigError> {
        let context_name = match context {
            Some(name) => name.to_string(),
            None => self
                .current_context
                .clone()
                .filter(|c| !c.is_empty())
                .ok_or(KubeconfigError::NoCurrentContext)?,
        };

        let context = self
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .map(|c| &c.context)
            .ok_or_else(|| KubeconfigError::ContextNotFound(context_name.clone()))?;
        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| KubeconfigError::ClusterNotFound(context.cluster.clone()))?;
        let user = self
            .users
            .iter()
            .find(|u| u.name == context.user)
            .map(|u| &u.user)
            .ok_or_else(|| KubeconfigError::UserNotFound(context.user.clone()))?;

        debug!(
            context = %context_name,
            cluster = %context.cluster,
            server = %cluster.server,
            "Resolved kubeconfig context"
        );

        let ca_cert = cluster
            .certificate_authority_data
            .as_deref()
            .map(|data| BASE64.decode(data.trim()))
            .transpose()?;

        Ok(ResolvedKubeConfig {
            server: cluster.server.trim_end_matches('/').to_string(),
            ca_cert,
            auth: resolve_auth(&context.user, user)?,
            namespace: context.namespace.clone(),
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
        })
    }
}

fn resolve_auth(name: &str, user: &UserConfig) -> Result<KubeAuth, KubeconfigError> {
    if let Some(token) = user.token.as_ref().filter(|t| !t.is_empty()) {
        return Ok(KubeAuth::Token(token.clone()));
    }

    if let (Some(cert), Some(key)) = (&user.client_certificate_data, &user.client_key_data) {
        return Ok(KubeAuth::ClientCert {
            cert: BASE64.decode(cert.trim())?,
            key: BASE64.decode(key.trim())?,
        });
    }

    if let (Some(username), Some(password)) = (&user.username, &user.password) {
        return Ok(KubeAuth::Basic {
            username: username.clone(),
            password: password.clone(),
        });
    }

    if user.exec.is_some() {
        return Err(KubeconfigError::UnsupportedAuth(
            name.to_string(),
            "exec credential plugins".to_string(),
        ));
    }
    if user.token_file.is_some() {
        return Err(KubeconfigError::UnsupportedAuth(
            name.to_string(),
            "token files; embed the token instead".to_string(),
        ));
    }

    Ok(KubeAuth::None)
}
