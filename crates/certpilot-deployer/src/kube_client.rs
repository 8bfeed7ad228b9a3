//! Minimal Kubernetes REST client for TLS secrets and deployment restarts

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::kubeconfig::{KubeAuth, ResolvedKubeConfig};

pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Creates the `kubernetes.io/tls` secret or replaces its data.
    /// Existing labels are kept and `labels` win on conflict.
    async fn apply_tls_secret(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, Vec<u8>>,
        labels: BTreeMap<String, String>,
    ) -> Result<(), DeployError>;

    /// `None` when the secret does not exist
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, DeployError>;

    /// Triggers a rolling restart through the pod template annotation.
    async fn restart_deployment(&self, namespace: &str, name: &str) -> Result<(), DeployError>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Secret {
    #[serde(default)]
    api_version: Option<String>,
    #[serde(default)]
    kind: Option<String>,
    metadata: ObjectMeta,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    secret_type: Option<String>,
    #[serde(default)]
    data: BTreeMap<String, String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource_version: Option<String>,
}

pub struct KubeApiClient {
    client: Client,
    server: String,
    auth: KubeAuth,
}

impl KubeApiClient {
    pub fn new(config: &ResolvedKubeConfig) -> Result<Self, DeployError> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(30))
            .use_rustls_tls()
            .danger_accept_invalid_certs(config.insecure_skip_tls_verify);

        if let Some(ca) = &config.ca_cert {
            for cert in reqwest::Certificate::from_pem_bundle(ca)? {
                builder = builder.add_root_certificate(cert);
            }
        }

        if let KubeAuth::ClientCert { cert, key } = &config.auth {
            let mut identity_pem = cert.clone();
            if !identity_pem.ends_with(b"\n") {
                identity_pem.push(b'\n');
            }
            identity_pem.extend_from_slice(key);
            builder = builder.identity(reqwest::Identity::from_pem(&identity_pem)?);
        }

        Ok(Self {
            client: builder.build()?,
            server: config.server.trim_end_matches('/').to_string(),
            auth: config.auth.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self
            .client
            .request(method, format!("{}{}", self.server, path));
        match &self.auth {
            KubeAuth::Token(token) => request.bearer_auth(token),
            KubeAuth::Basic { username, password } => request.basic_auth(username, Some(password)),
            KubeAuth::ClientCert { .. } | KubeAuth::None => request,
        }
    }

    async fn send(request: RequestBuilder) -> Result<reqwest::Response, DeployError> {
        Self::check(request.send().await?).await
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, DeployError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(DeployError::Cluster {
            status: status.as_u16(),
            message,
        })
    }

    async fn fetch_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, DeployError> {
        let path = format!("/api/v1/namespaces/{}/secrets/{}", namespace, name);
        let response = self.request(Method::GET, &path).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response).await?;
        Ok(Some(response.json().await?))
    }
}

fn encode_data(data: BTreeMap<String, Vec<u8>>) -> BTreeMap<String, String> {
    data.into_iter()
        .map(|(k, v)| (k, BASE64.encode(v)))
        .collect()
}

#[async_trait]
impl ClusterClient for KubeApiClient {
    async fn apply_tls_secret(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, Vec<u8>>,
        labels: BTreeMap<String, String>,
    ) -> Result<(), DeployError> {
        let data = encode_data(data);

        match self.fetch_secret(namespace, name).await? {
            Some(mut existing) => {
                existing.metadata.labels.extend(labels);
                existing.data = data;
                existing.secret_type = Some("kubernetes.io/tls".to_string());
                let path = format!("/api/v1/namespaces/{}/secrets/{}", namespace, name);
                Self::send(self.request(Method::PUT, &path).json(&existing)).await?;
                info!("Updated secret {}/{}", namespace, name);
            }
            None => {
                let secret = Secret {
                    api_version: Some("v1".to_string()),
                    kind: Some("Secret".to_string()),
                    metadata: ObjectMeta {
                        name: name.to_string(),
                        namespace: Some(namespace.to_string()),
                        labels,
                        ..Default::default()
                    },
                    secret_type: Some("kubernetes.io/tls".to_string()),
                    data,
                };
                let path = format!("/api/v1/namespaces/{}/secrets", namespace);
                Self::send(self.request(Method::POST, &path).json(&secret)).await?;
                info!("Created secret {}/{}", namespace, name);
            }
        }
        Ok(())
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, DeployError> {
        let Some(secret) = self.fetch_secret(namespace, name).await? else {
            return Ok(None);
        };
        let mut decoded = BTreeMap::new();
        for (key, value) in secret.data {
            let bytes = BASE64
                .decode(value.as_bytes())
                .map_err(|e| DeployError::Secret(format!("{}: {}", key, e)))?;
            decoded.insert(key, bytes);
        }
        Ok(Some(decoded))
    }

    async fn restart_deployment(&self, namespace: &str, name: &str) -> Result<(), DeployError> {
        let path = format!("/apis/apps/v1/namespaces/{}/deployments/{}", namespace, name);
        let mut annotations = serde_json::Map::new();
        annotations.insert(
            RESTARTED_AT_ANNOTATION.to_string(),
            json!(chrono::Utc::now().to_rfc3339()),
        );
        let patch = json!({
            "spec": {"template": {"metadata": {"annotations": annotations}}}
        });
        debug!("Restarting deployment {}/{}", namespace, name);
        Self::send(
            self.request(Method::PATCH, &path)
                .header("Content-Type", "application/strategic-merge-patch+json")
                .body(patch.to_string()),
        )
        .await?;
        Ok(())
    }
}
