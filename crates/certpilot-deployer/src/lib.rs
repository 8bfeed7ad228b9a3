//! Certificate deploy targets
//!
//! A deploy target pushes issued certificate material somewhere it is
//! served from:
//! - `ssh_web_server` uploads PEM files to a host over OpenSSH, tests the
//!   server configuration and reloads it
//! - `cluster_secret` writes a `kubernetes.io/tls` secret and optionally
//!   restarts the deployments that mount it
//!
//! Hosts and clusters are resolved through the [`Inventory`], and targets are
//! built by a [`DeployTargetFactory`].

pub mod cluster_secret;
pub mod errors;
pub mod factory;
pub mod inventory;
pub mod kube_client;
pub mod kubeconfig;
pub mod ssh;
pub mod target;
pub mod web_server;

pub use cluster_secret::{ClusterDirectory, ClusterSecretConfig, ClusterSecretTarget};
pub use errors::DeployError;
pub use factory::{DefaultDeployTargetFactory, DeployTargetFactory};
pub use inventory::Inventory;
pub use kube_client::{ClusterClient, KubeApiClient};
pub use kubeconfig::{KubeAuth, Kubeconfig, KubeconfigError, ResolvedKubeConfig};
pub use ssh::{HostDirectory, HostInfo, OpenSshConnector, RemoteShell, ShellConnector};
pub use target::{validate_target_config, CertificateMaterial, DeployTarget, DeployType};
pub use web_server::{SshWebServerConfig, SshWebServerTarget};
