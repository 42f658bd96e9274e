//! Kubernetes client helpers

use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients; watches time out server-side first
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from an optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };

    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// `ovirt://<id>` provider ID for an engine VM
pub fn provider_id_for(vm_id: &str) -> String {
    format!("{}{}", crate::PROVIDER_ID_PREFIX, vm_id)
}
