//! Kubernetes operations the actuator needs on Machines and their secrets

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};

#[cfg(test)]
use mockall::automock;

use capo_common::crd::Machine;
use capo_common::{Error, Result, FIELD_MANAGER};

/// Key holding the ignition payload in user data secrets
pub const USER_DATA_KEY: &str = "userData";

/// Trait abstracting Machine writes and user data reads
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MachineClient: Send + Sync {
    /// Merge `patch` into the Machine's status subresource
    ///
    /// `patch` is the content of `status`, not the whole object.
    async fn patch_status(&self, namespace: &str, name: &str, patch: serde_json::Value)
        -> Result<()>;

    /// Set `spec.providerID` on the Machine
    async fn set_provider_id(&self, namespace: &str, name: &str, provider_id: &str) -> Result<()>;

    /// Read the user data payload from a secret in the Machine's namespace
    async fn user_data(&self, namespace: &str, secret_name: &str) -> Result<String>;
}

/// Production implementation backed by the API server
#[derive(Clone)]
pub struct KubeMachineClient {
    client: Client,
}

impl KubeMachineClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MachineClient for KubeMachineClient {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: serde_json::Value,
    ) -> Result<()> {
        let api: Api<Machine> = Api::namespaced(self.client.clone(), namespace);
        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&serde_json::json!({ "status": patch })),
        )
        .await?;
        Ok(())
    }

    async fn set_provider_id(&self, namespace: &str, name: &str, provider_id: &str) -> Result<()> {
        let api: Api<Machine> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&serde_json::json!({ "spec": { "providerID": provider_id } })),
        )
        .await?;
        Ok(())
    }

    async fn user_data(&self, namespace: &str, secret_name: &str) -> Result<String> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api.get(secret_name).await?;
        user_data_from_secret(&secret, secret_name)
    }
}

/// Extract the user data payload from a secret
pub fn user_data_from_secret(secret: &Secret, secret_name: &str) -> Result<String> {
    let bytes = secret
        .data
        .as_ref()
        .and_then(|data| data.get(USER_DATA_KEY))
        .map(|value| value.0.clone())
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|data| data.get(USER_DATA_KEY))
                .map(|value| value.clone().into_bytes())
        })
        .ok_or_else(|| {
            Error::invalid_configuration(format!(
                "user data secret {} has no {} key",
                secret_name, USER_DATA_KEY
            ))
        })?;

    String::from_utf8(bytes).map_err(|_| {
        Error::invalid_configuration(format!(
            "user data secret {} is not valid UTF-8",
            secret_name
        ))
    })
}
