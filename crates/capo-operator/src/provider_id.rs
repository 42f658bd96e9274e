//! Node providerID controller
//!
//! Nodes registered without a cloud provider come up with an empty
//! `spec.providerID`. This controller fills it in from the engine VM carrying
//! the node's name.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use capo_actuator::ConnectionSupervisor;
use capo_common::kube_utils::provider_id_for;
use capo_common::{Error, Operation, Result, FIELD_MANAGER};

/// Node writes needed by the controller
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Set `spec.providerID` on a Node
    async fn set_provider_id(&self, node: &str, provider_id: &str) -> Result<()>;
}

/// Production Node client
pub struct KubeNodeClient {
    client: Client,
}

impl KubeNodeClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeClient for KubeNodeClient {
    async fn set_provider_id(&self, node: &str, provider_id: &str) -> Result<()> {
        let api: Api<Node> = Api::all(self.client.clone());
        let patch = serde_json::json!({ "spec": { "providerID": provider_id } });
        api.patch(node, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Shared state for Node reconciles
pub struct ProviderIdContext {
    /// Engine connections
    pub connections: Arc<ConnectionSupervisor>,
    /// Node writes
    pub nodes: Arc<dyn NodeClient>,
}

/// Reconcile one Node
pub async fn reconcile(node: Arc<Node>, ctx: Arc<ProviderIdContext>) -> Result<Action> {
    let name = node.name_any();
    let current = node.spec.as_ref().and_then(|spec| spec.provider_id.as_deref());
    if current.is_some_and(|id| !id.is_empty()) {
        return Ok(Action::await_change());
    }

    let session = ctx.connections.get_connection().await?;
    let vms = session.find_vms_by_name(&name).await?;
    let vm = match vms.as_slice() {
        [] => {
            debug!(node = %name, "No VM found for node, skipping");
            return Ok(Action::await_change());
        }
        [vm] => vm,
        _ => {
            return Err(Error::remote(
                Operation::Query,
                format!("expected to get 1 VM but got {}", vms.len()),
            ))
        }
    };

    let provider_id = provider_id_for(&vm.id);
    info!(node = %name, provider_id = %provider_id, "Setting node providerID");
    ctx.nodes.set_provider_id(&name, &provider_id).await?;
    Ok(Action::await_change())
}

/// Requeue transient failures; the rest wait for the Node to change
pub fn error_policy(node: Arc<Node>, error: &Error, _ctx: Arc<ProviderIdContext>) -> Action {
    warn!(node = %node.name_any(), error = %error, "ProviderID reconcile failed");
    if error.is_retryable() {
        Action::requeue(Duration::from_secs(crate::machine_controller::REQUEUE_ERROR_SECS))
    } else {
        Action::await_change()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capo_common::{CredentialStore, Credentials};
    use capo_engine::fake::InMemoryEngine;
    use k8s_openapi::api::core::v1::NodeSpec;
    use mockall::predicate::eq;

    fn node(name: &str, provider_id: Option<&str>) -> Arc<Node> {
        let mut node = Node::default();
        node.metadata.name = Some(name.to_string());
        node.spec = Some(NodeSpec {
            provider_id: provider_id.map(str::to_string),
            ..Default::default()
        });
        Arc::new(node)
    }

    fn context(engine: &InMemoryEngine, nodes: MockNodeClient) -> Arc<ProviderIdContext> {
        let store = CredentialStore::with_credentials(Credentials {
            url: "https://engine/ovirt-engine/api".to_string(),
            username: "admin@internal".to_string(),
            password: "pw".to_string(),
            ..Default::default()
        });
        Arc::new(ProviderIdContext {
            connections: Arc::new(ConnectionSupervisor::new(
                Arc::new(engine.clone()),
                Arc::new(store),
            )),
            nodes: Arc::new(nodes),
        })
    }

    #[tokio::test]
    async fn sets_provider_id_from_matching_vm() {
        let engine = InMemoryEngine::default();
        let id = engine.insert_vm("worker-0", "up");
        let mut nodes = MockNodeClient::new();
        nodes
            .expect_set_provider_id()
            .with(eq("worker-0"), eq(format!("ovirt://{}", id)))
            .times(1)
            .returning(|_, _| Ok(()));

        reconcile(node("worker-0", None), context(&engine, nodes))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn node_with_provider_id_is_skipped() {
        let engine = InMemoryEngine::default();
        engine.insert_vm("worker-0", "up");
        let mut nodes = MockNodeClient::new();
        nodes.expect_set_provider_id().never();

        reconcile(node("worker-0", Some("ovirt://x")), context(&engine, nodes))
            .await
            .unwrap();
        assert_eq!(engine.connect_count(), 0);
    }

    #[tokio::test]
    async fn node_without_vm_is_left_alone() {
        let engine = InMemoryEngine::default();
        let mut nodes = MockNodeClient::new();
        nodes.expect_set_provider_id().never();

        let action = reconcile(node("worker-0", Some("")), context(&engine, nodes))
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn ambiguous_match_is_an_error() {
        let engine = InMemoryEngine::default();
        engine.insert_vm("worker-0", "up");
        engine.insert_vm("worker-0", "down");
        let mut nodes = MockNodeClient::new();
        nodes.expect_set_provider_id().never();

        let err = reconcile(node("worker-0", None), context(&engine, nodes))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected to get 1 VM but got 2"));
    }
}
