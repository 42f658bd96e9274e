//! Machine controller
//!
//! Thin reconcile loop over Machines: manages the finalizer and hands the
//! real work to the actuator. Retry timing is left to the controller runtime
//! through the returned [`Action`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use capo_actuator::Actuator;
use capo_common::crd::{Machine, MACHINE_FINALIZER};
use capo_common::{Error, Result, FIELD_MANAGER, MACHINE_API_NAMESPACE};

/// Requeue interval after a successful reconcile, to refresh machine status
pub const REQUEUE_SUCCESS_SECS: u64 = 300;

/// Requeue interval after a transient failure
pub const REQUEUE_ERROR_SECS: u64 = 20;

/// Lifecycle operations the controller drives
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MachineLifecycle: Send + Sync {
    /// Create the backing VM
    async fn create(&self, machine: &Machine) -> Result<()>;
    /// Whether the backing VM exists
    async fn exists(&self, machine: &Machine) -> Result<bool>;
    /// Refresh an existing machine
    async fn update(&self, machine: &Machine) -> Result<()>;
    /// Remove the backing VM
    async fn delete(&self, machine: &Machine) -> Result<()>;
}

#[async_trait]
impl MachineLifecycle for Actuator {
    async fn create(&self, machine: &Machine) -> Result<()> {
        Actuator::create(self, machine).await
    }

    async fn exists(&self, machine: &Machine) -> Result<bool> {
        Actuator::exists(self, machine).await
    }

    async fn update(&self, machine: &Machine) -> Result<()> {
        Actuator::update(self, machine).await
    }

    async fn delete(&self, machine: &Machine) -> Result<()> {
        Actuator::delete(self, machine).await
    }
}

/// Finalizer bookkeeping on Machines
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MachineFinalizers: Send + Sync {
    /// Replace the Machine's finalizer list
    async fn set_finalizers(&self, namespace: &str, name: &str, finalizers: Vec<String>)
        -> Result<()>;
}

/// Production finalizer client
pub struct KubeMachineFinalizers {
    client: Client,
}

impl KubeMachineFinalizers {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MachineFinalizers for KubeMachineFinalizers {
    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<()> {
        let api: Api<Machine> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Shared state for Machine reconciles
pub struct MachineContext {
    /// Lifecycle operations
    pub lifecycle: Arc<dyn MachineLifecycle>,
    /// Finalizer writes
    pub finalizers: Arc<dyn MachineFinalizers>,
}

fn has_finalizer(machine: &Machine) -> bool {
    machine.finalizers().iter().any(|f| f == MACHINE_FINALIZER)
}

/// Reconcile one Machine
pub async fn reconcile(machine: Arc<Machine>, ctx: Arc<MachineContext>) -> Result<Action> {
    let name = machine.name_any();
    let namespace = machine
        .namespace()
        .unwrap_or_else(|| MACHINE_API_NAMESPACE.to_string());

    if machine.metadata.deletion_timestamp.is_some() {
        if !has_finalizer(&machine) {
            return Ok(Action::await_change());
        }
        info!(machine = %name, "Machine is being deleted");
        ctx.lifecycle.delete(&machine).await?;

        let remaining: Vec<String> = machine
            .finalizers()
            .iter()
            .filter(|f| *f != MACHINE_FINALIZER)
            .cloned()
            .collect();
        ctx.finalizers
            .set_finalizers(&namespace, &name, remaining)
            .await?;
        return Ok(Action::await_change());
    }

    if !has_finalizer(&machine) {
        debug!(machine = %name, "Adding finalizer");
        let mut finalizers = machine.finalizers().to_vec();
        finalizers.push(MACHINE_FINALIZER.to_string());
        ctx.finalizers
            .set_finalizers(&namespace, &name, finalizers)
            .await?;
    }

    if ctx.lifecycle.exists(&machine).await? {
        ctx.lifecycle.update(&machine).await?;
    } else {
        info!(machine = %name, "No VM backs the machine, creating it");
        ctx.lifecycle.create(&machine).await?;
    }

    Ok(Action::requeue(Duration::from_secs(REQUEUE_SUCCESS_SECS)))
}

/// Requeue transient failures; wait for a spec change on the rest
pub fn error_policy(machine: Arc<Machine>, error: &Error, _ctx: Arc<MachineContext>) -> Action {
    if error.is_retryable() {
        warn!(machine = %machine.name_any(), error = %error, "Machine reconcile failed, retrying");
        Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS))
    } else {
        warn!(
            machine = %machine.name_any(),
            error = %error,
            "Machine reconcile failed, waiting for a change"
        );
        Action::await_change()
    }
}
