//! Controller runner - builds controller futures
//!
//! Each `build_*` function returns a Vec of boxed futures that the caller
//! joins. Construction stays free of side effects so `main` decides what runs.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use capo_actuator::{Actuator, ConnectionSupervisor};
use capo_common::crd::Machine;

use crate::machine_controller::{self, KubeMachineFinalizers, MachineContext};
use crate::provider_id::{self, KubeNodeClient, ProviderIdContext};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// so the API server closes idle watches before the client gives up on them.
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Boxed controller future
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Build the Machine controller for one namespace
pub fn build_machine_controllers(
    client: Client,
    namespace: &str,
    actuator: Arc<Actuator>,
) -> Vec<ControllerFuture> {
    let ctx = Arc::new(MachineContext {
        lifecycle: actuator,
        finalizers: Arc::new(KubeMachineFinalizers::new(client.clone())),
    });
    let machines: Api<Machine> = Api::namespaced(client, namespace);

    tracing::info!(namespace = %namespace, "- Machine controller");

    vec![Box::pin(
        Controller::new(machines, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .shutdown_on_signal()
            .run(
                machine_controller::reconcile,
                machine_controller::error_policy,
                ctx,
            )
            .for_each(log_reconcile_result("Machine")),
    )]
}

/// Build the Node providerID controller
pub fn build_provider_id_controllers(
    client: Client,
    connections: Arc<ConnectionSupervisor>,
) -> Vec<ControllerFuture> {
    let ctx = Arc::new(ProviderIdContext {
        connections,
        nodes: Arc::new(KubeNodeClient::new(client.clone())),
    });
    let nodes: Api<Node> = Api::all(client);

    tracing::info!("- Node providerID controller");

    vec![Box::pin(
        Controller::new(nodes, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .shutdown_on_signal()
            .run(provider_id::reconcile, provider_id::error_policy, ctx)
            .for_each(log_reconcile_result("ProviderID")),
    )]
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
