//! oVirt machine provider operator

use std::sync::Arc;

use clap::Parser;
use kube::CustomResourceExt;
use tokio_util::sync::CancellationToken;

use capo_actuator::{Actuator, ConnectionSupervisor, KubeMachineClient};
use capo_common::crd::Machine;
use capo_common::events::KubeEventPublisher;
use capo_common::kube_utils::create_client;
use capo_common::telemetry::{init_telemetry, TelemetryConfig};
use capo_credentials::{CredentialWatchService, SecretCredentialSource};
use capo_engine::RestEngineConnector;
use capo_operator::controller_runner::{build_machine_controllers, build_provider_id_controllers};
use capo_operator::Config;

const CONTROLLER_NAME: &str = "ovirt-machine-controller";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    if config.crd {
        let crd = serde_yaml::to_string(&Machine::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(&TelemetryConfig {
        json: !config.plain_logs,
        ..Default::default()
    })?;

    run(config).await
}

async fn run(config: Config) -> anyhow::Result<()> {
    let client = create_client(config.kubeconfig.as_deref()).await?;
    tracing::info!(
        namespace = %config.namespace,
        secret = %config.credentials_secret,
        "Starting oVirt machine provider"
    );

    // Pull on first use, then follow rotations pushed by the watch.
    let connections = Arc::new(ConnectionSupervisor::new(
        Arc::new(RestEngineConnector::new(config.engine_timeout())),
        Arc::new(SecretCredentialSource::new(
            client.clone(),
            &config.namespace,
            &config.credentials_secret,
        )),
    ));

    let watch = CredentialWatchService::for_secret(
        client.clone(),
        &config.namespace,
        &config.credentials_secret,
    );
    watch.add_listener(connections.clone());

    let cancel = CancellationToken::new();
    watch.run(&cancel);

    let actuator = Arc::new(Actuator::new(
        connections.clone(),
        Some(Arc::new(KubeMachineClient::new(client.clone()))),
        Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME)),
    ));

    let mut controllers = build_machine_controllers(client.clone(), &config.namespace, actuator);
    if config.disable_provider_id_controller {
        tracing::info!("Node providerID controller disabled");
    } else {
        controllers.extend(build_provider_id_controllers(client, connections));
    }

    futures::future::join_all(controllers).await;
    tracing::info!("Controllers stopped, shutting down");

    cancel.cancel();
    watch.shutdown(config.shutdown_timeout()).await;
    Ok(())
}
