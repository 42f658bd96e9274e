//! Command line and environment configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use capo_common::{CREDENTIALS_SECRET_NAME, MACHINE_API_NAMESPACE};

/// oVirt machine provider operator
#[derive(Parser, Debug, Clone)]
#[command(name = "capo-operator", version, about, long_about = None)]
pub struct Config {
    /// Print the Machine CRD manifest and exit
    #[arg(long)]
    pub crd: bool,

    /// Namespace holding Machines and the credentials secret
    #[arg(long, env = "CAPO_NAMESPACE", default_value = MACHINE_API_NAMESPACE)]
    pub namespace: String,

    /// Name of the secret holding engine credentials
    #[arg(long, env = "CAPO_CREDENTIALS_SECRET", default_value = CREDENTIALS_SECRET_NAME)]
    pub credentials_secret: String,

    /// Kubeconfig to use instead of in-cluster configuration
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Seconds to wait for the credential watch to stop on shutdown
    #[arg(long, default_value_t = 10)]
    pub shutdown_timeout_secs: u64,

    /// Per-request timeout against the engine, in seconds
    #[arg(long, default_value_t = 30)]
    pub engine_timeout_secs: u64,

    /// Do not run the Node providerID controller
    #[arg(long)]
    pub disable_provider_id_controller: bool,

    /// Log human-readable lines instead of JSON
    #[arg(long)]
    pub plain_logs: bool,
}

impl Config {
    /// Shutdown wait for the credential watch
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Per-request engine timeout
    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }
}
