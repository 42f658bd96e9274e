//! Engine session seam
//!
//! An [`EngineConnector`] turns credentials into an authenticated
//! [`EngineSession`]. Sessions are opaque to callers; the connection
//! supervisor decides when one is stale.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use capo_common::{Credentials, Result};

use crate::version::EngineVersion;

/// VM summary returned by the engine
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Vm {
    /// Engine VM id
    pub id: String,
    /// VM name
    #[serde(default)]
    pub name: String,
    /// Engine VM status, e.g. `down`, `up`, `image_locked`
    #[serde(default)]
    pub status: String,
}

/// CPU topology for a VM request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuTopology {
    /// Number of sockets
    pub sockets: i32,
    /// Cores per socket
    pub cores: i32,
    /// Threads per core
    pub threads: i32,
}

/// Parameters for creating a VM from a template
///
/// Built from an already validated provider spec; the engine client does not
/// re-check the rules.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VmRequest {
    /// VM name
    pub name: String,
    /// Target cluster id
    pub cluster_id: String,
    /// Source template name
    pub template_name: String,
    /// VM type wire value
    pub vm_type: String,
    /// Instance type id, when sizing comes from an instance type
    pub instance_type_id: Option<String>,
    /// Memory in MiB, when sized explicitly
    pub memory_mb: Option<i64>,
    /// Guaranteed memory in MiB
    pub guaranteed_memory_mb: Option<i64>,
    /// CPU topology, when sized explicitly
    pub cpu: Option<CpuTopology>,
    /// Auto pinning policy wire value
    pub auto_pinning_policy: Option<String>,
    /// Hugepage size in KiB
    pub hugepages: Option<i32>,
    /// Initialization script (ignition / cloud-init payload)
    pub user_data: Option<String>,
}

/// Turns credentials into an authenticated session
#[async_trait]
pub trait EngineConnector: Send + Sync {
    /// Authenticate against the engine described by `credentials`
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn EngineSession>>;
}

/// An authenticated engine session
#[async_trait]
pub trait EngineSession: Send + Sync {
    /// Liveness probe; an error means the session must be discarded
    async fn test(&self) -> Result<()>;

    /// Version reported by the engine's product info
    async fn system_version(&self) -> Result<EngineVersion>;

    /// VMs whose name matches `name` exactly
    async fn find_vms_by_name(&self, name: &str) -> Result<Vec<Vm>>;

    /// Create a VM and return its summary
    async fn create_vm(&self, request: &VmRequest) -> Result<Vm>;

    /// Power on a VM
    async fn start_vm(&self, id: &str) -> Result<()>;

    /// Remove a VM
    async fn delete_vm(&self, id: &str) -> Result<()>;
}
