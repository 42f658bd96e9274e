//! oVirt provider spec and status embedded in Machine objects
//!
//! Field names follow the snake_case keys used in existing machine sets, so
//! manifests written for earlier provider releases keep decoding.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Condition type recorded once the backing VM has been created
pub const CONDITION_MACHINE_CREATED: &str = "MachineCreated";

/// Desired VM for a Machine
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct OvirtMachineProviderSpec {
    /// VM name; defaults to the Machine name when empty
    #[serde(default)]
    pub name: String,

    /// oVirt cluster the VM is placed in
    #[serde(default)]
    pub cluster_id: String,

    /// Template the VM is created from
    #[serde(default)]
    pub template_name: String,

    /// Instance type; mutually exclusive with `memory_mb` and `cpu`
    #[serde(default)]
    pub instance_type_id: String,

    /// CPU topology
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<Cpu>,

    /// Memory in MiB
    #[serde(default)]
    pub memory_mb: i32,

    /// Guaranteed memory in MiB
    #[serde(default)]
    pub guaranteed_memory_mb: i32,

    /// Root disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_disk: Option<Disk>,

    /// VM type: server, high_performance or desktop
    #[serde(default, rename = "type")]
    pub vm_type: String,

    /// Auto pinning policy: disabled, existing or adjust
    #[serde(default)]
    pub auto_pinning_policy: String,

    /// Hugepage size in KiB; 0 disables hugepages
    #[serde(default)]
    pub hugepages: i32,

    /// Secret holding the ignition/user data
    #[serde(
        default,
        rename = "userDataSecret",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_data_secret: Option<LocalObjectReference>,
}

/// CPU topology
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Cpu {
    /// Number of sockets
    #[serde(default)]
    pub sockets: i32,
    /// Cores per socket
    #[serde(default)]
    pub cores: i32,
    /// Threads per core
    #[serde(default)]
    pub threads: i32,
}

/// Disk descriptor
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Disk {
    /// Size in GiB
    #[serde(default)]
    pub size_gb: i64,
}

/// Reference to an object in the machine's namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct LocalObjectReference {
    /// Object name
    #[serde(default)]
    pub name: String,
}

/// VM type accepted by the engine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmType {
    /// Server VM
    Server,
    /// High performance VM
    HighPerformance,
    /// Desktop VM
    Desktop,
}

impl VmType {
    /// Engine wire value
    pub fn as_str(&self) -> &'static str {
        match self {
            VmType::Server => "server",
            VmType::HighPerformance => "high_performance",
            VmType::Desktop => "desktop",
        }
    }
}

impl FromStr for VmType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server" => Ok(VmType::Server),
            "high_performance" => Ok(VmType::HighPerformance),
            "desktop" => Ok(VmType::Desktop),
            other => Err(other.to_string()),
        }
    }
}

/// CPU auto pinning policy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutoPinningPolicy {
    /// No pinning
    Disabled,
    /// Pin to the existing host topology
    Existing,
    /// Adjust the VM topology to the host and pin
    Adjust,
}

impl AutoPinningPolicy {
    /// Engine wire value
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoPinningPolicy::Disabled => "disabled",
            AutoPinningPolicy::Existing => "existing",
            AutoPinningPolicy::Adjust => "adjust",
        }
    }
}

impl FromStr for AutoPinningPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(AutoPinningPolicy::Disabled),
            "existing" => Ok(AutoPinningPolicy::Existing),
            "adjust" => Ok(AutoPinningPolicy::Adjust),
            other => Err(other.to_string()),
        }
    }
}

/// Provider status written back onto the Machine
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OvirtMachineProviderStatus {
    /// Engine VM id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    /// Engine VM status, e.g. `up`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_state: Option<String>,

    /// Provider conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<OvirtMachineProviderCondition>,
}

impl OvirtMachineProviderStatus {
    /// Insert or replace the condition with the same type
    ///
    /// The transition time is kept when the status value did not change.
    pub fn set_condition(&mut self, mut condition: OvirtMachineProviderCondition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition.type_)
        {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }
}

/// Condition on the provider status
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OvirtMachineProviderCondition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,
    /// "True", "False" or "Unknown"
    pub status: String,
    /// Machine-readable reason
    pub reason: String,
    /// Human-readable message
    pub message: String,
    /// Last time the condition was probed
    pub last_probe_time: DateTime<Utc>,
    /// Last time the status value changed
    pub last_transition_time: DateTime<Utc>,
}

impl OvirtMachineProviderCondition {
    /// Condition recorded after a successful create
    pub fn created() -> Self {
        Self::new(
            CONDITION_MACHINE_CREATED,
            "True",
            "MachineCreateSucceeded",
            "Machine successfully created",
        )
    }

    /// Condition recorded after a failed create
    pub fn create_failed(message: impl Into<String>) -> Self {
        Self::new(CONDITION_MACHINE_CREATED, "False", "MachineCreateFailed", message)
    }

    fn new(
        type_: impl Into<String>,
        status: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            type_: type_.into(),
            status: status.into(),
            reason: reason.into(),
            message: message.into(),
            last_probe_time: now,
            last_transition_time: now,
        }
    }
}
