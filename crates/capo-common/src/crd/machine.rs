//! Machine custom resource (machine.openshift.io/v1beta1)
//!
//! Only the subset of fields the actuator touches is modelled. Unknown fields
//! survive round-trips because status writes use merge patches.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::preserve_unknown_fields;
use super::provider_spec::{OvirtMachineProviderSpec, OvirtMachineProviderStatus};
use crate::{Error, Result};

/// Finalizer the Machine controller places on machines it manages
pub const MACHINE_FINALIZER: &str = "machine.machine.openshift.io";

/// A Machine backed by an oVirt VM
///
/// Example:
/// ```yaml
/// apiVersion: machine.openshift.io/v1beta1
/// kind: Machine
/// metadata:
///   name: worker-0
///   namespace: openshift-machine-api
/// spec:
///   providerSpec:
///     value:
///       cluster_id: 3e4c1b5a-0000-0000-0000-000000000000
///       template_name: rhcos-template
///       type: server
///       memory_mb: 16384
///       cpu: { sockets: 4, cores: 1, threads: 1 }
///       os_disk: { size_gb: 120 }
///       userDataSecret: { name: worker-user-data }
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "machine.openshift.io",
    version = "v1beta1",
    kind = "Machine",
    namespaced,
    status = "MachineStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"ProviderID","type":"string","jsonPath":".spec.providerID"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Provider-specific configuration
    #[serde(default)]
    pub provider_spec: ProviderSpec,

    /// Provider ID of the backing instance, `ovirt://<vm-id>`
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

/// Raw provider configuration carried by a Machine
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ProviderSpec {
    /// Serialized [`OvirtMachineProviderSpec`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub value: Option<serde_json::Value>,
}

/// Observed state of a Machine
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Machine-readable reason for the last terminal error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,

    /// Human-readable message for the last terminal error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Serialized [`OvirtMachineProviderStatus`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub provider_status: Option<serde_json::Value>,

    /// Addresses reported for the instance
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<MachineAddress>,

    /// RFC 3339 timestamp of the last status write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,

    /// Lifecycle phase as set by the machine controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// A network address of a Machine
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct MachineAddress {
    /// Address type, e.g. `InternalIP` or `InternalDNS`
    #[serde(rename = "type")]
    pub type_: String,
    /// The address
    pub address: String,
}

impl Machine {
    /// Decode the provider spec embedded in this machine
    ///
    /// A missing or undecodable value is a configuration error.
    pub fn provider_spec(&self) -> Result<OvirtMachineProviderSpec> {
        let value = self.spec.provider_spec.value.clone().ok_or_else(|| {
            Error::invalid_configuration("machine has no providerSpec value")
        })?;
        serde_json::from_value(value).map_err(|e| {
            Error::invalid_configuration(format!(
                "cannot unmarshal machineProviderSpec field: {}",
                e
            ))
        })
    }

    /// Decode the provider status, defaulting when absent or malformed
    pub fn provider_status(&self) -> OvirtMachineProviderStatus {
        self.status
            .as_ref()
            .and_then(|s| s.provider_status.clone())
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }
}
