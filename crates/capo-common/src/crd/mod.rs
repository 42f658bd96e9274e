//! Custom resource views used by the oVirt machine provider
//!
//! The Machine type is owned by the machine API; this crate only carries the
//! fields the actuator reads and writes.

mod machine;
mod provider_spec;

pub use machine::{
    Machine, MachineAddress, MachineSpec, MachineStatus, ProviderSpec, MACHINE_FINALIZER,
};
pub use provider_spec::{
    AutoPinningPolicy, Cpu, Disk, LocalObjectReference, OvirtMachineProviderCondition,
    OvirtMachineProviderSpec, OvirtMachineProviderStatus, VmType, CONDITION_MACHINE_CREATED,
};

/// Schema for free-form JSON fields embedded in a CRD
pub(crate) fn preserve_unknown_fields(
    _gen: &mut schemars::gen::SchemaGenerator,
) -> schemars::schema::Schema {
    let mut object = schemars::schema::SchemaObject {
        instance_type: Some(schemars::schema::InstanceType::Object.into()),
        ..Default::default()
    };
    object.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    schemars::schema::Schema::Object(object)
}
