//! Per-machine translation between the Machine object and engine calls

use chrono::{SecondsFormat, Utc};
use kube::ResourceExt;
use serde_json::{json, Value};

use capo_common::crd::{
    Machine, MachineAddress, OvirtMachineProviderCondition, OvirtMachineProviderSpec,
};
use capo_common::kube_utils::provider_id_for;
use capo_common::Operation;
use capo_engine::{CpuTopology, Vm, VmRequest};

/// VM name for a machine: the provider spec's name, or the Machine's own
pub fn vm_name(machine: &Machine, spec: &OvirtMachineProviderSpec) -> String {
    if spec.name.is_empty() {
        machine.name_any()
    } else {
        spec.name.clone()
    }
}

/// Create request for an already validated spec
pub fn vm_request(name: &str, spec: &OvirtMachineProviderSpec, user_data: Option<String>) -> VmRequest {
    let sized_by_instance_type = !spec.instance_type_id.is_empty();

    VmRequest {
        name: name.to_string(),
        cluster_id: spec.cluster_id.clone(),
        template_name: spec.template_name.clone(),
        vm_type: spec.vm_type.clone(),
        instance_type_id: sized_by_instance_type.then(|| spec.instance_type_id.clone()),
        memory_mb: (!sized_by_instance_type && spec.memory_mb > 0).then_some(spec.memory_mb as i64),
        guaranteed_memory_mb: (spec.guaranteed_memory_mb > 0)
            .then_some(spec.guaranteed_memory_mb as i64),
        cpu: spec.cpu.as_ref().filter(|_| !sized_by_instance_type).map(|cpu| CpuTopology {
            sockets: cpu.sockets,
            cores: cpu.cores,
            threads: cpu.threads,
        }),
        auto_pinning_policy: (!spec.auto_pinning_policy.is_empty())
            .then(|| spec.auto_pinning_policy.clone()),
        hugepages: (spec.hugepages > 0).then_some(spec.hugepages),
        user_data,
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Status content after a successful create or update
///
/// Clears any previous error and records the VM in the provider status.
pub fn success_status(machine: &Machine, vm: &Vm) -> Value {
    let mut provider_status = machine.provider_status();
    provider_status.instance_id = Some(vm.id.clone());
    provider_status.instance_state = Some(vm.status.clone());
    provider_status.set_condition(OvirtMachineProviderCondition::created());

    let addresses = vec![MachineAddress {
        type_: "InternalDNS".to_string(),
        address: vm.name.clone(),
    }];

    json!({
        "errorReason": null,
        "errorMessage": null,
        "providerStatus": provider_status,
        "addresses": addresses,
        "lastUpdated": now(),
    })
}

/// Status content recording a failed operation
///
/// A failed create also flips the created condition to false.
pub fn error_status(machine: &Machine, reason: &str, message: &str, during: Operation) -> Value {
    let mut status = json!({
        "errorReason": reason,
        "errorMessage": message,
        "lastUpdated": now(),
    });
    if during == Operation::Create {
        let mut provider_status = machine.provider_status();
        provider_status.set_condition(OvirtMachineProviderCondition::create_failed(message));
        status["providerStatus"] = json!(provider_status);
    }
    status
}

/// Provider ID to record for `vm`, unless the machine already carries it
pub fn provider_id_update(machine: &Machine, vm: &Vm) -> Option<String> {
    let wanted = provider_id_for(&vm.id);
    (machine.spec.provider_id.as_deref() != Some(wanted.as_str())).then_some(wanted)
}
