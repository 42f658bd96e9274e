//! Machine provider spec validation
//!
//! Every rule must pass before the actuator issues a mutating engine call.
//! Only the auto pinning rule talks to the engine, and only when a policy is
//! set.

use tracing::debug;

use capo_common::crd::{AutoPinningPolicy, OvirtMachineProviderSpec, VmType};
use capo_common::{Error, Result};
use capo_engine::{version_compare, EngineVersion};

use crate::connection::EngineVersionSource;

/// Oldest engine implementing auto pinning
pub const AUTO_PINNING_MIN_VERSION: EngineVersion = EngineVersion::new(4, 4, 5, 0);

/// Hugepage sizes the engine accepts, in KiB
pub const SUPPORTED_HUGEPAGES: [i32; 2] = [2048, 1048576];

const INVALID_MACHINE_OBJECT: &str = "error validating machine object fields:";

/// Validate a provider spec
///
/// Returns [`Error::InvalidMachineConfiguration`] for the first rule that
/// fails. Errors querying the engine version are returned unchanged.
pub async fn validate_machine(
    spec: &OvirtMachineProviderSpec,
    versions: &dyn EngineVersionSource,
) -> Result<()> {
    validate_user_data(spec)?;
    validate_sizing(spec)?;
    validate_os_disk(spec)?;
    validate_vm_type(&spec.vm_type)?;
    if !spec.auto_pinning_policy.is_empty() {
        validate_auto_pinning(&spec.auto_pinning_policy, versions).await?;
    }
    validate_hugepages(spec.hugepages)?;
    Ok(())
}

fn validate_user_data(spec: &OvirtMachineProviderSpec) -> Result<()> {
    match &spec.user_data_secret {
        None => Err(Error::invalid_configuration(format!(
            "{} UserDataSecret must be provided!",
            INVALID_MACHINE_OBJECT
        ))),
        Some(reference) if reference.name.is_empty() => Err(Error::invalid_configuration(
            format!("{} UserDataSecret *Name* must be provided!", INVALID_MACHINE_OBJECT),
        )),
        Some(_) => Ok(()),
    }
}

/// Instance type and explicit sizing are mutually exclusive; one is required
fn validate_sizing(spec: &OvirtMachineProviderSpec) -> Result<()> {
    if !spec.instance_type_id.is_empty() {
        if spec.memory_mb != 0 || spec.cpu.is_some() {
            return Err(Error::invalid_configuration(format!(
                "{} InstanceTypeID and MemoryMB OR CPU cannot be set at the same time!",
                INVALID_MACHINE_OBJECT
            )));
        }
        return Ok(());
    }
    if spec.memory_mb == 0 {
        return Err(Error::invalid_configuration(format!(
            "{} MemoryMB must be specified!",
            INVALID_MACHINE_OBJECT
        )));
    }
    if spec.cpu.is_none() {
        return Err(Error::invalid_configuration(format!(
            "{} CPU must be specified!",
            INVALID_MACHINE_OBJECT
        )));
    }
    Ok(())
}

fn validate_os_disk(spec: &OvirtMachineProviderSpec) -> Result<()> {
    match &spec.os_disk {
        None => Err(Error::invalid_configuration(format!(
            "{} OS Disk (os_disk) must be specified!",
            INVALID_MACHINE_OBJECT
        ))),
        Some(disk) if disk.size_gb <= 0 => Err(Error::invalid_configuration(format!(
            "{} OS Disk (os_disk) *SizeGB* must be specified!",
            INVALID_MACHINE_OBJECT
        ))),
        Some(_) => Ok(()),
    }
}

fn validate_vm_type(vm_type: &str) -> Result<()> {
    if vm_type.is_empty() {
        return Err(Error::invalid_configuration(
            "VMType (keyword: type in YAML) must be specified",
        ));
    }
    vm_type.parse::<VmType>().map(|_| ()).map_err(|value| {
        Error::invalid_configuration(format!(
            "error creating oVirt instance: The machine type must be one of the following \
             options: server, high_performance or desktop. The value: {} is not valid",
            value
        ))
    })
}

async fn validate_auto_pinning(policy: &str, versions: &dyn EngineVersionSource) -> Result<()> {
    let policy = policy.parse::<AutoPinningPolicy>().map_err(|value| {
        Error::invalid_configuration(format!(
            "error creating oVirt instance: The machine auto pinning policy must be one of \
             the following options: disabled, existing or adjust. The value: {} is not valid",
            value
        ))
    })?;

    let version = versions.engine_version().await?;
    debug!(%version, policy = policy.as_str(), "Checking engine support for auto pinning");
    if version_compare(Some(&version), Some(&AUTO_PINNING_MIN_VERSION))? >= 0 {
        return Ok(());
    }
    Err(Error::invalid_configuration(format!(
        "the engine version {}.{}.{} is not supporting the auto pinning feature. \
         Please update to {}.{}.{} or later",
        version.major,
        version.minor,
        version.build,
        AUTO_PINNING_MIN_VERSION.major,
        AUTO_PINNING_MIN_VERSION.minor,
        AUTO_PINNING_MIN_VERSION.build
    )))
}

fn validate_hugepages(value: i32) -> Result<()> {
    if value == 0 || SUPPORTED_HUGEPAGES.contains(&value) {
        return Ok(());
    }
    Err(Error::invalid_configuration(format!(
        "error creating oVirt instance: The machine `hugepages` custom property must be one \
         of the following options: 2048, 1048576. The value: {} is not valid",
        value
    )))
}
