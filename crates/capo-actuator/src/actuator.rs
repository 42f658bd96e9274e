//! Machine actuator
//!
//! Implements the machine API's create / exists / update / delete contract
//! against the engine. Failures are recorded on the Machine status and as
//! Warning events before being returned to the caller.

use std::sync::Arc;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{error, info, instrument, warn};

use capo_common::crd::{Machine, OvirtMachineProviderSpec};
use capo_common::events::{actions, reasons, EventPublisher};
use capo_common::{Error, Operation, Result, MACHINE_API_NAMESPACE};
use capo_engine::{EngineSession, Vm};

use crate::client::MachineClient;
use crate::connection::ConnectionSupervisor;
use crate::scope::{error_status, provider_id_update, success_status, vm_name, vm_request};
use crate::validation::validate_machine;

/// Drives engine VMs for Machine objects
pub struct Actuator {
    connections: Arc<ConnectionSupervisor>,
    client: Option<Arc<dyn MachineClient>>,
    events: Arc<dyn EventPublisher>,
}

impl Actuator {
    /// Create an actuator
    ///
    /// Without a `client` (installation-time runs) Machine status is never
    /// written and user data cannot be read.
    pub fn new(
        connections: Arc<ConnectionSupervisor>,
        client: Option<Arc<dyn MachineClient>>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            connections,
            client,
            events,
        }
    }

    /// Create the VM backing `machine`, or adopt one with the same name
    #[instrument(skip(self, machine), fields(machine = %machine.name_any()))]
    pub async fn create(&self, machine: &Machine) -> Result<()> {
        match self.try_create(machine).await {
            Ok(vm) => {
                info!(vm_id = %vm.id, "Machine created");
                self.publish(
                    machine,
                    EventType::Normal,
                    reasons::CREATED,
                    actions::CREATE,
                    format!("Created Machine {}", machine.name_any()),
                )
                .await;
                Ok(())
            }
            Err(e) => Err(self.handle_machine_error(machine, e, Operation::Create).await),
        }
    }

    /// Whether a VM backs `machine`
    #[instrument(skip(self, machine), fields(machine = %machine.name_any()))]
    pub async fn exists(&self, machine: &Machine) -> Result<bool> {
        let session = self.connections.get_connection().await?;
        let vm = find_vm(session.as_ref(), machine)
            .await
            .map_err(|e| e.for_machine(&machine.name_any()))?;
        Ok(vm.is_some())
    }

    /// Re-validate `machine` and refresh its status from the engine
    #[instrument(skip(self, machine), fields(machine = %machine.name_any()))]
    pub async fn update(&self, machine: &Machine) -> Result<()> {
        match self.try_update(machine).await {
            Ok(vm) => {
                self.publish(
                    machine,
                    EventType::Normal,
                    reasons::UPDATED,
                    actions::UPDATE,
                    format!("Updated Machine {} ({})", machine.name_any(), vm.status),
                )
                .await;
                Ok(())
            }
            Err(e) => Err(self.handle_machine_error(machine, e, Operation::Update).await),
        }
    }

    /// Remove the VM backing `machine`; an absent VM is success
    #[instrument(skip(self, machine), fields(machine = %machine.name_any()))]
    pub async fn delete(&self, machine: &Machine) -> Result<()> {
        match self.try_delete(machine).await {
            Ok(()) => {
                self.publish(
                    machine,
                    EventType::Normal,
                    reasons::DELETED,
                    actions::DELETE,
                    format!("Deleted Machine {}", machine.name_any()),
                )
                .await;
                Ok(())
            }
            Err(e) => Err(self.handle_machine_error(machine, e, Operation::Delete).await),
        }
    }

    async fn try_create(&self, machine: &Machine) -> Result<Vm> {
        let spec = machine.provider_spec()?;
        let session = self.connections.get_connection().await?;
        validate_machine(&spec, self.connections.as_ref()).await?;

        let name = vm_name(machine, &spec);
        let vm = match session.find_vms_by_name(&name).await?.into_iter().next() {
            Some(existing) => {
                info!(vm = %name, vm_id = %existing.id, "VM already exists, adopting it");
                existing
            }
            None => {
                let user_data = self.user_data(machine, &spec).await?;
                let created = session
                    .create_vm(&vm_request(&name, &spec, Some(user_data)))
                    .await?;
                session.start_vm(&created.id).await?;
                // the engine reports the post-start state asynchronously
                session
                    .find_vms_by_name(&name)
                    .await?
                    .into_iter()
                    .find(|vm| vm.id == created.id)
                    .unwrap_or(created)
            }
        };

        self.record_success(machine, &vm).await?;
        Ok(vm)
    }

    async fn try_update(&self, machine: &Machine) -> Result<Vm> {
        let spec = machine.provider_spec()?;
        let session = self.connections.get_connection().await?;
        validate_machine(&spec, self.connections.as_ref()).await?;

        let vm = find_vm(session.as_ref(), machine).await?.ok_or_else(|| {
            Error::remote_with_hint(
                Operation::Update,
                format!("VM {} not found", vm_name(machine, &spec)),
                true,
            )
        })?;
        self.record_success(machine, &vm).await?;
        Ok(vm)
    }

    async fn try_delete(&self, machine: &Machine) -> Result<()> {
        let session = self.connections.get_connection().await?;
        match find_vm(session.as_ref(), machine).await? {
            Some(vm) => {
                session.delete_vm(&vm.id).await?;
                info!(vm_id = %vm.id, "VM deleted");
            }
            None => info!("VM already absent"),
        }
        Ok(())
    }

    async fn user_data(&self, machine: &Machine, spec: &OvirtMachineProviderSpec) -> Result<String> {
        let client = self.client.as_ref().ok_or_else(|| {
            Error::internal_with_context("create", "no kubernetes client to read user data with")
        })?;
        let secret = spec
            .user_data_secret
            .as_ref()
            .map(|reference| reference.name.as_str())
            .unwrap_or_default();
        client.user_data(&namespace_of(machine), secret).await
    }

    async fn record_success(&self, machine: &Machine, vm: &Vm) -> Result<()> {
        let Some(client) = &self.client else {
            return Ok(());
        };
        let namespace = namespace_of(machine);
        let name = machine.name_any();

        client
            .patch_status(&namespace, &name, success_status(machine, vm))
            .await?;
        if let Some(provider_id) = provider_id_update(machine, vm) {
            client.set_provider_id(&namespace, &name, &provider_id).await?;
        }
        Ok(())
    }

    /// Record `err` on the Machine and return it
    ///
    /// A failure to write the status is logged; the original error wins.
    async fn handle_machine_error(&self, machine: &Machine, err: Error, during: Operation) -> Error {
        let name = machine.name_any();
        let err = err.for_machine(&name);
        let reason = err.machine_status_reason(during);
        let message = err.message();

        let (event_reason, action) = match during {
            Operation::Create => (reasons::FAILED_CREATE, actions::CREATE),
            Operation::Delete => (reasons::FAILED_DELETE, actions::DELETE),
            Operation::Update | Operation::Query => (reasons::FAILED_UPDATE, actions::UPDATE),
        };
        self.publish(machine, EventType::Warning, event_reason, action, message.clone())
            .await;

        if let Some(client) = &self.client {
            let status = error_status(machine, reason, &message, during);
            if let Err(e) = client
                .patch_status(&namespace_of(machine), &name, status)
                .await
            {
                warn!(error = %e, "Failed to record machine error in status");
            }
        }

        error!(reason, error = %message, retryable = err.is_retryable(), "Machine {} failed", during.as_str());
        err
    }

    async fn publish(
        &self,
        machine: &Machine,
        type_: EventType,
        reason: &str,
        action: &str,
        note: String,
    ) {
        let reference: ObjectReference = machine.object_ref(&());
        self.events
            .publish(&reference, type_, reason, action, Some(note))
            .await;
    }
}

fn namespace_of(machine: &Machine) -> String {
    machine
        .namespace()
        .unwrap_or_else(|| MACHINE_API_NAMESPACE.to_string())
}

/// Look up the VM for a machine by name
///
/// An undecodable provider spec falls back to the Machine name so deletes
/// still work for machines that never validated.
async fn find_vm(session: &dyn EngineSession, machine: &Machine) -> Result<Option<Vm>> {
    let name = machine
        .provider_spec()
        .map(|spec| vm_name(machine, &spec))
        .unwrap_or_else(|_| machine.name_any());
    let mut vms = session.find_vms_by_name(&name).await?;
    if vms.len() > 1 {
        return Err(Error::remote_with_hint(
            Operation::Query,
            format!("expected at most 1 VM named {} but found {}", name, vms.len()),
            false,
        ));
    }
    Ok(vms.pop())
}
