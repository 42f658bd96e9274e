//! In-memory engine for tests
//!
//! Keeps VMs in a map, counts authentications, and lets a test flip session
//! health at any point. A started VM reports `wait_for_launch`, as the engine
//! does right after a start action.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use capo_common::{Credentials, Error, Operation, Result};

use crate::session::{EngineConnector, EngineSession, Vm, VmRequest};
use crate::version::EngineVersion;

#[derive(Debug)]
struct State {
    vms: BTreeMap<String, Vm>,
    version: EngineVersion,
    healthy: bool,
    password: Option<String>,
    next_id: u64,
    requests: Vec<VmRequest>,
}

/// Engine double usable as both connector and session backend
#[derive(Clone, Debug)]
pub struct InMemoryEngine {
    state: Arc<Mutex<State>>,
    connects: Arc<AtomicUsize>,
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new(EngineVersion::new(4, 4, 5, 0))
    }
}

impl InMemoryEngine {
    /// Engine reporting `version`, accepting any password
    pub fn new(version: EngineVersion) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                vms: BTreeMap::new(),
                version,
                healthy: true,
                password: None,
                next_id: 1,
                requests: Vec::new(),
            })),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Only accept logins with this password
    pub fn require_password(&self, password: &str) {
        self.state.lock().password = Some(password.to_string());
    }

    /// Make every existing session fail (or pass) its liveness probe
    pub fn set_healthy(&self, healthy: bool) {
        self.state.lock().healthy = healthy;
    }

    /// Number of successful authentications so far
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Seed a VM and return its id
    pub fn insert_vm(&self, name: &str, status: &str) -> String {
        let mut state = self.state.lock();
        let id = format!("vm-{}", state.next_id);
        state.next_id += 1;
        state.vms.insert(
            id.clone(),
            Vm {
                id: id.clone(),
                name: name.to_string(),
                status: status.to_string(),
            },
        );
        id
    }

    /// Snapshot of all VMs
    pub fn vms(&self) -> Vec<Vm> {
        self.state.lock().vms.values().cloned().collect()
    }

    /// Every create request received, in order
    pub fn create_requests(&self) -> Vec<VmRequest> {
        self.state.lock().requests.clone()
    }
}

#[async_trait]
impl EngineConnector for InMemoryEngine {
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn EngineSession>> {
        credentials.ensure_usable()?;
        if let Some(expected) = &self.state.lock().password {
            if *expected != credentials.password {
                return Err(Error::connection(format!(
                    "failed to authenticate against {} as {}: invalid password",
                    credentials.url, credentials.username
                )));
            }
        }
        // a fresh session starts healthy
        self.state.lock().healthy = true;
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(InMemorySession {
            engine: self.clone(),
        }))
    }
}

struct InMemorySession {
    engine: InMemoryEngine,
}

#[async_trait]
impl EngineSession for InMemorySession {
    async fn test(&self) -> Result<()> {
        if self.engine.state.lock().healthy {
            Ok(())
        } else {
            Err(Error::connection("engine liveness probe failed"))
        }
    }

    async fn system_version(&self) -> Result<EngineVersion> {
        Ok(self.engine.state.lock().version)
    }

    async fn find_vms_by_name(&self, name: &str) -> Result<Vec<Vm>> {
        Ok(self
            .engine
            .state
            .lock()
            .vms
            .values()
            .filter(|vm| vm.name == name)
            .cloned()
            .collect())
    }

    async fn create_vm(&self, request: &VmRequest) -> Result<Vm> {
        let mut state = self.engine.state.lock();
        if state.vms.values().any(|vm| vm.name == request.name) {
            return Err(Error::remote_with_hint(
                Operation::Create,
                format!("the given name {} is already in use", request.name),
                false,
            ));
        }
        let vm = Vm {
            id: format!("vm-{}", state.next_id),
            name: request.name.clone(),
            status: "down".to_string(),
        };
        state.next_id += 1;
        state.vms.insert(vm.id.clone(), vm.clone());
        state.requests.push(request.clone());
        Ok(vm)
    }

    async fn start_vm(&self, id: &str) -> Result<()> {
        match self.engine.state.lock().vms.get_mut(id) {
            Some(vm) => {
                vm.status = "wait_for_launch".to_string();
                Ok(())
            }
            None => Err(Error::remote_with_hint(
                Operation::Create,
                format!("vm {} not found", id),
                false,
            )),
        }
    }

    async fn delete_vm(&self, id: &str) -> Result<()> {
        match self.engine.state.lock().vms.remove(id) {
            Some(_) => Ok(()),
            None => Err(Error::remote_with_hint(
                Operation::Delete,
                format!("vm {} not found", id),
                false,
            )),
        }
    }
}
