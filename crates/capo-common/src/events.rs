//! Kubernetes Event recording for the machine actuator.
//!
//! Provides a trait-based abstraction over `kube::runtime::events::Recorder`
//! so the actuator can emit Events visible via `kubectl describe machine`.
//!
//! Events are **fire-and-forget**: failures are logged as warnings and never
//! propagate errors. A failed event must never fail a machine operation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason string (e.g. "Created")
    /// * `action` - What action was taken (e.g. "Create")
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// No-op implementation for installation-time runs and tests.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Well-known event reason strings.
pub mod reasons {
    /// Backing VM created
    pub const CREATED: &str = "Created";
    /// Machine status refreshed from the engine
    pub const UPDATED: &str = "Updated";
    /// Backing VM removed
    pub const DELETED: &str = "Deleted";
    /// Create failed
    pub const FAILED_CREATE: &str = "FailedCreate";
    /// Update failed
    pub const FAILED_UPDATE: &str = "FailedUpdate";
    /// Delete failed
    pub const FAILED_DELETE: &str = "FailedDelete";
}

/// Well-known event action strings.
pub mod actions {
    /// Creating the backing VM
    pub const CREATE: &str = "Create";
    /// Refreshing machine state
    pub const UPDATE: &str = "Update";
    /// Deleting the backing VM
    pub const DELETE: &str = "Delete";
}
