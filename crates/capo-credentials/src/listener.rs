//! Credential listeners and the registry that fans updates out to them

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use tracing::debug;

use capo_common::Credentials;

/// Consumer of credential rotations
///
/// Implementations must be cheap to call concurrently; the registry delivers
/// one update to all listeners at once.
#[async_trait]
pub trait CredentialListener: Send + Sync {
    /// Adopt a new credential snapshot
    async fn accept(&self, credentials: Credentials);
}

/// Append-only set of listeners
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Arc<dyn CredentialListener>>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

impl ListenerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener; safe while a broadcast is in flight
    pub fn register(&self, listener: Arc<dyn CredentialListener>) {
        self.listeners.write().push(listener);
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Deliver `credentials` to every listener registered at call time
    ///
    /// Returns once all of them have accepted. Listeners registered while the
    /// broadcast runs see the next one.
    pub async fn broadcast(&self, credentials: &Credentials) {
        let listeners = self.listeners.read().clone();
        debug!(listeners = listeners.len(), "Broadcasting credentials");
        join_all(
            listeners
                .iter()
                .map(|listener| listener.accept(credentials.clone())),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingListener;

    fn creds(user: &str) -> Credentials {
        Credentials {
            url: "https://engine/ovirt-engine/api".to_string(),
            username: user.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_every_listener_once() {
        let registry = ListenerRegistry::new();
        let listeners: Vec<_> = (0..3).map(|_| RecordingListener::new()).collect();
        for l in &listeners {
            registry.register(l.clone());
        }

        registry.broadcast(&creds("a")).await;

        for l in &listeners {
            assert_eq!(l.received(), vec![creds("a")]);
        }
    }

    #[tokio::test]
    async fn late_listener_only_sees_later_broadcasts() {
        let registry = ListenerRegistry::new();
        let early = RecordingListener::new();
        registry.register(early.clone());
        registry.broadcast(&creds("a")).await;

        let late = RecordingListener::new();
        registry.register(late.clone());
        registry.broadcast(&creds("b")).await;

        assert_eq!(early.received(), vec![creds("a"), creds("b")]);
        assert_eq!(late.received(), vec![creds("b")]);
    }

    #[tokio::test]
    async fn empty_registry_broadcast_is_a_no_op() {
        let registry = ListenerRegistry::new();
        assert!(registry.is_empty());
        registry.broadcast(&creds("a")).await;
    }

    #[tokio::test]
    async fn concurrent_registration_during_broadcast() {
        let registry = Arc::new(ListenerRegistry::new());
        let slow = RecordingListener::with_delay(std::time::Duration::from_millis(50));
        registry.register(slow.clone());

        let broadcasting = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.broadcast(&creds("a")).await })
        };
        tokio::task::yield_now().await;
        registry.register(RecordingListener::new());
        broadcasting.await.unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(slow.received(), vec![creds("a")]);
    }
}
