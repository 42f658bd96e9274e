//! Engine connection supervisor
//!
//! Owns at most one authenticated engine session. The session is probed on
//! every use and rebuilt from the latest credentials when the probe fails or
//! a credential rotation arrives.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use capo_common::{CredentialSource, Credentials, Error, Result};
use capo_credentials::CredentialListener;
use capo_engine::{EngineConnector, EngineSession, EngineVersion};

/// Something that can report the engine version
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EngineVersionSource: Send + Sync {
    /// Version reported by the engine
    async fn engine_version(&self) -> Result<EngineVersion>;
}

/// Keeps one engine session valid across credential rotations
pub struct ConnectionSupervisor {
    connector: Arc<dyn EngineConnector>,
    source: Arc<dyn CredentialSource>,
    adopted: RwLock<Option<Credentials>>,
    session: Mutex<Option<Arc<dyn EngineSession>>>,
}

impl ConnectionSupervisor {
    /// Create a supervisor resolving credentials from `source` until a
    /// rotation is pushed to it
    pub fn new(connector: Arc<dyn EngineConnector>, source: Arc<dyn CredentialSource>) -> Self {
        Self {
            connector,
            source,
            adopted: RwLock::new(None),
            session: Mutex::new(None),
        }
    }

    /// A live session, authenticating if needed
    ///
    /// A cached session that passes its liveness probe is returned as is.
    /// Otherwise it is dropped and a new one is built from the latest
    /// credentials. On failure no session is kept.
    pub async fn get_connection(&self) -> Result<Arc<dyn EngineSession>> {
        let mut slot = self.session.lock().await;

        if let Some(session) = slot.as_ref() {
            match session.test().await {
                Ok(()) => return Ok(session.clone()),
                Err(e) => {
                    debug!(error = %e, "Engine session failed liveness probe, re-authenticating");
                    *slot = None;
                }
            }
        }

        let credentials = self.resolve_credentials().await?;
        let session = self.connector.connect(&credentials).await.map_err(|e| {
            Error::connection(format!(
                "failed to authenticate against {}: {}",
                credentials.url,
                e.message()
            ))
        })?;

        info!(url = %credentials.url, "Engine session established");
        *slot = Some(session.clone());
        Ok(session)
    }

    /// Drop the cached session so the next call re-authenticates
    pub async fn invalidate(&self) {
        self.session.lock().await.take();
    }

    async fn resolve_credentials(&self) -> Result<Credentials> {
        let adopted = self.adopted.read().clone();
        let credentials = match adopted {
            Some(credentials) => credentials,
            None => self.source.credentials().await.map_err(|e| {
                Error::connection(format!("failed getting credentials: {}", e.message()))
            })?,
        };
        credentials.ensure_usable().map_err(|e| {
            Error::connection(format!("failed getting credentials: {}", e.message()))
        })?;
        Ok(credentials)
    }
}

#[async_trait]
impl CredentialListener for ConnectionSupervisor {
    async fn accept(&self, credentials: Credentials) {
        if credentials.is_empty() {
            warn!("Adopting empty credentials, engine calls will fail until they are fixed");
        }
        *self.adopted.write() = Some(credentials);
        self.invalidate().await;
        debug!("Engine session invalidated after credential rotation");
    }
}

#[async_trait]
impl EngineVersionSource for ConnectionSupervisor {
    async fn engine_version(&self) -> Result<EngineVersion> {
        self.get_connection().await?.system_version().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capo_common::CredentialStore;
    use capo_credentials::{CredentialWatchService, SecretEvent, SecretWatcher};
    use capo_engine::fake::InMemoryEngine;
    use futures::stream::BoxStream;
    use futures::StreamExt;
    use k8s_openapi::api::core::v1::Secret;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    /// Secret watcher fed by the test through a channel
    struct ChannelWatcher {
        rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<Result<SecretEvent>>>>,
    }

    impl ChannelWatcher {
        fn new() -> (Arc<Self>, mpsc::UnboundedSender<Result<SecretEvent>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let watcher = Arc::new(Self {
                rx: parking_lot::Mutex::new(Some(rx)),
            });
            (watcher, tx)
        }
    }

    impl SecretWatcher for ChannelWatcher {
        fn watch(&self) -> BoxStream<'static, Result<SecretEvent>> {
            match self.rx.lock().take() {
                Some(rx) => futures::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|event| (event, rx))
                })
                .boxed(),
                None => futures::stream::empty().boxed(),
            }
        }
    }

    fn secret(password: &str) -> Secret {
        Secret {
            string_data: Some(BTreeMap::from([
                (
                    "ovirt_url".to_string(),
                    "https://engine/ovirt-engine/api".to_string(),
                ),
                ("ovirt_username".to_string(), "admin@internal".to_string()),
                ("ovirt_password".to_string(), password.to_string()),
            ])),
            ..Default::default()
        }
    }

    fn creds(password: &str) -> Credentials {
        Credentials {
            url: "https://engine/ovirt-engine/api".to_string(),
            username: "admin@internal".to_string(),
            password: password.to_string(),
            ..Default::default()
        }
    }

    fn supervisor(engine: &InMemoryEngine, store: CredentialStore) -> ConnectionSupervisor {
        ConnectionSupervisor::new(Arc::new(engine.clone()), Arc::new(store))
    }

    #[tokio::test]
    async fn healthy_session_is_reused() {
        let engine = InMemoryEngine::default();
        let supervisor = supervisor(&engine, CredentialStore::with_credentials(creds("pw")));

        let first = supervisor.get_connection().await.unwrap();
        let second = supervisor.get_connection().await.unwrap();

        assert_eq!(engine.connect_count(), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn failed_probe_triggers_reauthentication() {
        let engine = InMemoryEngine::default();
        let supervisor = supervisor(&engine, CredentialStore::with_credentials(creds("pw")));

        let first = supervisor.get_connection().await.unwrap();
        engine.set_healthy(false);
        let second = supervisor.get_connection().await.unwrap();

        assert_eq!(engine.connect_count(), 2);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn rotation_invalidates_session_and_uses_new_credentials() {
        let engine = InMemoryEngine::default();
        engine.require_password("old");
        let supervisor = supervisor(&engine, CredentialStore::with_credentials(creds("old")));
        supervisor.get_connection().await.unwrap();

        engine.require_password("new");
        supervisor.accept(creds("new")).await;
        supervisor.get_connection().await.unwrap();

        assert_eq!(engine.connect_count(), 2);
    }

    #[tokio::test]
    async fn rotation_through_the_watch_service_reauthenticates() {
        let engine = InMemoryEngine::default();
        engine.require_password("old");
        let supervisor = Arc::new(supervisor(
            &engine,
            CredentialStore::with_credentials(creds("old")),
        ));
        let (watcher, tx) = ChannelWatcher::new();
        let service = CredentialWatchService::new(watcher);
        service.add_listener(supervisor.clone());
        let cancel = CancellationToken::new();
        service.run(&cancel);

        let before = supervisor.get_connection().await.unwrap();
        assert_eq!(engine.connect_count(), 1);

        // the old password stops working as soon as the secret rotates
        engine.require_password("new");
        tx.send(Ok(SecretEvent::Applied(secret("new")))).unwrap();

        let mut after = None;
        for _ in 0..100 {
            let session = supervisor.get_connection().await.unwrap();
            if !Arc::ptr_eq(&before, &session) {
                after = Some(session);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(after.is_some(), "session was never rebuilt after the rotation");
        assert_eq!(engine.connect_count(), 2);

        cancel.cancel();
        service.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn authentication_failure_keeps_no_session() {
        let engine = InMemoryEngine::default();
        engine.require_password("right");
        let supervisor = supervisor(&engine, CredentialStore::with_credentials(creds("wrong")));

        let err = supervisor.get_connection().await.err().unwrap();
        assert!(matches!(err, Error::Connection { .. }));
        assert!(err.to_string().contains("failed to authenticate"));

        supervisor.accept(creds("right")).await;
        supervisor.get_connection().await.unwrap();
        assert_eq!(engine.connect_count(), 1);
    }

    #[tokio::test]
    async fn empty_credentials_fail_before_authenticating() {
        let engine = InMemoryEngine::default();
        let supervisor = supervisor(&engine, CredentialStore::with_credentials(Credentials::default()));

        let err = supervisor.get_connection().await.err().unwrap();
        assert!(err.to_string().contains("failed getting credentials"));
        assert_eq!(engine.connect_count(), 0);
    }

    #[tokio::test]
    async fn unloaded_store_is_a_connection_error() {
        let engine = InMemoryEngine::default();
        let supervisor = supervisor(&engine, CredentialStore::new());

        let err = supervisor.get_connection().await.err().unwrap();
        assert!(matches!(err, Error::Connection { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn engine_version_goes_through_the_session() {
        let engine = InMemoryEngine::new(EngineVersion::new(4, 5, 1, 0));
        let supervisor = supervisor(&engine, CredentialStore::with_credentials(creds("pw")));

        assert_eq!(
            supervisor.engine_version().await.unwrap(),
            EngineVersion::new(4, 5, 1, 0)
        );
        supervisor.engine_version().await.unwrap();
        assert_eq!(engine.connect_count(), 1);
    }
}
