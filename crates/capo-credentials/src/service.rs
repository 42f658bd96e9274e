//! Credential watch service
//!
//! Follows one Secret, keeps the shared [`CredentialStore`] current and fans
//! every change out to the registered listeners. The watch runs on its own
//! task; [`CredentialWatchService::shutdown`] is the only bounded wait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::Client;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use capo_common::{CredentialStore, Credentials};

use crate::listener::{CredentialListener, ListenerRegistry};
use crate::source::{KubeSecretWatcher, SecretEvent, SecretWatcher};

/// Watches the credentials secret and propagates rotations
pub struct CredentialWatchService {
    watcher: Arc<dyn SecretWatcher>,
    store: Arc<CredentialStore>,
    listeners: Arc<ListenerRegistry>,
    stop: CancellationToken,
    started: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CredentialWatchService {
    /// Create a service fed by `watcher`
    pub fn new(watcher: Arc<dyn SecretWatcher>) -> Self {
        Self {
            watcher,
            store: Arc::new(CredentialStore::new()),
            listeners: Arc::new(ListenerRegistry::new()),
            stop: CancellationToken::new(),
            started: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// Create a service watching `namespace/name` through the API server
    pub fn for_secret(client: Client, namespace: &str, name: &str) -> Self {
        Self::new(Arc::new(KubeSecretWatcher::new(client, namespace, name)))
    }

    /// Register a consumer of future updates
    ///
    /// The current value is not replayed; use [`Self::store`] to seed.
    pub fn add_listener(&self, listener: Arc<dyn CredentialListener>) {
        self.listeners.register(listener);
    }

    /// The store this service keeps current
    pub fn store(&self) -> Arc<CredentialStore> {
        self.store.clone()
    }

    /// Start watching in the background
    ///
    /// Returns immediately. Only the first call starts a watch. The task
    /// stops when `cancel` fires or on [`Self::shutdown`].
    pub fn run(&self, cancel: &CancellationToken) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Credential watch service already running, ignoring run");
            return;
        }

        let watch = WatchLoop {
            watcher: self.watcher.clone(),
            store: self.store.clone(),
            listeners: self.listeners.clone(),
        };
        let cancel = cancel.clone();
        let stop = self.stop.clone();
        let handle = tokio::spawn(async move { watch.run(cancel, stop).await });
        *self.task.lock() = Some(handle);
        info!("Credential watch service started");
    }

    /// Stop the watch, waiting at most `timeout` for the task to finish
    ///
    /// A task stuck past the timeout (e.g. in a listener that never returns)
    /// is left behind with a warning.
    pub async fn shutdown(&self, timeout: Duration) {
        self.stop.cancel();
        let Some(handle) = self.task.lock().take() else {
            debug!("Credential watch service not running");
            return;
        };

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => info!("Credential watch service stopped"),
            Ok(Err(e)) => warn!(error = %e, "Credential watch task failed"),
            Err(_) => warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Credential watch service did not stop in time, abandoning it"
            ),
        }
    }
}

impl Drop for CredentialWatchService {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

struct WatchLoop {
    watcher: Arc<dyn SecretWatcher>,
    store: Arc<CredentialStore>,
    listeners: Arc<ListenerRegistry>,
}

impl WatchLoop {
    async fn run(self, cancel: CancellationToken, stop: CancellationToken) {
        let mut events = self.watcher.watch();

        loop {
            // cancellation is only observed between events, so an in-flight
            // broadcast always completes
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = stop.cancelled() => break,
                event = events.next() => event,
            };

            match event {
                Some(Ok(SecretEvent::Applied(secret))) => {
                    self.apply(Credentials::from_secret(&secret)).await;
                }
                Some(Ok(SecretEvent::Deleted)) => {
                    warn!("Credentials secret is absent, propagating empty credentials");
                    self.apply(Credentials::default()).await;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Credentials watch error, watcher will retry");
                }
                None => {
                    warn!("Credentials watch stream ended");
                    break;
                }
            }
        }
        debug!("Credential watch loop exited");
    }

    async fn apply(&self, credentials: Credentials) {
        if !self.store.replace_if_changed(&credentials) {
            debug!("Credentials unchanged, skipping broadcast");
            return;
        }
        info!(
            url = %credentials.url,
            username = %credentials.username,
            listeners = self.listeners.len(),
            "Credentials changed"
        );
        self.listeners.broadcast(&credentials).await;
    }
}
