//! Shared test helpers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use capo_common::{Credentials, Result};

use crate::listener::CredentialListener;
use crate::source::{SecretEvent, SecretWatcher};

/// Poll `check` up to `attempts` times, sleeping `interval` between polls
pub(crate) async fn eventually<F>(attempts: usize, interval: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..attempts {
        if check() {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    check()
}

/// Listener recording everything it accepted
#[derive(Default)]
pub(crate) struct RecordingListener {
    received: Mutex<Vec<Credentials>>,
    delay: Option<Duration>,
}

impl RecordingListener {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            received: Mutex::new(Vec::new()),
            delay: Some(delay),
        })
    }

    pub(crate) fn received(&self) -> Vec<Credentials> {
        self.received.lock().clone()
    }

    pub(crate) fn last(&self) -> Option<Credentials> {
        self.received.lock().last().cloned()
    }
}

#[async_trait]
impl CredentialListener for RecordingListener {
    async fn accept(&self, credentials: Credentials) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.received.lock().push(credentials);
    }
}

/// Listener that never finishes accepting
pub(crate) struct StuckListener;

#[async_trait]
impl CredentialListener for StuckListener {
    async fn accept(&self, _credentials: Credentials) {
        futures::future::pending::<()>().await;
    }
}

/// Watcher fed from a channel held by the test
pub(crate) struct ChannelWatcher {
    rx: Mutex<Option<mpsc::UnboundedReceiver<Result<SecretEvent>>>>,
    watch_calls: AtomicUsize,
}

impl ChannelWatcher {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedSender<Result<SecretEvent>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = Arc::new(Self {
            rx: Mutex::new(Some(rx)),
            watch_calls: AtomicUsize::new(0),
        });
        (watcher, tx)
    }

    pub(crate) fn watch_calls(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }
}

impl SecretWatcher for ChannelWatcher {
    fn watch(&self) -> BoxStream<'static, Result<SecretEvent>> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        match self.rx.lock().take() {
            Some(rx) => UnboundedReceiverStream::new(rx).boxed(),
            None => futures::stream::empty().boxed(),
        }
    }
}
