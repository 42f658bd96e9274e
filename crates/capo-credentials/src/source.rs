//! Where credential secrets come from
//!
//! [`SecretWatcher`] is the push seam the watch service consumes;
//! [`KubeSecretWatcher`] backs it with a kube-rs watcher on a single Secret.
//! [`SecretCredentialSource`] is the pull counterpart for one-shot reads.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};

use capo_common::{CredentialSource, Credentials, Error, Result};

/// A change to the watched secret
#[derive(Clone, Debug)]
pub enum SecretEvent {
    /// The secret was created or modified
    Applied(Secret),
    /// The secret was deleted, or does not exist
    Deleted,
}

/// Stream of changes to one secret
pub trait SecretWatcher: Send + Sync {
    /// Start watching; transient errors are yielded and the stream continues
    fn watch(&self) -> BoxStream<'static, Result<SecretEvent>>;
}

/// Watches one Secret through the Kubernetes API
#[derive(Clone)]
pub struct KubeSecretWatcher {
    client: Client,
    namespace: String,
    name: String,
}

impl KubeSecretWatcher {
    /// Watch `namespace/name`
    pub fn new(client: Client, namespace: &str, name: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

/// Translate a raw watcher event
///
/// `seen` tracks whether the current (re)list delivered the secret, so an
/// initial list without it reports the secret as absent.
fn translate(seen: &mut bool, event: watcher::Event<Secret>) -> Option<SecretEvent> {
    match event {
        watcher::Event::Init => {
            *seen = false;
            None
        }
        watcher::Event::InitApply(secret) => {
            *seen = true;
            Some(SecretEvent::Applied(secret))
        }
        watcher::Event::InitDone => (!*seen).then_some(SecretEvent::Deleted),
        watcher::Event::Apply(secret) => Some(SecretEvent::Applied(secret)),
        watcher::Event::Delete(_) => Some(SecretEvent::Deleted),
    }
}

impl SecretWatcher for KubeSecretWatcher {
    fn watch(&self) -> BoxStream<'static, Result<SecretEvent>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        let config = watcher::Config::default().fields(&format!("metadata.name={}", self.name));
        let context = format!("secret-watch {}/{}", self.namespace, self.name);

        watcher(api, config)
            .default_backoff()
            .scan(false, move |seen, event| {
                let mapped = match event {
                    Ok(event) => translate(seen, event).map(Ok),
                    Err(e) => Some(Err(Error::internal_with_context(
                        context.clone(),
                        e.to_string(),
                    ))),
                };
                futures::future::ready(Some(mapped))
            })
            .filter_map(futures::future::ready)
            .boxed()
    }
}

/// Reads credentials from a Secret on demand
#[derive(Clone)]
pub struct SecretCredentialSource {
    api: Api<Secret>,
    namespace: String,
    name: String,
}

impl SecretCredentialSource {
    /// Read `namespace/name` on every call
    pub fn new(client: Client, namespace: &str, name: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl CredentialSource for SecretCredentialSource {
    async fn credentials(&self) -> Result<Credentials> {
        let secret = self.api.get_opt(&self.name).await.map_err(|e| {
            Error::connection(format!(
                "failed getting credentials from secret {}/{}: {}",
                self.namespace, self.name, e
            ))
        })?;
        match secret {
            Some(secret) => Ok(Credentials::from_secret(&secret)),
            None => Err(Error::connection(format!(
                "failed getting credentials: secret {}/{} not found",
                self.namespace, self.name
            ))),
        }
    }
}
