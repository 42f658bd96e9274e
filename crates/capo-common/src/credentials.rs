//! oVirt engine credentials
//!
//! Credentials are read from a Kubernetes Secret and replaced wholesale on
//! every change. The [`CredentialStore`] holds the latest snapshot and is the
//! default [`CredentialSource`] for connection supervisors.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use parking_lot::RwLock;
use tracing::warn;

use crate::{Error, Result};

/// Secret key holding the engine API URL
pub const KEY_URL: &str = "ovirt_url";
/// Secret key holding the engine username
pub const KEY_USERNAME: &str = "ovirt_username";
/// Secret key holding the engine password
pub const KEY_PASSWORD: &str = "ovirt_password";
/// Secret key holding a path to a CA file
pub const KEY_CA_FILE: &str = "ovirt_cafile";
/// Secret key holding the "true"/"false" skip-verify flag
pub const KEY_INSECURE: &str = "ovirt_insecure";
/// Secret key holding an inline PEM CA bundle
pub const KEY_CA_BUNDLE: &str = "ovirt_ca_bundle";

/// Connection parameters for the oVirt engine API
///
/// Equality is structural. An all-empty value is what a malformed or absent
/// secret produces; consumers that need a usable value check
/// [`Credentials::is_empty`] before connecting.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Engine API endpoint, e.g. `https://engine.example.com/ovirt-engine/api`
    pub url: String,
    /// Username including the auth domain, e.g. `admin@internal`
    pub username: String,
    /// Password for `username`
    pub password: String,
    /// Path to a PEM CA file on the local filesystem
    pub ca_file: String,
    /// Skip TLS certificate verification
    pub insecure: bool,
    /// Inline PEM CA bundle
    pub ca_bundle: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("ca_file", &self.ca_file)
            .field("insecure", &self.insecure)
            .field("ca_bundle_len", &self.ca_bundle.len())
            .finish()
    }
}

impl Credentials {
    /// Build credentials from string key/value pairs
    ///
    /// Missing keys map to empty strings; `ovirt_insecure` is true only for
    /// the exact string `"true"`.
    pub fn from_string_data(data: &BTreeMap<String, String>) -> Self {
        let get = |key: &str| data.get(key).cloned().unwrap_or_default();
        Self {
            url: get(KEY_URL),
            username: get(KEY_USERNAME),
            password: get(KEY_PASSWORD),
            ca_file: get(KEY_CA_FILE),
            insecure: data.get(KEY_INSECURE).map(String::as_str) == Some("true"),
            ca_bundle: get(KEY_CA_BUNDLE),
        }
    }

    /// Build credentials from a Secret
    ///
    /// Never fails: a secret without data, or with a value that is not valid
    /// UTF-8, yields empty credentials.
    pub fn from_secret(secret: &Secret) -> Self {
        let mut strings = BTreeMap::new();

        if let Some(data) = &secret.data {
            for (key, value) in data {
                match String::from_utf8(value.0.clone()) {
                    Ok(s) => {
                        strings.insert(key.clone(), s);
                    }
                    Err(_) => {
                        warn!(key = %key, "Credentials secret has a non UTF-8 value, treating as empty");
                        return Self::default();
                    }
                }
            }
        }
        // stringData is write-only on the API server but shows up on objects
        // built locally; it wins over data like the API server's merge does
        if let Some(string_data) = &secret.string_data {
            strings.extend(string_data.clone());
        }

        Self::from_string_data(&strings)
    }

    /// True when neither an endpoint nor a username is set
    pub fn is_empty(&self) -> bool {
        self.url.is_empty() && self.username.is_empty()
    }

    /// Check that the fields required to authenticate are present
    pub fn ensure_usable(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::connection(format!("credentials are missing {}", KEY_URL)));
        }
        if self.username.is_empty() {
            return Err(Error::connection(format!(
                "credentials are missing {}",
                KEY_USERNAME
            )));
        }
        Ok(())
    }
}

/// Latest known credential snapshot
///
/// Readers always see a complete value: `replace` swaps an `Arc` under a
/// write lock, so no reader observes a partially-updated snapshot.
#[derive(Debug, Default)]
pub struct CredentialStore {
    current: RwLock<Option<Arc<Credentials>>>,
}

impl CredentialStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with credentials
    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            current: RwLock::new(Some(Arc::new(credentials))),
        }
    }

    /// The latest snapshot, if any has been stored
    pub fn current(&self) -> Option<Credentials> {
        self.current.read().as_deref().cloned()
    }

    /// Replace the snapshot
    pub fn replace(&self, credentials: Credentials) {
        *self.current.write() = Some(Arc::new(credentials));
    }

    /// Replace the snapshot unless it already holds an equal value
    ///
    /// Returns `true` when the stored value changed.
    pub fn replace_if_changed(&self, credentials: &Credentials) -> bool {
        let mut current = self.current.write();
        if current.as_deref() == Some(credentials) {
            return false;
        }
        *current = Some(Arc::new(credentials.clone()));
        true
    }
}

/// Where a connection supervisor resolves credentials from
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Resolve the credentials to authenticate with
    async fn credentials(&self) -> Result<Credentials>;
}

#[async_trait]
impl CredentialSource for CredentialStore {
    async fn credentials(&self) -> Result<Credentials> {
        self.current()
            .ok_or_else(|| Error::connection("no credentials have been loaded yet"))
    }
}
