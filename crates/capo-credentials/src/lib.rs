//! Credential propagation for the oVirt machine provider
//!
//! The [`CredentialWatchService`] follows the credentials Secret and pushes
//! each rotation into a [`capo_common::CredentialStore`] and then to every
//! registered [`CredentialListener`].

#![deny(missing_docs)]

pub mod listener;
pub mod service;
pub mod source;

#[cfg(test)]
mod test_support;

pub use listener::{CredentialListener, ListenerRegistry};
pub use service::CredentialWatchService;
pub use source::{KubeSecretWatcher, SecretCredentialSource, SecretEvent, SecretWatcher};
