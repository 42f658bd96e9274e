//! Common types for the oVirt machine provider: credentials, Machine CRD
//! view, errors, events and telemetry

#![deny(missing_docs)]

pub mod credentials;
pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod telemetry;

pub use credentials::{CredentialSource, CredentialStore, Credentials};
pub use error::{Error, Operation};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace the machine API components run in
pub const MACHINE_API_NAMESPACE: &str = "openshift-machine-api";

/// Default name of the Secret holding engine credentials
pub const CREDENTIALS_SECRET_NAME: &str = "ovirt-credentials";

/// Prefix of provider IDs for engine VMs
pub const PROVIDER_ID_PREFIX: &str = "ovirt://";

/// Field manager used for every patch issued by the provider
pub const FIELD_MANAGER: &str = "capo-controller";
