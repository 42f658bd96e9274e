//! oVirt machine provider operator
//!
//! Wires the credential watch, the connection supervisor and the actuator
//! into two controllers: one for Machines and one filling Node providerIDs.

#![deny(missing_docs)]

pub mod config;
pub mod controller_runner;
pub mod machine_controller;
pub mod provider_id;

pub use config::Config;
