//! Machine actuator for oVirt
//!
//! The [`ConnectionSupervisor`] keeps an engine session alive across
//! credential rotations, [`validation`] gates every mutating call, and the
//! [`Actuator`] implements the machine API contract on top of both.

#![deny(missing_docs)]

pub mod actuator;
pub mod client;
pub mod connection;
pub mod scope;
pub mod validation;

pub use actuator::Actuator;
pub use client::{KubeMachineClient, MachineClient};
pub use connection::{ConnectionSupervisor, EngineVersionSource};
pub use validation::{validate_machine, AUTO_PINNING_MIN_VERSION};
