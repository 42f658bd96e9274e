//! oVirt engine API seam
//!
//! [`EngineConnector`] authenticates and hands out [`EngineSession`]s. The
//! REST implementation talks to a real engine; the in-memory engine behind
//! the `test-support` feature backs tests. [`version`] holds the ordered
//! version type used by capability gates.

#![deny(missing_docs)]

#[cfg(any(test, feature = "test-support"))]
pub mod fake;
pub mod rest;
pub mod session;
pub mod version;

pub use rest::RestEngineConnector;
pub use session::{CpuTopology, EngineConnector, EngineSession, Vm, VmRequest};
pub use version::{version_compare, EngineVersion};
