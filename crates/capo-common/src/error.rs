//! Error types for the oVirt machine provider
//!
//! Errors are structured with fields to aid debugging in production. The
//! three operation-level categories map onto the machine API's status
//! reasons: configuration errors are never retried automatically, connection
//! errors are transient, and remote operation errors carry the engine's own
//! retry hint.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Lifecycle operation a remote error belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Creating the VM backing a machine
    Create,
    /// Refreshing an existing machine
    Update,
    /// Removing the VM backing a machine
    Delete,
    /// Read-only lookups (exists, search)
    Query,
}

impl Operation {
    /// Lowercase name used in messages and log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Query => "query",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for machine provider operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The machine provider spec violates a validation rule
    #[error("invalid machine configuration for {machine}: {message}")]
    InvalidMachineConfiguration {
        /// Name of the machine with invalid configuration
        machine: String,
        /// Description of what's invalid
        message: String,
    },

    /// Credential resolution or authentication against the engine failed
    #[error("connection error: {message}")]
    Connection {
        /// Description of the step that failed
        message: String,
    },

    /// The engine rejected a lifecycle call
    #[error("remote {operation} error for {machine}: {message}")]
    RemoteOperation {
        /// Name of the machine being operated on
        machine: String,
        /// Which lifecycle call failed
        operation: Operation,
        /// Description of what failed
        message: String,
        /// Whether the engine response suggests a retry may succeed
        retryable: bool,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The payload kind being processed (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "watcher", "controller")
        context: String,
    },
}

impl Error {
    /// Create a configuration error without machine context
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidMachineConfiguration {
            machine: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection {
            message: msg.into(),
        }
    }

    /// Create a retryable remote operation error
    pub fn remote(operation: Operation, msg: impl Into<String>) -> Self {
        Self::RemoteOperation {
            machine: UNKNOWN_CONTEXT.to_string(),
            operation,
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a remote operation error with explicit retry hint
    pub fn remote_with_hint(operation: Operation, msg: impl Into<String>, retryable: bool) -> Self {
        Self::RemoteOperation {
            machine: UNKNOWN_CONTEXT.to_string(),
            operation,
            message: msg.into(),
            retryable,
        }
    }

    /// Create a serialization error with payload kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Attach a machine name to errors that carry one
    ///
    /// Errors produced below the actuator (validator, engine client) do not
    /// know which machine they belong to; the actuator stamps it on.
    pub fn for_machine(self, name: &str) -> Self {
        match self {
            Error::InvalidMachineConfiguration { message, .. } => {
                Error::InvalidMachineConfiguration {
                    machine: name.to_string(),
                    message,
                }
            }
            Error::RemoteOperation {
                operation,
                message,
                retryable,
                ..
            } => Error::RemoteOperation {
                machine: name.to_string(),
                operation,
                message,
                retryable,
            },
            other => other,
        }
    }

    /// Check if this error is retryable
    ///
    /// Configuration and serialization errors require a spec fix. Connection
    /// errors are transient. Remote errors follow the engine's hint.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                !matches!(source, kube::Error::Api(ae) if (400..500).contains(&ae.code))
            }
            Error::InvalidMachineConfiguration { .. } => false,
            Error::Connection { .. } => true,
            Error::RemoteOperation { retryable, .. } => *retryable,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the machine name if this error is associated with one
    pub fn machine(&self) -> Option<&str> {
        match self {
            Error::InvalidMachineConfiguration { machine, .. } => Some(machine),
            Error::RemoteOperation { machine, .. } => Some(machine),
            _ => None,
        }
    }

    /// The human-readable message without the category prefix
    pub fn message(&self) -> String {
        match self {
            Error::Kube { source } => source.to_string(),
            Error::InvalidMachineConfiguration { message, .. }
            | Error::Connection { message }
            | Error::RemoteOperation { message, .. }
            | Error::Serialization { message, .. }
            | Error::Internal { message, .. } => message.clone(),
        }
    }

    /// Machine API `status.errorReason` value for this error
    ///
    /// Connection and unclassified failures are reported against the
    /// operation that was in progress.
    pub fn machine_status_reason(&self, during: Operation) -> &'static str {
        match self {
            Error::InvalidMachineConfiguration { .. } | Error::Serialization { .. } => {
                "InvalidConfiguration"
            }
            Error::RemoteOperation { operation, .. } => operation_reason(*operation),
            _ => operation_reason(during),
        }
    }
}

fn operation_reason(operation: Operation) -> &'static str {
    match operation {
        Operation::Create => "CreateError",
        Operation::Update | Operation::Query => "UpdateError",
        Operation::Delete => "DeleteError",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_not_retried() {
        let err = Error::invalid_configuration("UserDataSecret must be provided");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("invalid machine configuration"));
        assert_eq!(err.machine(), Some(UNKNOWN_CONTEXT));
    }

    #[test]
    fn connection_errors_are_transient() {
        let err = Error::connection("failed getting credentials");
        assert!(err.is_retryable());
        assert_eq!(err.machine(), None);
        assert_eq!(err.message(), "failed getting credentials");
    }

    #[test]
    fn remote_errors_follow_engine_hint() {
        assert!(Error::remote(Operation::Create, "timeout").is_retryable());
        assert!(!Error::remote_with_hint(Operation::Create, "quota", false).is_retryable());
    }

    #[test]
    fn for_machine_stamps_name() {
        let err = Error::invalid_configuration("bad").for_machine("worker-0");
        assert_eq!(err.machine(), Some("worker-0"));
        assert!(err.to_string().contains("worker-0"));

        let err = Error::remote(Operation::Delete, "locked").for_machine("worker-1");
        assert_eq!(err.machine(), Some("worker-1"));

        // Errors without a machine slot pass through unchanged
        let err = Error::connection("down").for_machine("worker-2");
        assert_eq!(err.machine(), None);
    }

    #[test]
    fn status_reasons_map_to_machine_api_values() {
        assert_eq!(
            Error::invalid_configuration("x").machine_status_reason(Operation::Create),
            "InvalidConfiguration"
        );
        assert_eq!(
            Error::connection("x").machine_status_reason(Operation::Update),
            "UpdateError"
        );
        assert_eq!(
            Error::remote(Operation::Delete, "x").machine_status_reason(Operation::Update),
            "DeleteError"
        );
        assert_eq!(
            Error::internal("x").machine_status_reason(Operation::Create),
            "CreateError"
        );
    }

    #[test]
    fn internal_error_with_context() {
        let err = Error::internal_with_context("watcher", "stream closed");
        assert!(err.to_string().contains("[watcher]"));
        assert!(err.is_retryable());
    }
}
