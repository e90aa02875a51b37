//! Error types for StateNet.
//!
//! All errors in StateNet are strongly typed using thiserror.
//! Validation errors come from malformed input at the public boundary;
//! execution errors come from operations the graph refuses to perform.

use thiserror::Error;

/// Validation errors that occur during input validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid namespace '{namespace}': {reason}")]
    InvalidNamespace {
        namespace: String,
        reason: String,
    },

    #[error("Invalid handler: {reason}")]
    InvalidHandler {
        reason: String,
    },

    #[error("Invalid listener id '{id}'")]
    InvalidListenerId {
        id: String,
    },

    #[error("Unknown instruction '{name}'")]
    UnknownInstruction {
        name: String,
    },

    #[error("Invalid value for instruction '{name}': {reason}")]
    InvalidInstructionValue {
        name: String,
        reason: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        reason: String,
    },

    #[error("Invalid key '{key}': {reason}")]
    InvalidKey {
        key: String,
        reason: String,
    },
}

/// Execution errors raised by graph operations.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Unauthorized access: {operation} on '{namespace}'")]
    UnauthorizedAccess {
        operation: String,
        namespace: String,
    },

    #[error("Instruction '{name}' is read-only")]
    ReadOnlyInstructionViolation {
        name: String,
    },

    #[error("Instruction '{name}' does not support {operation}")]
    InvalidInstructionOperation {
        name: String,
        operation: String,
    },

    #[error("Cannot {operation} '{namespace}': {reason}")]
    ImmutableViolation {
        operation: String,
        namespace: String,
        reason: String,
    },

    #[error("Not implemented: {feature}")]
    NotImplemented {
        feature: String,
    },

    #[error("Node is detached from the graph (last seen at '{namespace}')")]
    DetachedNode {
        namespace: String,
    },

    #[error("'{namespace}' is not a container")]
    NotAContainer {
        namespace: String,
    },

    #[error("'{namespace}' is not invocable")]
    NotInvocable {
        namespace: String,
    },

    #[error("Attaching '{source_namespace}' at '{target_namespace}' would create a cycle")]
    CyclicReference {
        source_namespace: String,
        target_namespace: String,
    },

    #[error("External reference to '{namespace}' rejected: {reason}")]
    ExternalReference {
        namespace: String,
        reason: String,
    },

    #[error("Handler for '{namespace}' panicked: {message}")]
    HandlerPanicked {
        namespace: String,
        message: String,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },
}

/// Top-level error type for StateNet.
#[derive(Debug, Error)]
pub enum StateNetError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl StateNetError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Shorthand for an `InvalidNamespace` validation error.
    #[must_use]
    pub fn invalid_namespace(namespace: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation(ValidationError::InvalidNamespace {
            namespace: namespace.into(),
            reason: reason.into(),
        })
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Result type alias for StateNet operations.
pub type StateNetResult<T> = Result<T, StateNetError>;
