//! Error types for the bridge
//!
//! Domain errors use thiserror and are converted into `OperationResult`
//! failures at the handler boundary; transport errors feed the reconnection
//! policy and never surface as command failures.

use serde_json::Value;
use std::io;
use thiserror::Error;

/// Top-level bridge error
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connection manager errors
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Request tracker errors
    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    /// Mutation executor errors
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),
}

/// Envelope parse failures (protocol class)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Frame text is not JSON at all
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// Frame is JSON but not an object
    #[error("envelope must be a JSON object")]
    NotAnObject,

    /// `jsonrpc` member is absent or not "2.0"
    #[error("unsupported jsonrpc version: {0}")]
    UnsupportedVersion(String),

    /// A member has the wrong JSON type
    #[error("invalid field '{field}': {detail}")]
    InvalidField {
        /// Member name
        field: &'static str,
        /// What was wrong with it
        detail: String,
    },

    /// Neither `method` nor `result`/`error` is present
    #[error("envelope is neither a request, notification nor response")]
    UnrecognizedShape,

    /// Carries members of more than one kind
    #[error("ambiguous envelope: {0}")]
    Ambiguous(&'static str),
}

/// Convenience result alias for codec operations
pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Transport-level failures (always routed through the reconnection policy)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Remote refused or could not be reached
    #[error("connection refused: {0}")]
    Refused(String),

    /// Connect did not finish in time
    #[error("connection timed out after {0} ms")]
    TimedOut(u64),

    /// Link closed underneath us
    #[error("connection closed: {0}")]
    Closed(String),

    /// Any other I/O or protocol failure
    #[error("transport failure: {0}")]
    Io(String),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// Errors returned by the connection handle
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// Operation requires an established link
    #[error("not connected")]
    NotConnected,

    /// The manager is in the Disabled state
    #[error("connection is disabled")]
    Disabled,

    /// The manager task has exited
    #[error("connection manager stopped")]
    ManagerStopped,

    /// The endpoint resolver could not produce a URL
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Convenience result alias for connection operations
pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

/// Request tracker errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// An entry with the same id is already in flight
    #[error("request '{0}' is already pending")]
    DuplicateId(String),

    /// No entry with that id (never registered, or already resolved)
    #[error("request '{0}' not found")]
    NotFound(String),
}

/// Terminal failure delivered to the caller of an outbound request
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestFailure {
    /// Link went away before the response arrived
    #[error("connection closed before a response arrived")]
    ConnectionClosed,

    /// No response within the configured timeout
    #[error("request timed out after {0} ms")]
    TimedOut(u64),

    /// Counterpart answered with an error member
    #[error("remote error: {0}")]
    Remote(Value),
}

/// Property mutation failures (domain class)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    /// Target class has no such property
    #[error("property '{property}' not found on class '{class}'")]
    PropertyNotFound {
        /// Requested property
        property: String,
        /// Class of the target object
        class: String,
    },

    /// Declared type or type hint has no textual conversion
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// Text could not be converted to the requested type
    #[error("cannot convert '{value}' to {kind} for property '{property}': {detail}")]
    Conversion {
        /// Property being written
        property: String,
        /// Target type name
        kind: String,
        /// Raw input text
        value: String,
        /// Parser detail
        detail: String,
    },

    /// Type hint disagrees with the declared property type
    #[error("type hint '{hint}' does not match property '{property}' of type {declared}")]
    TypeMismatch {
        /// Property being written
        property: String,
        /// Hint supplied by the caller
        hint: String,
        /// Declared type of the property
        declared: String,
    },
}

/// Convenience result alias for mutation operations
pub type MutationResult<T> = std::result::Result<T, MutationError>;

/// Class asset factory failures (domain class)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FactoryError {
    /// Asset or component name failed validation
    #[error("invalid name '{name}': {reason}")]
    InvalidName {
        /// Offending name
        name: String,
        /// Which rule it broke
        reason: &'static str,
    },

    /// Namespace path failed validation
    #[error("invalid asset path '{path}': {reason}")]
    InvalidPath {
        /// Offending path
        path: String,
        /// Which rule it broke
        reason: &'static str,
    },

    /// Parent class is unknown
    #[error("parent class '{0}' not found")]
    ParentNotFound(String),

    /// Parent class exists but cannot be instantiated
    #[error("class '{class}' is not instantiable ({reason})")]
    NotInstantiable {
        /// Class name
        class: String,
        /// abstract / deprecated / interface
        reason: &'static str,
    },

    /// An asset already lives at the resolved path
    #[error("an asset already exists at '{0}'")]
    Collision(String),

    /// No asset at the given path
    #[error("asset '{0}' not found")]
    AssetNotFound(String),

    /// Asset lives under a protected prefix
    #[error("asset '{0}' is protected from remote modification")]
    Protected(String),

    /// Component class is unknown
    #[error("component class '{0}' not found")]
    ComponentClassNotFound(String),

    /// Class is not a component class
    #[error("class '{0}' is not a component class")]
    NotAComponent(String),

    /// Component name already used on the asset
    #[error("component '{component}' already exists on '{asset}'")]
    DuplicateComponent {
        /// Asset path
        asset: String,
        /// Component name
        component: String,
    },

    /// Compilation recorded an error status
    #[error("compilation failed for '{path}': {detail}")]
    CompileFailed {
        /// Asset path
        path: String,
        /// First problem found
        detail: String,
    },
}

/// Convenience result alias for factory operations
pub type FactoryResult<T> = std::result::Result<T, FactoryError>;

/// Mutation executor errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    /// Worker thread could not be started
    #[error("failed to start mutation worker: {0}")]
    Spawn(String),

    /// Worker thread has exited
    #[error("mutation worker stopped")]
    Stopped,

    /// A job panicked on the worker
    #[error("mutation job panicked")]
    JobPanicked,
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Setting out of range or malformed
    #[error("invalid setting '{field}': {detail}")]
    Invalid {
        /// Setting name
        field: &'static str,
        /// What was wrong
        detail: String,
    },
}

/// Convenience result alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
