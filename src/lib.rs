//! Blueprint Bridge – remote mutation client for a live editor host
//!
//! This crate implements the in-editor side of an automation link:
//! - A resilient WebSocket connection with exponential-backoff reconnection
//! - A JSON-RPC 2.0 envelope codec with structural kind inference
//! - Request correlation with at-most-one resolution per id
//! - A command dispatcher that creates class assets and writes typed
//!   property values, marshalled onto a single host mutation thread

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Connection, protocol and host-mutation modules
pub mod bridge;

// Re-export key types for convenience
pub use bridge::{BridgeClient, BridgeConfig};

/// Current version of the bridge
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol version advertised to the counterpart
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC version carried by every envelope
pub const JSONRPC_VERSION: &str = "2.0";

/// Name reported by `get_server_status`
pub const PLUGIN_NAME: &str = "BlueprintBridge";
