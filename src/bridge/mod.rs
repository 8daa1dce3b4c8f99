//! Bridge core
//!
//! This module contains the connection, protocol and host-mutation
//! machinery. Configuration types live here; each component lives in its
//! own submodule.

pub mod client;
pub mod codec;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod factory;
pub mod host;
pub mod mutator;
pub mod storage;
pub mod tracker;
pub mod transport;

pub use client::BridgeClient;
pub use connection::{ConnectionHandle, ConnectionState, StateChange};
pub use error::{BridgeError, Result};

use error::{ConfigError, ConfigResult, ConnectionError, ConnectionResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnection backoff policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Reconnect automatically after an unclean loss of the link
    pub enabled: bool,

    /// Delay before the first retry, in milliseconds
    pub base_delay_ms: u64,

    /// Upper bound on any single delay, in milliseconds
    pub max_delay_ms: u64,

    /// Retries allowed before settling in Failed
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (zero-based): `min(base * 2^attempt, cap)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let millis = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(millis)
    }
}

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Host name or address of the counterpart
    pub server_address: String,

    /// Port of the counterpart
    pub server_port: u16,

    /// Path component of the WebSocket URL
    pub endpoint_path: String,

    /// Use `wss://` instead of `ws://`
    pub use_tls: bool,

    /// Connect as soon as the client starts
    pub auto_connect: bool,

    /// When false the connection starts in the Disabled state
    pub enabled: bool,

    /// Backoff policy
    pub reconnect: ReconnectPolicy,

    /// Transport connect timeout, in milliseconds
    pub connect_timeout_ms: u64,

    /// Outbound request timeout, in milliseconds (0 disables)
    pub request_timeout_ms: u64,

    /// Namespace every asset path must live under
    pub content_root: String,

    /// Namespace used when a create request omits `asset_path`
    pub default_asset_path: String,

    /// Prefixes whose assets reject remote modification
    pub protected_paths: Vec<String>,

    /// Enable debug-level logging in the CLI
    pub verbose_logging: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server_address: "localhost".to_string(),
            server_port: 6277,
            endpoint_path: "/".to_string(),
            use_tls: false,
            auto_connect: false,
            enabled: true,
            reconnect: ReconnectPolicy::default(),
            connect_timeout_ms: 30_000,
            request_timeout_ms: 30_000,
            content_root: "/Game/".to_string(),
            default_asset_path: "/Game/Blueprints/".to_string(),
            protected_paths: vec!["/Game/Core/".to_string()],
            verbose_logging: false,
        }
    }
}

impl BridgeConfig {
    /// Check every setting against its allowed range.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.server_address.trim().is_empty() {
            return Err(invalid("server_address", "must not be empty"));
        }
        if self.server_port == 0 {
            return Err(invalid("server_port", "must be between 1 and 65535"));
        }
        if !self.endpoint_path.starts_with('/') {
            return Err(invalid("endpoint_path", "must start with '/'"));
        }
        if self.reconnect.max_attempts > 100 {
            return Err(invalid("reconnect.max_attempts", "must be between 0 and 100"));
        }
        if self.reconnect.base_delay_ms == 0 {
            return Err(invalid("reconnect.base_delay_ms", "must be positive"));
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(invalid(
                "reconnect.max_delay_ms",
                "must not be smaller than base_delay_ms",
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(invalid("connect_timeout_ms", "must be positive"));
        }
        if !self.content_root.starts_with('/') || !self.content_root.ends_with('/') {
            return Err(invalid("content_root", "must start and end with '/'"));
        }
        if !self.default_asset_path.starts_with(&self.content_root) {
            return Err(invalid(
                "default_asset_path",
                "must live under content_root",
            ));
        }
        Ok(())
    }

    /// Transport connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Outbound request timeout, `None` when disabled
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    /// Whether `path` falls under one of the protected prefixes
    pub fn is_protected(&self, path: &str) -> bool {
        self.protected_paths
            .iter()
            .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
    }
}

fn invalid(field: &'static str, detail: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        detail: detail.to_string(),
    }
}

/// A ready-to-dial connection target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Full WebSocket URL
    pub url: String,
    /// Whether the URL uses TLS
    pub tls: bool,
}

/// Supplies the endpoint to dial on each connection attempt
pub trait EndpointResolver: Send + Sync {
    /// Produce the current endpoint.
    fn resolve(&self) -> ConnectionResult<Endpoint>;
}

impl EndpointResolver for BridgeConfig {
    fn resolve(&self) -> ConnectionResult<Endpoint> {
        let address = self.server_address.trim();
        if address.is_empty() {
            return Err(ConnectionError::InvalidEndpoint(
                "server address is empty".into(),
            ));
        }
        if self.server_port == 0 {
            return Err(ConnectionError::InvalidEndpoint("server port is 0".into()));
        }
        let path = if self.endpoint_path.starts_with('/') {
            self.endpoint_path.clone()
        } else {
            format!("/{}", self.endpoint_path)
        };
        let scheme = if self.use_tls { "wss" } else { "ws" };
        Ok(Endpoint {
            url: format!("{scheme}://{address}:{}{path}", self.server_port),
            tls: self.use_tls,
        })
    }
}

impl EndpointResolver for Endpoint {
    fn resolve(&self) -> ConnectionResult<Endpoint> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = BridgeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.server_port, 6277);
        assert_eq!(config.reconnect.max_attempts, 10);
        assert!(config.is_protected("/Game/Core/Player"));
        assert!(!config.is_protected("/Game/Blueprints/Player"));
    }

    #[test]
    fn validate_rejects_out_of_range_settings() {
        let mut config = BridgeConfig::default();
        config.endpoint_path = "mcp".into();
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.reconnect.max_attempts = 101;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.server_port = 0;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.default_asset_path = "/Engine/Blueprints/".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_doubles_until_cap() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(32));
        assert_eq!(policy.delay_for(5), Duration::from_secs(60));
        assert_eq!(policy.delay_for(63), Duration::from_secs(60));
        assert_eq!(policy.delay_for(200), Duration::from_secs(60));
    }

    #[test]
    fn resolver_builds_websocket_url() {
        let mut config = BridgeConfig::default();
        assert_eq!(config.resolve().unwrap().url, "ws://localhost:6277/");

        config.use_tls = true;
        config.server_address = "editor.local".into();
        config.endpoint_path = "mcp".into();
        let endpoint = config.resolve().unwrap();
        assert_eq!(endpoint.url, "wss://editor.local:6277/mcp");
        assert!(endpoint.tls);
    }

    #[test]
    fn config_deserializes_with_missing_fields() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{"server_port": 9000, "reconnect": {"max_attempts": 3}}"#)
                .unwrap();
        assert_eq!(config.server_port, 9000);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.base_delay_ms, 2_000);
        assert_eq!(config.server_address, "localhost");
    }
}
