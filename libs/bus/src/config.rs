use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Bus-wide settings
///
/// Every field has a default, so a partial TOML document is enough:
///
/// ```
/// use courier_bus::EventBusConfig;
///
/// let config = EventBusConfig::from_toml_str("default_reply_timeout_ms = 500").unwrap();
/// assert_eq!(config.default_reply_timeout_ms, 500);
/// assert!(!config.strict_marshalling);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Reply timeout applied to correlated sends that do not pass one
    pub default_reply_timeout_ms: u64,

    /// Reject bodies containing opaque values instead of passing them through
    pub strict_marshalling: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            default_reply_timeout_ms: 30_000,
            strict_marshalling: false,
        }
    }
}

impl EventBusConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn default_reply_timeout(&self) -> Duration {
        Duration::from_millis(self.default_reply_timeout_ms)
    }
}

/// Address rule for traffic crossing the bridge
///
/// With neither `address` nor `address_re` set the rule matches every
/// address. `address_re` must match the whole address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermittedOptions {
    pub address: Option<String>,
    pub address_re: Option<String>,
    pub requires_auth: bool,
}

impl PermittedOptions {
    pub fn address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }

    pub fn address_re(pattern: impl Into<String>) -> Self {
        Self {
            address_re: Some(pattern.into()),
            ..Self::default()
        }
    }

    pub fn requiring_auth(mut self) -> Self {
        self.requires_auth = true;
        self
    }
}

/// Settings for an [`EventBusBridge`](crate::bridge::EventBusBridge)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// How long a successful authorisation is trusted for a session
    pub auth_timeout_ms: u64,

    /// Address queried when no authorise hook is installed
    pub auth_address: String,

    /// Rules for messages sent or published by remote peers
    pub inbound_permitted: Vec<PermittedOptions>,

    /// Rules for addresses remote peers may register for
    pub outbound_permitted: Vec<PermittedOptions>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            auth_timeout_ms: 5 * 60 * 1000,
            auth_address: "vertx.basicauthmanager.authorise".to_string(),
            inbound_permitted: Vec::new(),
            outbound_permitted: Vec::new(),
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }
}
