//! Gateway configuration.
//!
//! [`GatewayConfig`] covers the HTTP surface. [`ServerSettings`] is everything
//! the binary needs to start, read from the process environment:
//!
//! | Variable                      | Default             |
//! |-------------------------------|---------------------|
//! | `LISTEN_ADDR`                 | `0.0.0.0:4320`      |
//! | `CORS_ORIGINS` (comma list)   | `*`                 |
//! | `WEBSOCKET_TIMEOUT_SECONDS`   | `300`               |
//! | `MAX_BODY_BYTES`              | `2097152`           |
//! | `REQUEST_TIMEOUT_SECONDS`     | `30`                |
//! | `DATA_DIR`                    | `/data/fleetwatch`  |
//! | `CURSOR_SECRET` (64 hex)      | random per process  |
//! | `LIVENESS_THRESHOLD_SECONDS`  | `60`                |
//! | `MAX_COMMANDS_PER_REPLY`      | `16`                |

use std::str::FromStr;
use std::time::Duration;

use fleetwatch_control::ControlConfig;
use fleetwatch_core::CursorCodec;
use serde::Deserialize;

const DEFAULT_DATA_DIR: &str = "/data/fleetwatch";

/// A setting that could not be used.
#[derive(Debug, thiserror::Error)]
#[error("invalid {name}: {reason}")]
pub struct ConfigError {
    /// The environment variable at fault.
    pub name: &'static str,
    /// What is wrong with its value.
    pub reason: String,
}

/// Configuration for the HTTP surface.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Listen address (e.g., "0.0.0.0:4320").
    #[serde(default = "GatewayConfig::default_listen_addr")]
    pub listen_addr: String,

    /// Origins allowed to call the admin API; `*` allows any.
    #[serde(default = "GatewayConfig::default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Agent connections silent for this long are closed (seconds).
    #[serde(default = "GatewayConfig::default_ws_timeout")]
    pub websocket_timeout_seconds: u64,

    /// Maximum request body size in bytes.
    #[serde(default = "GatewayConfig::default_max_body")]
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    #[serde(default = "GatewayConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl GatewayConfig {
    fn default_listen_addr() -> String {
        "0.0.0.0:4320".to_string()
    }

    fn default_cors_origins() -> Vec<String> {
        vec!["*".to_string()]
    }

    const fn default_ws_timeout() -> u64 {
        300
    }

    const fn default_max_body() -> usize {
        2 * 1024 * 1024
    }

    const fn default_request_timeout() -> u64 {
        30
    }

    /// Agent idle timeout.
    #[must_use]
    pub fn websocket_timeout(&self) -> Duration {
        Duration::from_secs(self.websocket_timeout_seconds)
    }

    /// Per-request timeout for the admin API.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: Self::default_listen_addr(),
            cors_origins: Self::default_cors_origins(),
            websocket_timeout_seconds: Self::default_ws_timeout(),
            max_body_bytes: Self::default_max_body(),
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }
}

/// Everything the server binary needs to start.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// HTTP surface.
    pub gateway: GatewayConfig,
    /// Control plane tuning.
    pub control: ControlConfig,
    /// `RocksDB` directory.
    pub data_dir: String,
    /// Signing key for continuation tokens, if one was configured.
    pub cursor: Option<CursorCodec>,
}

impl ServerSettings {
    /// Read settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set to an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`, which returns the raw value of a
    /// variable or `None` when it is unset. Blank values count as unset.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set to an unusable value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut gateway = GatewayConfig::default();
        if let Some(addr) = get("LISTEN_ADDR") {
            gateway.listen_addr = addr;
        }
        if let Some(origins) = get("CORS_ORIGINS") {
            gateway.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(raw) = get("WEBSOCKET_TIMEOUT_SECONDS") {
            gateway.websocket_timeout_seconds = parse("WEBSOCKET_TIMEOUT_SECONDS", &raw)?;
        }
        if let Some(raw) = get("MAX_BODY_BYTES") {
            gateway.max_body_bytes = parse("MAX_BODY_BYTES", &raw)?;
        }
        if let Some(raw) = get("REQUEST_TIMEOUT_SECONDS") {
            gateway.request_timeout_seconds = parse("REQUEST_TIMEOUT_SECONDS", &raw)?;
        }

        let mut control = ControlConfig::default();
        if let Some(raw) = get("LIVENESS_THRESHOLD_SECONDS") {
            control.liveness_threshold_seconds = parse("LIVENESS_THRESHOLD_SECONDS", &raw)?;
        }
        if let Some(raw) = get("MAX_COMMANDS_PER_REPLY") {
            control.max_commands_per_reply = parse("MAX_COMMANDS_PER_REPLY", &raw)?;
        }

        let cursor = get("CURSOR_SECRET")
            .map(|secret| {
                CursorCodec::from_hex(&secret).ok_or_else(|| ConfigError {
                    name: "CURSOR_SECRET",
                    reason: "expected 64 hex characters".to_string(),
                })
            })
            .transpose()?;

        Ok(Self {
            gateway,
            control,
            data_dir: get("DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
            cursor,
        })
    }
}

fn parse<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError {
        name,
        reason: format!("{raw:?}: {e}"),
    })
}
