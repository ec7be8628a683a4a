//! Configuration loaded from the environment.
//!
//! `.env` is read first (via dotenvy) so local overrides work without
//! exporting variables by hand.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::error::ConfigError;

/// Default bound for a dispatched command, matching what agents expect.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Top-level configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub broker: BrokerConfig,
}

/// HTTP/websocket gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
    /// Allow any origin on the HTTP API.
    pub cors_permissive: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_permissive: true,
        }
    }
}

impl GatewayConfig {
    /// Resolve the bind address.
    pub fn addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.host.parse().map_err(|e| ConfigError::InvalidValue {
            key: "CIMUT_HOST".to_string(),
            message: format!("'{}' is not an IP address: {}", self.host, e),
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Broker tuning.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Timeout applied when a caller does not supply one.
    pub command_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl Config {
    /// Load configuration from `.env` and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let gateway = GatewayConfig {
            host: lookup("CIMUT_HOST").unwrap_or(defaults.gateway.host),
            port: parse_var(&lookup, "CIMUT_PORT")?.unwrap_or(defaults.gateway.port),
            cors_permissive: parse_bool(&lookup, "CIMUT_CORS_PERMISSIVE")?
                .unwrap_or(defaults.gateway.cors_permissive),
        };

        let broker = BrokerConfig {
            command_timeout: parse_var::<u64, _>(&lookup, "CIMUT_COMMAND_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.broker.command_timeout),
        };

        if broker.command_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "CIMUT_COMMAND_TIMEOUT_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self { gateway, broker })
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        None => Ok(None),
    }
}

fn parse_bool<F>(lookup: &F, key: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).as_deref().map(str::trim) {
        None => Ok(None),
        Some("1" | "true" | "yes" | "on") => Ok(Some(true)),
        Some("0" | "false" | "no" | "off") => Ok(Some(false)),
        Some(other) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{}'", other),
        }),
    }
}
