//! Configuration management for the server.

use replimap_engine::{MapConfig, ShapeId, DEFAULT_REMOVAL_HISTORY_LIMIT};
use std::env;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Bearer token required for mutations; open access when unset
    pub auth_secret: Option<String>,
    /// How often deltas are computed for connected observers
    pub tick_interval: Duration,
    /// How long an unacknowledged batch waits before it is sent again
    pub resend_interval: Duration,
    pub map: MapConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup` instead of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let auth_secret = lookup("AUTH_SECRET").filter(|s| !s.is_empty());

        let tick_interval = Duration::from_millis(parse_number(&lookup, "TICK_INTERVAL_MS", 100)?);
        if tick_interval.is_zero() {
            return Err(ConfigError::InvalidNumber("TICK_INTERVAL_MS"));
        }
        let resend_interval =
            Duration::from_millis(parse_number(&lookup, "RESEND_INTERVAL_MS", 1000)?);

        let map = MapConfig {
            restricted_key_shape: parse_shape(&lookup, "RESTRICTED_KEY_SHAPE")?,
            restricted_value_shape: parse_shape(&lookup, "RESTRICTED_VALUE_SHAPE")?,
            removal_history_limit: parse_number(
                &lookup,
                "REMOVAL_HISTORY_LIMIT",
                DEFAULT_REMOVAL_HISTORY_LIMIT as u64,
            )? as usize,
        };

        Ok(Self {
            host,
            port,
            auth_secret,
            tick_interval,
            resend_interval,
            map,
        })
    }
}

fn parse_number(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match lookup(name) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidNumber(name)),
        None => Ok(default),
    }
}

fn parse_shape(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<ShapeId>, ConfigError> {
    match lookup(name).filter(|s| !s.is_empty()) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::UnknownShape { name, value: raw }),
        None => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid {0} value")]
    InvalidNumber(&'static str),

    #[error("Unknown shape '{value}' in {name}")]
    UnknownShape { name: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert!(config.auth_secret.is_none());
        assert_eq!(config.tick_interval, Duration::from_millis(100));
        assert_eq!(config.resend_interval, Duration::from_millis(1000));
        assert_eq!(config.map, MapConfig::default());
    }

    #[test]
    fn shape_restrictions() {
        let config = load(&[
            ("RESTRICTED_KEY_SHAPE", "text"),
            ("RESTRICTED_VALUE_SHAPE", "string_int"),
            ("REMOVAL_HISTORY_LIMIT", "16"),
        ])
        .unwrap();
        assert_eq!(config.map.restricted_key_shape, Some(ShapeId::Text));
        assert_eq!(config.map.restricted_value_shape, Some(ShapeId::StringInt));
        assert_eq!(config.map.removal_history_limit, 16);
    }

    #[test]
    fn invalid_values() {
        assert!(matches!(
            load(&[("PORT", "http")]),
            Err(ConfigError::InvalidPort)
        ));
        assert!(matches!(
            load(&[("TICK_INTERVAL_MS", "0")]),
            Err(ConfigError::InvalidNumber("TICK_INTERVAL_MS"))
        ));
        assert!(matches!(
            load(&[("RESTRICTED_KEY_SHAPE", "quaternion")]),
            Err(ConfigError::UnknownShape { .. })
        ));
    }

    #[test]
    fn empty_secret_is_unset() {
        let config = load(&[("AUTH_SECRET", "")]).unwrap();
        assert!(config.auth_secret.is_none());
    }
}
