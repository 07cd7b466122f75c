// kyc-realtime-kit/src/config.rs

//! Environment-driven configuration of the portal client.

use crate::realtime::types::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;
use tracing::{info, warn};

pub const API_URL_VAR: &str = "KYC_API_URL";
pub const SOCKET_URL_VAR: &str = "KYC_SOCKET_URL";
pub const RECONNECT_ATTEMPTS_VAR: &str = "KYC_RECONNECT_ATTEMPTS";
pub const RECONNECT_DELAY_VAR: &str = "KYC_RECONNECT_DELAY_MS";
pub const FETCH_TIMEOUT_VAR: &str = "KYC_FETCH_TIMEOUT_MS";
pub const CREDENTIAL_PATH_VAR: &str = "KYC_CREDENTIAL_PATH";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalConfig {
    pub api_base_url: String,
    pub socket_url: String,
    pub reconnect: ReconnectPolicy,
    /// Upper bound for a single cached fetch. `None` waits indefinitely.
    pub fetch_timeout_ms: Option<u64>,
    /// Where to persist the credential. `None` keeps it in memory.
    pub credential_path: Option<PathBuf>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000/api".to_string(),
            socket_url: "ws://localhost:5000/ws".to_string(),
            reconnect: ReconnectPolicy::default(),
            fetch_timeout_ms: None,
            credential_path: None,
        }
    }
}

impl PortalConfig {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, falling back to
    /// defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let reconnect = ReconnectPolicy {
            max_attempts: try_load(&lookup, RECONNECT_ATTEMPTS_VAR, defaults.reconnect.max_attempts)?,
            delay_ms: try_load(&lookup, RECONNECT_DELAY_VAR, defaults.reconnect.delay_ms)?,
        };

        Ok(Self {
            api_base_url: try_load(&lookup, API_URL_VAR, defaults.api_base_url)?,
            socket_url: try_load(&lookup, SOCKET_URL_VAR, defaults.socket_url)?,
            reconnect,
            fetch_timeout_ms: try_load_optional(&lookup, FETCH_TIMEOUT_VAR)?,
            credential_path: try_load_optional(&lookup, CREDENTIAL_PATH_VAR)?,
        })
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }
}

fn var<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse<T: FromStr>(key: &'static str, raw: String) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    match raw.parse() {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!("Invalid {key} value: {e}");
            Err(ConfigError::Invalid {
                key,
                value: raw,
                reason: e.to_string(),
            })
        }
    }
}

fn try_load<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
    T::Err: Display,
{
    match var(lookup, key) {
        Some(raw) => parse(key, raw),
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}

fn try_load_optional<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    var(lookup, key).map(|raw| parse(key, raw)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn unset_environment_yields_defaults() {
        let config = PortalConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config, PortalConfig::default());
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.delay(), Duration::from_secs(1));
        assert_eq!(config.fetch_timeout(), None);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = PortalConfig::from_lookup(lookup(&[
            (SOCKET_URL_VAR, "wss://kyc.example.com/ws"),
            (RECONNECT_ATTEMPTS_VAR, "2"),
            (RECONNECT_DELAY_VAR, " 250 "),
            (FETCH_TIMEOUT_VAR, "3000"),
            (CREDENTIAL_PATH_VAR, "/tmp/kyc.json"),
        ]))
        .unwrap();

        assert_eq!(config.socket_url, "wss://kyc.example.com/ws");
        assert_eq!(config.reconnect, ReconnectPolicy::new(2, Duration::from_millis(250)));
        assert_eq!(config.fetch_timeout(), Some(Duration::from_secs(3)));
        assert_eq!(config.credential_path, Some(PathBuf::from("/tmp/kyc.json")));
        assert_eq!(config.api_base_url, "http://localhost:5000/api");
    }

    #[test]
    fn unparsable_values_are_reported_with_their_key() {
        let err = PortalConfig::from_lookup(lookup(&[(RECONNECT_ATTEMPTS_VAR, "many")])).unwrap_err();

        let ConfigError::Invalid { key, value, .. } = err;
        assert_eq!(key, RECONNECT_ATTEMPTS_VAR);
        assert_eq!(value, "many");
    }
}
