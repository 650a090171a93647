// =============================================================================
// Matrixon Matrix NextServer - Configuration Module
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// Description:
//   Server configuration, read from a TOML file and `MATRIXON_` environment
//   variables (nested keys separated by `__`, e.g. `MATRIXON_SYNC__MAX_TIMEOUT_MS`).
//
// =============================================================================

use std::{
    collections::BTreeMap,
    net::{IpAddr, Ipv4Addr},
    path::Path,
    time::Duration,
};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use ruma::{OwnedServerName, OwnedUserId};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server_name: OwnedServerName,
    #[serde(default = "default_address")]
    pub address: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// `EnvFilter` directives
    #[serde(default = "default_log")]
    pub log: String,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub federation: FederationConfig,
    /// Static bearer tokens and the user each one authenticates.
    #[serde(default)]
    pub access_tokens: BTreeMap<String, OwnedUserId>,
}

/// Long-poll defaults and caps for `/sync`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Used when the request carries no `timeout` (milliseconds)
    #[serde(default = "default_sync_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Upper bound for client supplied timeouts (milliseconds)
    #[serde(default = "default_sync_max_timeout_ms")]
    pub max_timeout_ms: u64,
    /// Timeline events per room when the request carries no limit
    #[serde(default = "default_sync_limit")]
    pub default_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_sync_timeout_ms(),
            max_timeout_ms: default_sync_max_timeout_ms(),
            default_limit: default_sync_limit(),
        }
    }
}

impl SyncConfig {
    /// The effective timeout of a request.
    pub fn timeout(&self, requested_ms: Option<u64>) -> Duration {
        Duration::from_millis(
            requested_ms
                .unwrap_or(self.default_timeout_ms)
                .min(self.max_timeout_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationConfig {
    #[serde(default = "true_fn")]
    pub allow_federation: bool,
    /// Pinned verify keys of remote servers: server name -> key ID -> key.
    #[serde(default)]
    pub trusted_keys: BTreeMap<OwnedServerName, BTreeMap<String, PinnedKey>>,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            allow_federation: true,
            trusted_keys: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinnedKey {
    /// Unpadded base64 ed25519 public key
    pub key: String,
    #[serde(default = "default_valid_until_ts")]
    pub valid_until_ts: u64,
}

impl Config {
    /// Minimal configuration for `server_name`, everything else defaulted.
    pub fn new(server_name: OwnedServerName) -> Self {
        Self {
            server_name,
            address: default_address(),
            port: default_port(),
            log: default_log(),
            sync: SyncConfig::default(),
            federation: FederationConfig::default(),
            access_tokens: BTreeMap::new(),
        }
    }

    /// Reads the TOML file at `path`, then the environment on top of it.
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file(path))
                .merge(Env::prefixed("MATRIXON_").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment
            .extract()
            .map_err(|e| Error::bad_config(format!("Invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.sync.max_timeout_ms == 0 {
            return Err(Error::bad_config("sync.max_timeout_ms must be positive"));
        }
        if self.sync.default_limit == 0 {
            return Err(Error::bad_config("sync.default_limit must be positive"));
        }
        if self.access_tokens.is_empty() {
            warn!("⚠️ No access tokens configured, client endpoints will reject every request");
        }
        for (server, keys) in &self.federation.trusted_keys {
            for (key_id, key) in keys {
                decode_key(server, key_id, key)?;
            }
        }
        Ok(())
    }

    /// Pinned verify keys decoded: `(server, key ID, public key, valid until)`.
    pub fn trusted_keys(&self) -> Result<Vec<(OwnedServerName, String, Vec<u8>, u64)>> {
        let mut decoded = Vec::new();
        for (server, keys) in &self.federation.trusted_keys {
            for (key_id, key) in keys {
                decoded.push((
                    server.clone(),
                    key_id.clone(),
                    decode_key(server, key_id, key)?,
                    key.valid_until_ts,
                ));
            }
        }
        Ok(decoded)
    }
}

fn decode_key(server: &OwnedServerName, key_id: &str, key: &PinnedKey) -> Result<Vec<u8>> {
    if !key_id.starts_with("ed25519:") {
        return Err(Error::bad_config(format!(
            "Unsupported key algorithm {key_id} for {server}"
        )));
    }
    STANDARD_NO_PAD
        .decode(&key.key)
        .map_err(|e| Error::bad_config(format!("Invalid key {key_id} for {server}: {e}")))
}

fn default_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    8008
}

fn default_log() -> String {
    "warn,matrixon_stream=info,tower_http=info".to_owned()
}

fn default_sync_timeout_ms() -> u64 {
    30_000
}

fn default_sync_max_timeout_ms() -> u64 {
    300_000
}

fn default_sync_limit() -> usize {
    20
}

fn default_valid_until_ts() -> u64 {
    u64::MAX
}

fn true_fn() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Result<Config> {
        Config::from_figment(Figment::new().merge(Toml::string(toml)))
    }

    #[test]
    fn test_defaults() {
        let config = parse(r#"server_name = "hs1""#).unwrap();
        assert_eq!(config.port, 8008);
        assert_eq!(config.sync.default_limit, 20);
        assert!(config.federation.allow_federation);
        assert_eq!(config.sync.timeout(None), Duration::from_secs(30));
    }

    #[test]
    fn test_timeout_is_clamped() {
        let config = parse(
            r#"
            server_name = "hs1"
            [sync]
            max_timeout_ms = 60000
            "#,
        )
        .unwrap();
        assert_eq!(config.sync.timeout(Some(120_000)), Duration::from_secs(60));
        assert_eq!(config.sync.timeout(Some(0)), Duration::ZERO);
    }

    #[test]
    fn test_tokens_and_pinned_keys() {
        let config = parse(
            r#"
            server_name = "hs1"
            [access_tokens]
            secret = "@alice:hs1"
            [federation.trusted_keys."hs2"."ed25519:a"]
            key = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8"
            valid_until_ts = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.access_tokens["secret"].as_str(), "@alice:hs1");
        let keys = config.trusted_keys().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].2.len(), 32);
        assert_eq!(keys[0].3, 1000);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(parse("port = 1"), Err(Error::BadConfig(_))));
        assert!(parse(
            r#"
            server_name = "hs1"
            [federation.trusted_keys."hs2"."rsa:a"]
            key = "AAAA"
            "#
        )
        .is_err());
    }
}
