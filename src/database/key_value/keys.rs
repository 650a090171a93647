// =============================================================================
// Matrixon Matrix NextServer - Server Keys Storage
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// Remote servers' ed25519 verify keys. Keys are added from configuration or
// by a key fetcher; lookups only return keys valid at the requested time.
//
// =============================================================================

use async_trait::async_trait;
use ruma::{serde::Base64, ServerName};
use tracing::debug;

use crate::{
    database::MemoryDatabase,
    service::federation::keyring::{KeyRing, VerifyKeys},
    Error, Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigningKey {
    pub public_key: Vec<u8>,
    pub valid_until_ts: u64,
}

impl MemoryDatabase {
    pub fn add_signing_key(
        &self,
        server_name: &ServerName,
        key_id: &str,
        public_key: Vec<u8>,
        valid_until_ts: u64,
    ) {
        debug!("🔑 Storing {} of {} valid until {}", key_id, server_name, valid_until_ts);
        self.inner
            .write()
            .signing_keys
            .entry(server_name.to_owned())
            .or_default()
            .insert(
                key_id.to_owned(),
                SigningKey {
                    public_key,
                    valid_until_ts,
                },
            );
    }
}

#[async_trait]
impl KeyRing for MemoryDatabase {
    async fn verify_keys(&self, server_name: &ServerName, valid_at_ts: u64) -> Result<VerifyKeys> {
        let keys: VerifyKeys = self
            .inner
            .read()
            .signing_keys
            .get(server_name)
            .into_iter()
            .flatten()
            .filter(|(_, key)| key.valid_until_ts >= valid_at_ts)
            .map(|(key_id, key)| (key_id.clone(), Base64::new(key.public_key.clone())))
            .collect();

        if keys.is_empty() {
            return Err(Error::NotFound(format!(
                "No signing keys of {server_name} valid at {valid_at_ts}"
            )));
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruma::server_name;

    #[tokio::test]
    async fn test_only_keys_valid_at_the_time_are_returned() {
        let db = MemoryDatabase::new();
        let hs2 = server_name!("hs2");
        db.add_signing_key(hs2, "ed25519:old", vec![1; 32], 1_000);
        db.add_signing_key(hs2, "ed25519:new", vec![2; 32], 5_000);

        let early = db.verify_keys(hs2, 500).await.unwrap();
        assert_eq!(early.len(), 2);

        let late = db.verify_keys(hs2, 2_000).await.unwrap();
        assert_eq!(late.keys().collect::<Vec<_>>(), vec!["ed25519:new"]);

        assert!(db.verify_keys(hs2, 6_000).await.is_err());
        assert!(db.verify_keys(server_name!("hs3"), 0).await.is_err());
    }
}
