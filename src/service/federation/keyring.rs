// =============================================================================
// Matrixon Matrix NextServer - Key Ring Module
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// =============================================================================

use std::collections::BTreeMap;

use async_trait::async_trait;
use ruma::{serde::Base64, ServerName};

use crate::Result;

/// Public verify keys of one server by key ID (`ed25519:abc`).
pub type VerifyKeys = BTreeMap<String, Base64>;

/// Source of remote servers' signing keys.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyRing: Send + Sync {
    /// Keys of `server_name` that were valid at `valid_at_ts` (milliseconds
    /// since the epoch). Fails when none can be found.
    async fn verify_keys(&self, server_name: &ServerName, valid_at_ts: u64) -> Result<VerifyKeys>;
}
