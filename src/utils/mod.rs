// =============================================================================
// Matrixon Matrix NextServer - Utils Module
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// Small helpers shared across services, including canonical JSON
// conversion and signing key generation.
//
// =============================================================================

pub mod error;

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use ruma::{
    canonical_json::try_from_json_map, signatures::Ed25519KeyPair, CanonicalJsonError,
    CanonicalJsonObject,
};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use self::error::{Error, Result};

pub fn millis_since_unix_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

pub fn random_string(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Converts `value` into a canonical JSON object. Floats and integers outside
/// the range JavaScript can represent exactly are rejected.
pub fn to_canonical_object<T: Serialize>(
    value: T,
) -> Result<CanonicalJsonObject, CanonicalJsonError> {
    use serde::ser::Error as _;

    match serde_json::to_value(value).map_err(CanonicalJsonError::SerDe)? {
        JsonValue::Object(map) => try_from_json_map(map),
        _ => Err(CanonicalJsonError::SerDe(serde_json::Error::custom(
            "Value must be an object",
        ))),
    }
}

/// A fresh ed25519 signing key with a random key version.
pub fn generate_keypair() -> Result<Ed25519KeyPair> {
    let document = Ed25519KeyPair::generate()
        .map_err(|e| Error::Internal(format!("Failed to generate signing key: {e}")))?;
    let keypair = Ed25519KeyPair::from_der(&document, random_string(8))
        .map_err(|e| Error::Internal(format!("Generated signing key is invalid: {e}")))?;

    debug!("🔑 Generated signing key ed25519:{}", keypair.version());
    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_random_string_length_and_charset() {
        let s = random_string(18);
        assert_eq!(s.len(), 18);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_canonical_object_rejects_unsafe_numbers() {
        let object = to_canonical_object(json!({ "depth": 9_007_199_254_740_991u64 })).unwrap();
        assert_eq!(object.len(), 1);

        assert!(to_canonical_object(json!({ "depth": 9_007_199_254_740_993u64 })).is_err());
        assert!(to_canonical_object(json!({ "ratio": 0.5 })).is_err());
        assert!(to_canonical_object(json!(["not", "an", "object"])).is_err());
    }

    #[test]
    fn test_generated_keypairs_differ() {
        let first = generate_keypair().unwrap();
        let second = generate_keypair().unwrap();
        assert_eq!(first.public_key().len(), 32);
        assert_ne!(first.public_key(), second.public_key());
    }

    #[test]
    fn test_clock_is_after_2020() {
        assert!(millis_since_unix_epoch() > 1_577_836_800_000);
    }
}
