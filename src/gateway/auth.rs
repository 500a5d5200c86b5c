//! API key minting/hashing and the Ed25519 challenge-response used for
//! session resumption (spec §4.1, §6.2, Open Question: reconnect auth).
//! Key hashing follows the teacher's `webhooks.rs` HMAC-over-hex idiom but
//! uses a plain SHA-256 digest, since keys are compared by equality rather
//! than verified against a signed payload.

use crate::db::Db;
use crate::error::RingError;
use crate::models::{ApiKey, KeyType, MintKeyRequest, MintedKey};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand::RngCore;
use sha2::{Digest, Sha256};

const SECRET_BYTES: usize = 32;
const PREFIX_VISIBLE_CHARS: usize = 8;

pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

fn random_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Mints a new key, persists its hash, and returns the plaintext once.
pub fn mint_key(db: &Db, tenant: &str, req: &MintKeyRequest) -> Result<MintedKey, RingError> {
    let key_type = KeyType::parse(&req.key_type).ok_or_else(|| RingError::InvalidMessage("unknown key_type".into()))?;
    let secret = random_secret();
    let hash = hash_secret(&secret);
    let prefix = format!("rf_{}_{}", key_type.as_str(), &secret[..PREFIX_VISIBLE_CHARS]);
    let expires_at = req
        .expires_in_days
        .map(|days| (chrono::Utc::now() + chrono::Duration::days(days)).to_rfc3339());

    let key = ApiKey {
        id: uuid::Uuid::new_v4().to_string(),
        tenant: tenant.to_string(),
        fleet: req.fleet.clone(),
        key_type: key_type.clone(),
        prefix: prefix.clone(),
        hash,
        created_at: chrono::Utc::now().to_rfc3339(),
        expires_at,
        revoked_at: None,
    };
    db.insert_api_key(&key).map_err(RingError::from)?;

    Ok(MintedKey {
        id: key.id,
        secret: format!("{prefix}.{secret}"),
        prefix,
        key_type: key_type.as_str().to_string(),
    })
}

/// Looks up and validates a presented API key secret, rejecting revoked or
/// expired keys (spec §4.1 auth family).
pub fn authenticate_key(db: &Db, presented_secret: &str) -> Result<ApiKey, RingError> {
    let raw = presented_secret.rsplit_once('.').map(|(_, s)| s).unwrap_or(presented_secret);
    let hash = hash_secret(raw);
    let key = db
        .find_api_key_by_hash(&hash)
        .map_err(RingError::from)?
        .ok_or_else(|| RingError::Unauthorized("unknown api key".into()))?;

    if key.revoked_at.is_some() {
        return Err(RingError::Unauthorized("api key revoked".into()));
    }
    if let Some(expires_at) = &key.expires_at {
        if let Ok(expires) = chrono::DateTime::parse_from_rfc3339(expires_at) {
            if chrono::Utc::now() > expires {
                return Err(RingError::Unauthorized("api key expired".into()));
            }
        }
    }
    Ok(key)
}

/// Generates a fresh reconnect challenge nonce: an agent signs this with
/// its registered Ed25519 key to resume a session without re-presenting
/// the tenant's API key (spec §4.1 reconnect path).
pub fn generate_challenge() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Verifies a base64-encoded Ed25519 signature of `challenge` against the
/// agent's registered base64 public key.
pub fn verify_reconnect_signature(public_key_b64: &str, challenge: &str, signature_b64: &str) -> bool {
    use base64::Engine;
    let engine = base64::engine::general_purpose::STANDARD;

    let Ok(key_bytes) = engine.decode(public_key_b64) else {
        return false;
    };
    let Ok(key_bytes): Result<[u8; 32], _> = key_bytes.try_into() else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };

    let Ok(sig_bytes) = engine.decode(signature_b64) else {
        return false;
    };
    let Ok(sig_bytes): Result<[u8; 64], _> = sig_bytes.try_into() else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_bytes);

    verifying_key.verify(challenge.as_bytes(), &signature).is_ok()
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
