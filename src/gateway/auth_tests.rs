use super::*;
use crate::db::Db;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};

fn test_db() -> Db {
    let path = std::env::temp_dir().join(format!("ringforge-auth-test-{}.db", uuid::Uuid::new_v4()));
    let db = Db::new(path.to_str().unwrap());
    db.create_tenant(&crate::models::CreateTenant {
        id: "acme".into(),
        plan: "free".into(),
        email: None,
    })
    .unwrap();
    db
}

#[test]
fn a_minted_key_authenticates_and_a_revoked_one_does_not() {
    let db = test_db();
    let minted = mint_key(
        &db,
        "acme",
        &MintKeyRequest {
            key_type: "live".into(),
            fleet: None,
            expires_in_days: None,
        },
    )
    .unwrap();

    let key = authenticate_key(&db, &minted.secret).unwrap();
    assert_eq!(key.tenant, "acme");

    db.revoke_api_key("acme", &key.id).unwrap();
    assert!(authenticate_key(&db, &minted.secret).is_err());
}

#[test]
fn an_unknown_secret_is_rejected() {
    let db = test_db();
    assert!(authenticate_key(&db, "rf_live_deadbeef.notreal").is_err());
}

#[test]
fn an_expired_key_is_rejected() {
    let db = test_db();
    let minted = mint_key(
        &db,
        "acme",
        &MintKeyRequest {
            key_type: "live".into(),
            fleet: None,
            expires_in_days: Some(-1),
        },
    )
    .unwrap();
    assert!(authenticate_key(&db, &minted.secret).is_err());
}

#[test]
fn reconnect_signature_round_trips_through_verify() {
    let mut csprng = rand::rngs::OsRng;
    let signing_key = SigningKey::generate(&mut csprng);
    let public_b64 = base64::engine::general_purpose::STANDARD.encode(signing_key.verifying_key().to_bytes());

    let challenge = generate_challenge();
    let signature = signing_key.sign(challenge.as_bytes());
    let sig_b64 = base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());

    assert!(verify_reconnect_signature(&public_b64, &challenge, &sig_b64));
}

#[test]
fn reconnect_signature_fails_against_a_different_challenge() {
    let mut csprng = rand::rngs::OsRng;
    let signing_key = SigningKey::generate(&mut csprng);
    let public_b64 = base64::engine::general_purpose::STANDARD.encode(signing_key.verifying_key().to_bytes());

    let challenge = generate_challenge();
    let signature = signing_key.sign(challenge.as_bytes());
    let sig_b64 = base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());

    assert!(!verify_reconnect_signature(&public_b64, "a-different-challenge", &sig_b64));
}
