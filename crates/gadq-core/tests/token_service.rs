//! Token issuance / validation tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;

use serde_json::json;

use gadq_core::clock::ManualClock;
use gadq_core::protocol::CapabilityToken;
use gadq_core::token::{KeyStore, TokenFault, TokenService, TtlBounds, PRIVATE_KEY_FILE, PUBLIC_KEY_FILE};

const T0: u64 = 1_700_000_000;

fn service(dir: &tempfile::TempDir) -> (TokenService, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(T0));
    let svc = TokenService::with_clock(dir.path().join("keys"), TtlBounds::default(), clock.clone());
    (svc, clock)
}

fn perms() -> Vec<String> {
    vec!["vision".to_string()]
}

#[test]
fn fresh_token_validates() {
    let dir = tempfile::tempdir().unwrap();
    let (svc, _) = service(&dir);

    for ttl in [1, 10, 3600] {
        let t = svc.generate("user:paulo", "python:detect", &perms(), ttl).unwrap();
        assert!(svc.validate(&t, false), "ttl={ttl}");
        assert!(svc.validate(&t, true), "ttl={ttl}");
    }
}

#[test]
fn payload_is_canonical() {
    let dir = tempfile::tempdir().unwrap();
    let (svc, _) = service(&dir);

    let t = svc.generate("user:paulo", "python:detect", &perms(), 10).unwrap();
    assert_eq!(
        t.payload,
        format!(r#"{{"created":{T0},"origin":"user:paulo","permissions":["vision"],"target":"python:detect"}}"#)
    );
    assert_eq!(t.pubkey.as_deref(), Some(svc.pubkey_hex().unwrap().as_str()));
    assert_eq!(t.signature.len(), 128);
}

#[test]
fn ttl_one_expires_after_one_second() {
    let dir = tempfile::tempdir().unwrap();
    let (svc, clock) = service(&dir);

    let t = svc.generate("user:paulo", "python:detect", &perms(), 1).unwrap();
    assert!(svc.validate(&t, false));

    clock.advance(1);
    assert!(!svc.validate(&t, false));
    assert!(matches!(svc.verify(&t, false), Err(TokenFault::Expired { age: 1, ttl: 1 })));
}

#[test]
fn flipping_signature_bytes_invalidates() {
    let dir = tempfile::tempdir().unwrap();
    let (svc, _) = service(&dir);
    let t = svc.generate("user:paulo", "python:detect", &perms(), 10).unwrap();

    for i in 0..t.signature.len() {
        let mut sig: Vec<char> = t.signature.chars().collect();
        sig[i] = if sig[i] == '0' { '1' } else { '0' };
        let bad = CapabilityToken { signature: sig.into_iter().collect(), ..t.clone() };
        assert!(!svc.validate(&bad, false), "signature position {i}");
    }
}

#[test]
fn flipping_payload_bytes_invalidates() {
    let dir = tempfile::tempdir().unwrap();
    let (svc, _) = service(&dir);
    let t = svc.generate("user:paulo", "python:detect", &perms(), 10).unwrap();

    for i in 0..t.payload.len() {
        let mut bytes = t.payload.clone().into_bytes();
        bytes[i] ^= 0x01;
        let bad = CapabilityToken { payload: String::from_utf8(bytes).unwrap(), ..t.clone() };
        assert!(!svc.validate(&bad, false), "payload position {i}");
    }
}

#[test]
fn ttl_outside_bounds_is_schema_fault() {
    let dir = tempfile::tempdir().unwrap();
    let (svc, _) = service(&dir);

    for ttl in [0, -5, 3601] {
        let t = svc.generate("user:paulo", "python:detect", &perms(), ttl).unwrap();
        let fault = svc.verify(&t, false).unwrap_err();
        assert!(fault.is_schema(), "ttl={ttl} fault={fault}");
        assert!(!svc.validate(&t, false));
    }
}

#[test]
fn detached_token_uses_local_key_unless_embedded_required() {
    let dir = tempfile::tempdir().unwrap();
    let (svc, _) = service(&dir);

    let t = svc.generate_detached("user:paulo", "python:detect", &perms(), 10).unwrap();
    assert!(t.pubkey.is_none());
    assert!(svc.validate(&t, false));
    assert_eq!(svc.verify(&t, true).unwrap_err(), TokenFault::MissingPubkey);
}

#[test]
fn token_from_other_issuer_fails_against_local_key() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    let (issuer, _) = service(&a);
    let (verifier, _) = service(&b);

    let t = issuer.generate_detached("user:paulo", "python:detect", &perms(), 10).unwrap();
    assert_eq!(verifier.verify(&t, false).unwrap_err(), TokenFault::SignatureMismatch);
}

#[test]
fn malformed_values_are_rejected_without_panicking() {
    let dir = tempfile::tempdir().unwrap();
    let (svc, _) = service(&dir);
    let good = svc.generate("user:paulo", "python:detect", &perms(), 10).unwrap().to_value();
    assert!(svc.validate_value(&good, false));

    let mut cases = vec![
        json!(null),
        json!("token"),
        json!({}),
        json!({"payload": "{}", "signature": "00"}),
    ];
    for (field, value) in [
        ("ttl", json!("10")),
        ("ttl", json!(10.5)),
        ("payload", json!("not json")),
        ("payload", json!("[1,2,3]")),
        ("payload", json!(r#"{"created":"yesterday"}"#)),
        ("signature", json!("zz")),
        ("pubkey", json!("abcd")),
    ] {
        let mut v = good.clone();
        v[field] = value;
        cases.push(v);
    }

    for v in cases {
        assert!(!svc.validate_value(&v, false), "value={v}");
    }
}

#[test]
fn null_pubkey_is_not_treated_as_absent() {
    let dir = tempfile::tempdir().unwrap();
    let (svc, _) = service(&dir);
    let detached = svc.generate_detached("user:paulo", "python:detect", &perms(), 10).unwrap();
    assert!(svc.validate_value(&detached.to_value(), false));

    let mut v = detached.to_value();
    v["pubkey"] = json!(null);
    assert!(!svc.validate_value(&v, false));
    assert!(CapabilityToken::from_value(&v).unwrap_err().is_schema());
}

#[test]
fn keypair_is_persisted_and_reloaded() {
    let dir = tempfile::tempdir().unwrap();
    let first = KeyStore::new(dir.path()).keypair().unwrap().pubkey_hex();
    let second = KeyStore::new(dir.path()).keypair().unwrap().pubkey_hex();
    assert_eq!(first, second);
}

#[test]
fn concurrent_first_use_creates_one_keypair() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(KeyStore::new(dir.path()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.keypair().unwrap().pubkey_hex())
        })
        .collect();
    let keys: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(keys.windows(2).all(|w| w[0] == w[1]));
    let reloaded = KeyStore::new(dir.path()).keypair().unwrap().pubkey_hex();
    assert_eq!(keys[0], reloaded);
}

#[test]
fn separate_stores_on_one_directory_agree_on_the_keypair() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keys");
    let start = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let path = path.clone();
            let start = Arc::clone(&start);
            thread::spawn(move || {
                let store = KeyStore::new(path);
                start.wait();
                store.keypair().unwrap().pubkey_hex()
            })
        })
        .collect();
    let keys: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(keys.windows(2).all(|w| w[0] == w[1]), "{keys:?}");
    let reloaded = KeyStore::new(&path).keypair().unwrap().pubkey_hex();
    assert_eq!(keys[0], reloaded);

    let mut names: Vec<String> = fs::read_dir(&path)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, [PRIVATE_KEY_FILE, PUBLIC_KEY_FILE]);
}

#[test]
fn corrupt_key_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let key_dir = dir.path().join("keys");
    fs::create_dir_all(&key_dir).unwrap();
    fs::write(key_dir.join(PRIVATE_KEY_FILE), b"short").unwrap();

    let svc = TokenService::new(&key_dir);
    let err = svc.generate("user:paulo", "python:detect", &perms(), 10).unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.code().as_str(), "KEY_STORE");
}
