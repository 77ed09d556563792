//! End-to-end scenarios for the Coffer service.
//!
//! Each scenario drives a [`Service`] over a shared [`CountingStore`] the way
//! a transport would: authenticate, then call operations by keyring name.

// Allow unwrap() in tests - panics are acceptable for test assertions
#![allow(clippy::disallowed_methods)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use coffer_auth::StaticTokenBackend;
use coffer_keyring::KeyEncryptionKey;
use coffer_service::{Service, ServiceConfig};
use coffer_storage::{MemoryStore, ObjectStore, StorageError};

/// Bearer token every test service accepts.
pub const TOKEN: &str = "integration-bearer-token";

// ============================================================================
// Test Store
// ============================================================================

/// Object store that counts every call before delegating.
pub struct CountingStore {
    inner: Arc<dyn ObjectStore>,
    calls: AtomicUsize,
}

impl CountingStore {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    /// Counts calls over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Total storage calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for CountingStore {
    async fn put_object(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.put_object(key, value).await
    }

    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_object(key).await
    }

    async fn list_object_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list_object_keys(prefix).await
    }
}

// ============================================================================
// Service Construction
// ============================================================================

/// Generates a master key and its token.
pub fn master_key() -> (KeyEncryptionKey, String) {
    let kek = KeyEncryptionKey::generate();
    let token = kek.to_token().unwrap();
    (kek, token)
}

/// Starts a service over `store` with the given master-key tokens.
///
/// Simulates a process start: nothing is shared with earlier services except
/// the store.
pub fn start(store: Arc<dyn ObjectStore>, master_keys: &[&str]) -> Result<Service> {
    let auth = Arc::new(StaticTokenBackend::new(TOKEN)?);
    let config = ServiceConfig::new(master_keys.iter().map(|t| t.to_string()).collect());
    Ok(Service::new(store, auth, config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    use coffer_keyring::Encrypted;
    use coffer_service::{DecryptFailure, ErrorKind};
    use coffer_storage_sqlite::SqliteStore;
    use tempfile::TempDir;

    fn fresh() -> (Arc<CountingStore>, Service) {
        let store = Arc::new(CountingStore::in_memory());
        let (_, token) = master_key();
        let service = start(store.clone(), &[&token]).unwrap();
        (store, service)
    }

    fn payloads() -> Vec<Vec<u8>> {
        vec![
            Vec::new(),
            b"x".to_vec(),
            b"hello, world".to_vec(),
            (0..=255).collect(),
            (0..1024 * 1024).map(|i| (i % 251) as u8).collect(),
        ]
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (_store, service) = fresh();
        let api = service.authenticate(TOKEN).await.unwrap();

        for keyring in ["alice", "bob", "tenant-42", "unicode-é"] {
            for plaintext in payloads() {
                let out = api.encrypt(keyring, &plaintext).await.unwrap();
                let decrypted = api.decrypt(keyring, &out.encrypted).await.unwrap();
                assert_eq!(decrypted, plaintext, "keyring {keyring}");
            }
        }
    }

    #[tokio::test]
    async fn test_nonce_freshness() {
        let (_store, service) = fresh();
        let api = service.authenticate(TOKEN).await.unwrap();

        let mut nonces = HashSet::new();
        let mut envelopes = HashSet::new();
        for _ in 0..200 {
            let out = api.encrypt("alice", b"same plaintext").await.unwrap();
            let envelope = Encrypted::from_base64(&out.encrypted).unwrap();
            assert!(nonces.insert(envelope.nonce), "nonce reused");
            assert!(envelopes.insert(out.encrypted), "envelope repeated");
        }
    }

    #[tokio::test]
    async fn test_keyring_isolation() {
        let (_store, service) = fresh();
        let api = service.authenticate(TOKEN).await.unwrap();

        let alice = api.encrypt("alice", b"alice's secret").await.unwrap();
        api.encrypt("bob", b"bob's secret").await.unwrap();

        let err = api.decrypt("bob", &alice.encrypted).await.unwrap_err();
        assert_eq!(err.to_string(), "decryption failed");
        assert_eq!(err.decrypt_failure(), Some(DecryptFailure::UnknownKey));

        // A keyring whose name extends another's must not reach its DEKs,
        // even once alice's DEK is cached by id.
        api.decrypt("alice", &alice.encrypted).await.unwrap();
        let (head, tail) = alice.key_id.split_at(8);
        let mut forged = Encrypted::from_base64(&alice.encrypted).unwrap();
        forged.key_id = tail.trim_start_matches('-').to_string();
        let forged = forged.to_base64().unwrap();
        let lookalike = format!("alice-{head}");
        let err = api.decrypt(&lookalike, &forged).await.unwrap_err();
        assert_eq!(err.to_string(), "decryption failed");
    }

    #[tokio::test]
    async fn test_tamper_detection_every_bit() {
        let (_store, service) = fresh();
        let api = service.authenticate(TOKEN).await.unwrap();

        let out = api.encrypt("alice", b"tamper me").await.unwrap();
        let original = Encrypted::from_base64(&out.encrypted).unwrap();

        let mut attempts = 0;
        for field in 0..2 {
            let len = if field == 0 {
                original.nonce.len()
            } else {
                original.ciphertext.len()
            };

            for byte in 0..len {
                for bit in 0..8 {
                    let mut tampered = original.clone();
                    let target = if field == 0 {
                        &mut tampered.nonce
                    } else {
                        &mut tampered.ciphertext
                    };
                    target[byte] ^= 1 << bit;

                    let err = api
                        .decrypt("alice", &tampered.to_base64().unwrap())
                        .await
                        .unwrap_err();
                    assert_eq!(err.kind(), ErrorKind::CryptographicAuthentication);
                    assert_eq!(err.to_string(), "decryption failed");
                    attempts += 1;
                }
            }
        }

        assert_eq!(attempts, (12 + 9 + 16) * 8);
        assert_eq!(api.decrypt("alice", &out.encrypted).await.unwrap(), b"tamper me");
    }

    #[tokio::test]
    async fn test_garbage_envelopes_look_identical() {
        let (_store, service) = fresh();
        let api = service.authenticate(TOKEN).await.unwrap();
        api.encrypt("alice", b"x").await.unwrap();

        for garbage in ["", "!!!", "AAAA", "bm90IGNib3I="] {
            let err = api.decrypt("alice", garbage).await.unwrap_err();
            assert_eq!(err.to_string(), "decryption failed", "input {garbage:?}");
            assert_eq!(err.kind(), ErrorKind::CryptographicAuthentication);
            assert_eq!(err.decrypt_failure(), Some(DecryptFailure::MalformedEnvelope));
        }
    }

    #[tokio::test]
    async fn test_decrypt_failures_are_indistinguishable() {
        let (_store, service) = fresh();
        let api = service.authenticate(TOKEN).await.unwrap();

        let alice = api.encrypt("alice", b"secret").await.unwrap();
        api.encrypt("bob", b"other").await.unwrap();

        let mut tampered = Encrypted::from_base64(&alice.encrypted).unwrap();
        tampered.ciphertext[0] ^= 1;

        let errors = [
            api.decrypt("alice", &tampered.to_base64().unwrap()).await.unwrap_err(),
            api.decrypt("alice", "AAAA").await.unwrap_err(),
            api.decrypt("bob", &alice.encrypted).await.unwrap_err(),
        ];

        for err in &errors {
            assert_eq!(err.kind(), errors[0].kind());
            assert_eq!(err.to_string(), errors[0].to_string());
        }

        // The distinct reason is still available internally.
        let reasons: Vec<_> = errors.iter().map(|e| e.decrypt_failure()).collect();
        assert_eq!(
            reasons,
            vec![
                Some(DecryptFailure::Authentication),
                Some(DecryptFailure::MalformedEnvelope),
                Some(DecryptFailure::UnknownKey),
            ]
        );
    }

    #[tokio::test]
    async fn test_dek_reuse_until_create_dek() {
        let (_store, service) = fresh();
        let api = service.authenticate(TOKEN).await.unwrap();

        let ids: HashSet<String> = {
            let mut ids = HashSet::new();
            for _ in 0..10 {
                ids.insert(api.encrypt("alice", b"x").await.unwrap().key_id);
            }
            ids
        };
        assert_eq!(ids.len(), 1);

        let a = api.create_dek("alice").await.unwrap();
        let b = api.create_dek("alice").await.unwrap();
        assert_ne!(a, b);
        assert!(!ids.contains(&a));

        assert_eq!(api.encrypt("alice", b"x").await.unwrap().key_id, b);
    }

    #[tokio::test]
    async fn test_kek_rotation_with_restart() {
        let tmp = TempDir::new().unwrap();
        let (_, old) = master_key();
        let (_, new) = master_key();

        let mut envelopes = Vec::new();
        {
            let store = Arc::new(SqliteStore::open(tmp.path(), "coffer").await.unwrap());
            let service = start(store, &[&old]).unwrap();
            let api = service.authenticate(TOKEN).await.unwrap();

            for keyring in ["alice", "bob"] {
                envelopes.push((keyring, api.encrypt(keyring, b"first").await.unwrap()));
                api.create_dek(keyring).await.unwrap();
                envelopes.push((keyring, api.encrypt(keyring, b"second").await.unwrap()));
            }
        }

        // Restart with both keys, new one current, and roll.
        {
            let store = Arc::new(SqliteStore::open(tmp.path(), "coffer").await.unwrap());
            let service = start(store, &[&old, &new]).unwrap();
            let api = service.authenticate(TOKEN).await.unwrap();

            let summary = api.roll_deks().await.unwrap();
            assert_eq!(summary.scanned, 6);
            assert_eq!(summary.rewrapped, 6);

            let again = api.roll_deks().await.unwrap();
            assert_eq!(again.rewrapped, 0);
        }

        // Restart with only the new key.
        let store = Arc::new(SqliteStore::open(tmp.path(), "coffer").await.unwrap());
        let service = start(store, &[&new]).unwrap();
        let api = service.authenticate(TOKEN).await.unwrap();

        for (keyring, out) in &envelopes {
            assert!(api.decrypt(keyring, &out.encrypted).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_restart_without_roll_loses_access() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let (_, old) = master_key();
        let (_, new) = master_key();

        let service = start(store.clone(), &[&old]).unwrap();
        let out = service
            .authenticate(TOKEN)
            .await
            .unwrap()
            .encrypt("alice", b"x")
            .await
            .unwrap();

        let service = start(store, &[&new]).unwrap();
        let err = service
            .authenticate(TOKEN)
            .await
            .unwrap()
            .decrypt("alice", &out.encrypted)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "decryption failed");
    }

    #[tokio::test]
    async fn test_re_encrypt() {
        let (_store, service) = fresh();
        let api = service.authenticate(TOKEN).await.unwrap();

        let old = api.encrypt("alice", b"move me").await.unwrap();
        let new_dek = api.create_dek("alice").await.unwrap();

        let moved = api.re_encrypt("alice", &old.encrypted).await.unwrap();
        assert_eq!(moved.key_id, new_dek);
        assert_ne!(moved.key_id, old.key_id);

        assert_eq!(api.decrypt("alice", &moved.encrypted).await.unwrap(), b"move me");
        assert_eq!(api.decrypt("alice", &old.encrypted).await.unwrap(), b"move me");
    }

    #[tokio::test]
    async fn test_alice_bob_cold_start() {
        let store = Arc::new(CountingStore::in_memory());
        let (_, token) = master_key();

        let first = start(store.clone(), &[&token]).unwrap();
        let api = first.authenticate(TOKEN).await.unwrap();
        let alice = api.encrypt("alice", b"from alice").await.unwrap();
        let bob = api.encrypt("bob", b"from bob").await.unwrap();
        assert_ne!(alice.key_id, bob.key_id);

        // Second process, empty cache.
        let second = start(store, &[&token]).unwrap();
        let api = second.authenticate(TOKEN).await.unwrap();

        assert_eq!(api.decrypt("alice", &alice.encrypted).await.unwrap(), b"from alice");
        assert_eq!(api.decrypt("bob", &bob.encrypted).await.unwrap(), b"from bob");
        assert_eq!(api.encrypt("alice", b"again").await.unwrap().key_id, alice.key_id);
        assert_eq!(api.encrypt("bob", b"again").await.unwrap().key_id, bob.key_id);
    }

    #[tokio::test]
    async fn test_bulk_key_set_preserved() {
        let (_store, service) = fresh();
        let api = service.authenticate(TOKEN).await.unwrap();

        let items: HashMap<String, Vec<u8>> = payloads()
            .into_iter()
            .enumerate()
            .map(|(i, p)| (format!("field.{i}"), p))
            .collect();

        let encrypted = api.encrypt_bulk("alice", &items).await.unwrap();
        let in_keys: HashSet<_> = items.keys().collect();
        let out_keys: HashSet<_> = encrypted.keys().collect();
        assert_eq!(in_keys, out_keys);

        let ids: HashSet<_> = encrypted.values().map(|o| o.key_id.as_str()).collect();
        assert_eq!(ids.len(), 1);

        let envelopes = encrypted
            .into_iter()
            .map(|(k, v)| (k, v.encrypted))
            .collect::<HashMap<_, _>>();
        assert_eq!(api.decrypt_bulk("alice", &envelopes).await.unwrap(), items);

        assert!(api.encrypt_bulk("alice", &HashMap::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_auth_gate_before_storage() {
        let (store, service) = fresh();

        for token in ["", "wrong", "integration-bearer-token-x"] {
            let err = service.authenticate(token).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Authentication);
        }
        let err = service
            .authenticate_header("Token integration-bearer-token")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);

        assert_eq!(service.liveness(), "ok");
        assert_eq!(store.calls(), 0);

        service
            .authenticate(TOKEN)
            .await
            .unwrap()
            .encrypt("alice", b"x")
            .await
            .unwrap();
        assert!(store.calls() > 0);
    }

    #[tokio::test]
    async fn test_concurrent_first_encrypts() {
        let (_store, service) = fresh();

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move {
                    let api = service.authenticate(TOKEN).await.unwrap();
                    let plaintext = format!("msg {i}").into_bytes();
                    let out = api.encrypt("shared", &plaintext).await.unwrap();
                    (plaintext, out)
                })
            })
            .collect();

        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }

        // Every DEK created by a racing first call stays retrievable.
        let api = service.authenticate(TOKEN).await.unwrap();
        for (plaintext, out) in results {
            assert_eq!(api.decrypt("shared", &out.encrypted).await.unwrap(), plaintext);
        }
    }
}
