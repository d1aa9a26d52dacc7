//! Pairing Secret Store
//!
//! Key-value collaborator mapping a pairing token to its pre-shared secret.
//! The coordinator only depends on the [`PairingStore`] trait; any backend must
//! guarantee that [`PairingStore::consume`] is atomic per token, so that of two
//! concurrent attempts with the same token exactly one observes `true`.
//!
//! [`InMemoryPairingStore`] is the process-local backend used by the IPC
//! server and the tests.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretVec};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

#[derive(Debug, thiserror::Error)]
pub enum PairingStoreError {
    #[error("pairing token already registered")]
    DuplicateToken,

    #[error("pairing store unavailable: {0}")]
    Backend(String),
}

/// A pending pairing: token, secret and lifetime
pub struct PairingRecord {
    token: String,
    secret: SecretVec<u8>,
    created_at: SystemTime,
    expires_at: SystemTime,
}

impl PairingRecord {
    /// Create a record that expires `ttl` from now
    pub fn new(token: impl Into<String>, secret: Vec<u8>, ttl: Duration) -> Self {
        let created_at = SystemTime::now();
        Self {
            token: token.into(),
            secret: SecretVec::new(secret),
            created_at,
            expires_at: created_at + ttl,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn secret(&self) -> &SecretVec<u8> {
        &self.secret
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }
}

impl std::fmt::Debug for PairingRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingRecord")
            .field("token", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[async_trait]
pub trait PairingStore: Send + Sync {
    /// Register a new pending pairing
    async fn insert(&self, record: PairingRecord) -> Result<(), PairingStoreError>;

    /// Secret for a live token; `None` if the token is unknown, consumed or expired
    async fn fetch_secret(&self, token: &str) -> Result<Option<SecretVec<u8>>, PairingStoreError>;

    /// Remove the token, returning `true` only for the caller that removed a live record
    async fn consume(&self, token: &str) -> Result<bool, PairingStoreError>;
}

/// Process-local store guarded by a mutex
#[derive(Default)]
pub struct InMemoryPairingStore {
    records: Mutex<HashMap<String, PairingRecord>>,
}

impl InMemoryPairingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unconsumed, unexpired) pairings
    pub fn pending_count(&self) -> usize {
        let now = SystemTime::now();
        self.lock()
            .values()
            .filter(|record| !record.is_expired_at(now))
            .count()
    }

    /// Drop expired records, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = SystemTime::now();
        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, record| !record.is_expired_at(now));
        before - records.len()
    }

    // A poisoned lock still holds a consistent map: every mutation is a single
    // insert or remove.
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PairingRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for InMemoryPairingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryPairingStore")
            .field("records", &self.lock().len())
            .finish()
    }
}

#[async_trait]
impl PairingStore for InMemoryPairingStore {
    async fn insert(&self, record: PairingRecord) -> Result<(), PairingStoreError> {
        let mut records = self.lock();
        let now = SystemTime::now();
        match records.get(record.token()) {
            Some(existing) if !existing.is_expired_at(now) => {
                Err(PairingStoreError::DuplicateToken)
            }
            _ => {
                records.insert(record.token.clone(), record);
                Ok(())
            }
        }
    }

    async fn fetch_secret(&self, token: &str) -> Result<Option<SecretVec<u8>>, PairingStoreError> {
        let now = SystemTime::now();
        let records = self.lock();
        Ok(records
            .get(token)
            .filter(|record| !record.is_expired_at(now))
            .map(|record| SecretVec::new(record.secret.expose_secret().clone())))
    }

    async fn consume(&self, token: &str) -> Result<bool, PairingStoreError> {
        let now = SystemTime::now();
        let removed = self.lock().remove(token);
        Ok(matches!(removed, Some(record) if !record.is_expired_at(now)))
    }
}
