//! In-memory store implementations.
//!
//! Each store serializes access through a single mutex, so the atomicity
//! guarantees match the Redis-backed implementations under concurrent use.
//! Intended for tests and local development only: state is per-process and
//! must never back a multi-instance deployment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::{MfaState, Principal, Session};

use super::{CounterStore, CredentialVerifier, MfaStore, PrincipalStore, SessionStore};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map_or(true, |at| at > Instant::now())
    }
}

#[derive(Default)]
pub struct InMemoryCounterStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_err() -> anyhow::Error {
    anyhow::anyhow!("In-memory store mutex poisoned")
}

fn ttl_to_instant(ttl_seconds: u64) -> Option<Instant> {
    if ttl_seconds == 0 {
        None
    } else {
        Some(Instant::now() + Duration::from_secs(ttl_seconds))
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn incr_with_ttl(&self, key: &str, ttl_seconds: u64) -> Result<i64, anyhow::Error> {
        let mut entries = self.entries.lock().map_err(|_| lock_err())?;
        match entries.get_mut(key).filter(|e| e.live()) {
            Some(entry) => {
                let count: i64 = entry.value.parse().unwrap_or(0) + 1;
                entry.value = count.to_string();
                Ok(count)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at: ttl_to_instant(ttl_seconds),
                    },
                );
                Ok(1)
            }
        }
    }

    async fn cas_set(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl_seconds: u64,
    ) -> Result<bool, anyhow::Error> {
        let mut entries = self.entries.lock().map_err(|_| lock_err())?;
        match entries.get(key).filter(|e| e.live()) {
            Some(entry) if entry.value == expected => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: new.to_string(),
                        expires_at: ttl_to_instant(ttl_seconds),
                    },
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        let mut entries = self.entries.lock().map_err(|_| lock_err())?;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl_to_instant(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<bool, anyhow::Error> {
        let mut entries = self.entries.lock().map_err(|_| lock_err())?;
        if entries.get(key).filter(|e| e.live()).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl_to_instant(ttl_seconds),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let entries = self.entries.lock().map_err(|_| lock_err())?;
        Ok(entries
            .get(key)
            .filter(|e| e.live())
            .map(|e| e.value.clone()))
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, anyhow::Error> {
        let entries = self.entries.lock().map_err(|_| lock_err())?;
        Ok(entries.get(key).filter(|e| e.live()).and_then(|e| {
            e.expires_at
                .map(|at| at.saturating_duration_since(Instant::now()).as_secs())
        }))
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        let mut entries = self.entries.lock().map_err(|_| lock_err())?;
        entries.remove(key);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: &Session) -> Result<(), anyhow::Error> {
        let mut sessions = self.sessions.lock().map_err(|_| lock_err())?;
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>, anyhow::Error> {
        let sessions = self.sessions.lock().map_err(|_| lock_err())?;
        Ok(sessions.get(session_id).cloned())
    }

    async fn revoke(&self, session_id: &str, at: DateTime<Utc>) -> Result<(), anyhow::Error> {
        let mut sessions = self.sessions.lock().map_err(|_| lock_err())?;
        if let Some(session) = sessions.get_mut(session_id) {
            if session.revoked_at.is_none() {
                session.revoked_at = Some(at);
            }
        }
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Session>, anyhow::Error> {
        let sessions = self.sessions.lock().map_err(|_| lock_err())?;
        Ok(sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct MfaInner {
    states: HashMap<String, MfaState>,
    codes: HashMap<String, HashSet<String>>,
}

#[derive(Default)]
pub struct InMemoryMfaStore {
    inner: Mutex<MfaInner>,
}

impl InMemoryMfaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MfaStore for InMemoryMfaStore {
    async fn get(&self, user_id: &str) -> Result<Option<MfaState>, anyhow::Error> {
        let inner = self.inner.lock().map_err(|_| lock_err())?;
        Ok(inner.states.get(user_id).cloned())
    }

    async fn put(&self, user_id: &str, state: &MfaState) -> Result<(), anyhow::Error> {
        let mut inner = self.inner.lock().map_err(|_| lock_err())?;
        inner.states.insert(user_id.to_string(), state.clone());
        Ok(())
    }

    async fn clear(&self, user_id: &str) -> Result<(), anyhow::Error> {
        let mut inner = self.inner.lock().map_err(|_| lock_err())?;
        inner.states.remove(user_id);
        inner.codes.remove(user_id);
        Ok(())
    }

    async fn replace_backup_codes(
        &self,
        user_id: &str,
        hashes: &[String],
    ) -> Result<(), anyhow::Error> {
        let mut inner = self.inner.lock().map_err(|_| lock_err())?;
        inner
            .codes
            .insert(user_id.to_string(), hashes.iter().cloned().collect());
        Ok(())
    }

    async fn backup_code_hashes(&self, user_id: &str) -> Result<Vec<String>, anyhow::Error> {
        let inner = self.inner.lock().map_err(|_| lock_err())?;
        Ok(inner
            .codes
            .get(user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn consume_backup_code(
        &self,
        user_id: &str,
        hash: &str,
    ) -> Result<bool, anyhow::Error> {
        let mut inner = self.inner.lock().map_err(|_| lock_err())?;
        Ok(inner
            .codes
            .get_mut(user_id)
            .map(|set| set.remove(hash))
            .unwrap_or(false))
    }
}

#[derive(Default)]
pub struct InMemoryPrincipalStore {
    principals: Mutex<HashMap<String, Principal>>,
}

impl InMemoryPrincipalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PrincipalStore for InMemoryPrincipalStore {
    async fn get(&self, user_id: &str) -> Result<Option<Principal>, anyhow::Error> {
        let principals = self.principals.lock().map_err(|_| lock_err())?;
        Ok(principals.get(user_id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, anyhow::Error> {
        let principals = self.principals.lock().map_err(|_| lock_err())?;
        Ok(principals.values().find(|p| p.email == email).cloned())
    }

    async fn put(&self, principal: &Principal) -> Result<(), anyhow::Error> {
        let mut principals = self.principals.lock().map_err(|_| lock_err())?;
        principals.insert(principal.id.clone(), principal.clone());
        Ok(())
    }
}

/// Plaintext-equality verifier standing in for the external password
/// hashing service. Counts verification calls so tests can assert that a
/// locked account never reaches the verifier.
#[derive(Default)]
pub struct MockCredentialVerifier {
    calls: AtomicUsize,
}

impl MockCredentialVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialVerifier for MockCredentialVerifier {
    async fn verify(&self, secret: &str, hash: &str) -> Result<bool, anyhow::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(secret == hash)
    }
}
