//! Access patterns the core requires from external storage.
//!
//! The persistence engines themselves are out of scope; the core talks to
//! them only through these traits. Production deployments back
//! `CounterStore`/`SessionStore`/`MfaStore` with the shared Redis instance
//! (`RedisStore`), which keeps lockout counting and rotation races correct
//! across service instances. In-process implementations exist for tests.

mod memory;
mod redis;

pub use memory::{
    InMemoryCounterStore, InMemoryMfaStore, InMemoryPrincipalStore, InMemorySessionStore,
    MockCredentialVerifier,
};
pub use self::redis::RedisStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{MfaState, Principal, Session};

/// Verifies a presented secret against a stored hash. The hashing scheme is
/// a black box to the core.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, secret: &str, hash: &str) -> Result<bool, anyhow::Error>;
}

/// Atomic keyed counters and compare-and-set, shared across instances.
///
/// These primitives carry the two correctness-critical guarantees of the
/// core: lock decisions are made on the value returned by the same atomic
/// increment, and refresh rotation is a single compare-and-set.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomic increment; the first increment of a key starts its TTL window.
    /// Returns the post-increment count.
    async fn incr_with_ttl(&self, key: &str, ttl_seconds: u64) -> Result<i64, anyhow::Error>;

    /// Atomically replace `expected` with `new` (refreshing the TTL), or
    /// fail without side effects if the current value differs or is absent.
    async fn cas_set(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl_seconds: u64,
    ) -> Result<bool, anyhow::Error>;

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), anyhow::Error>;

    /// Set only if the key is absent; an existing entry (and its TTL) is
    /// left untouched. Returns whether this call created the entry.
    async fn set_nx(&self, key: &str, value: &str, ttl_seconds: u64)
        -> Result<bool, anyhow::Error>;

    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;

    /// Remaining TTL in seconds, if the key exists and expires.
    async fn ttl(&self, key: &str) -> Result<Option<u64>, anyhow::Error>;

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error>;
}

/// Durable session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: &Session) -> Result<(), anyhow::Error>;

    async fn get(&self, session_id: &str) -> Result<Option<Session>, anyhow::Error>;

    async fn revoke(&self, session_id: &str, at: DateTime<Utc>) -> Result<(), anyhow::Error>;

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Session>, anyhow::Error>;
}

/// Per-principal MFA state and backup-code hash set.
#[async_trait]
pub trait MfaStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<MfaState>, anyhow::Error>;

    async fn put(&self, user_id: &str, state: &MfaState) -> Result<(), anyhow::Error>;

    /// Drop the state and every backup-code hash.
    async fn clear(&self, user_id: &str) -> Result<(), anyhow::Error>;

    /// Replace the full set of unused backup-code hashes.
    async fn replace_backup_codes(
        &self,
        user_id: &str,
        hashes: &[String],
    ) -> Result<(), anyhow::Error>;

    async fn backup_code_hashes(&self, user_id: &str) -> Result<Vec<String>, anyhow::Error>;

    /// Atomically consume one hash: returns true only for the caller that
    /// removed it. Two concurrent calls with the same hash cannot both win.
    async fn consume_backup_code(
        &self,
        user_id: &str,
        hash: &str,
    ) -> Result<bool, anyhow::Error>;
}

/// Identity-store access pattern. The production implementation lives with
/// the external identity service; the core ships an in-memory one for tests.
#[async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<Principal>, anyhow::Error>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, anyhow::Error>;

    async fn put(&self, principal: &Principal) -> Result<(), anyhow::Error>;
}
