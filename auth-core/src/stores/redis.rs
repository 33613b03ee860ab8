use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, Client, Script};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::RedisConfig;
use crate::models::Session;

use super::{CounterStore, MfaStore, SessionStore};
use crate::models::MfaState;

// INCR and EXPIRE must be one round trip: the lock decision is made on the
// value this script returns, never on a later read.
const INCR_WITH_TTL_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
";

// Compare-and-set: of two concurrent callers presenting the same expected
// value, exactly one swap succeeds.
const CAS_SET_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
  return 1
else
  return 0
end
";

/// Shared-store implementation of the counter, session, and MFA access
/// patterns. Every call carries an explicit timeout; callers on security
/// paths treat a timeout as a denial.
#[derive(Clone)]
pub struct RedisStore {
    _client: Client,
    manager: ConnectionManager,
    op_timeout: Duration,
    incr_script: Arc<Script>,
    cas_script: Arc<Script>,
}

impl RedisStore {
    pub async fn new(config: &RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!(url = %config.url, "Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        // ConnectionManager reconnects automatically
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
            op_timeout: Duration::from_millis(config.op_timeout_ms),
            incr_script: Arc::new(Script::new(INCR_WITH_TTL_SCRIPT)),
            cas_script: Arc::new(Script::new(CAS_SET_SCRIPT)),
        })
    }

    pub async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        self.run("PING", async move {
            redis::cmd("PING").query_async::<_, ()>(&mut conn).await
        })
        .await
    }

    async fn run<T, F>(&self, op: &str, fut: F) -> Result<T, anyhow::Error>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(anyhow::anyhow!("Redis {} failed: {}", op, e)),
            Err(_) => Err(anyhow::anyhow!(
                "Redis {} timed out after {}ms",
                op,
                self.op_timeout.as_millis()
            )),
        }
    }

    fn session_key(session_id: &str) -> String {
        format!("session:{}", session_id)
    }

    fn user_sessions_key(user_id: &str) -> String {
        format!("user_sessions:{}", user_id)
    }

    fn mfa_state_key(user_id: &str) -> String {
        format!("mfa:state:{}", user_id)
    }

    fn mfa_codes_key(user_id: &str) -> String {
        format!("mfa:codes:{}", user_id)
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn incr_with_ttl(&self, key: &str, ttl_seconds: u64) -> Result<i64, anyhow::Error> {
        let mut conn = self.manager.clone();
        let script = Arc::clone(&self.incr_script);
        let key = key.to_string();
        self.run("INCR_WITH_TTL", async move {
            script
                .key(&key)
                .arg(ttl_seconds)
                .invoke_async(&mut conn)
                .await
        })
        .await
    }

    async fn cas_set(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl_seconds: u64,
    ) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let script = Arc::clone(&self.cas_script);
        let key = key.to_string();
        let expected = expected.to_string();
        let new = new.to_string();
        let swapped: i64 = self
            .run("CAS_SET", async move {
                script
                    .key(&key)
                    .arg(&expected)
                    .arg(&new)
                    .arg(ttl_seconds)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(swapped == 1)
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        let value = value.to_string();
        self.run("SET", async move {
            redis::cmd("SET")
                .arg(&key)
                .arg(&value)
                .arg("EX")
                .arg(ttl_seconds)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        let value = value.to_string();
        let created: Option<String> = self
            .run("SET_NX", async move {
                redis::cmd("SET")
                    .arg(&key)
                    .arg(&value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl_seconds)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(created.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        self.run("GET", async move {
            redis::cmd("GET").arg(&key).query_async(&mut conn).await
        })
        .await
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        let ttl: i64 = self
            .run("TTL", async move {
                redis::cmd("TTL").arg(&key).query_async(&mut conn).await
            })
            .await?;
        // -2 missing key, -1 no expiry
        Ok(if ttl >= 0 { Some(ttl as u64) } else { None })
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        self.run("DEL", async move {
            redis::cmd("DEL").arg(&key).query_async(&mut conn).await
        })
        .await
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn create(&self, session: &Session) -> Result<(), anyhow::Error> {
        let payload = serde_json::to_string(session)?;
        let ttl = (session.expires_at - Utc::now()).num_seconds().max(1);
        let session_key = Self::session_key(&session.id);
        let index_key = Self::user_sessions_key(&session.user_id);
        let session_id = session.id.clone();

        let mut conn = self.manager.clone();
        self.run("SESSION_CREATE", async move {
            redis::pipe()
                .cmd("SET")
                .arg(&session_key)
                .arg(&payload)
                .arg("EX")
                .arg(ttl)
                .ignore()
                .cmd("SADD")
                .arg(&index_key)
                .arg(&session_id)
                .ignore()
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let key = Self::session_key(session_id);
        let raw: Option<String> = self
            .run("SESSION_GET", async move {
                redis::cmd("GET").arg(&key).query_async(&mut conn).await
            })
            .await?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn revoke(&self, session_id: &str, at: DateTime<Utc>) -> Result<(), anyhow::Error> {
        let Some(mut session) = SessionStore::get(self, session_id).await? else {
            return Ok(());
        };
        if session.revoked_at.is_some() {
            return Ok(());
        }
        session.revoked_at = Some(at);

        // Keep the revoked record around until its natural expiry so later
        // refresh attempts see "revoked" rather than "unknown".
        let payload = serde_json::to_string(&session)?;
        let key = Self::session_key(session_id);
        let mut conn = self.manager.clone();
        self.run("SESSION_REVOKE", async move {
            redis::cmd("SET")
                .arg(&key)
                .arg(&payload)
                .arg("KEEPTTL")
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Session>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let index_key = Self::user_sessions_key(user_id);
        let ids: Vec<String> = self
            .run("SESSION_LIST", async move {
                redis::cmd("SMEMBERS")
                    .arg(&index_key)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(session) = SessionStore::get(self, &id).await? {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }
}

#[async_trait]
impl MfaStore for RedisStore {
    async fn get(&self, user_id: &str) -> Result<Option<MfaState>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let key = Self::mfa_state_key(user_id);
        let raw: Option<String> = self
            .run("MFA_GET", async move {
                redis::cmd("GET").arg(&key).query_async(&mut conn).await
            })
            .await?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, user_id: &str, state: &MfaState) -> Result<(), anyhow::Error> {
        let payload = serde_json::to_string(state)?;
        let key = Self::mfa_state_key(user_id);
        let mut conn = self.manager.clone();
        self.run("MFA_PUT", async move {
            redis::cmd("SET")
                .arg(&key)
                .arg(&payload)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn clear(&self, user_id: &str) -> Result<(), anyhow::Error> {
        let state_key = Self::mfa_state_key(user_id);
        let codes_key = Self::mfa_codes_key(user_id);
        let mut conn = self.manager.clone();
        self.run("MFA_CLEAR", async move {
            redis::cmd("DEL")
                .arg(&state_key)
                .arg(&codes_key)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn replace_backup_codes(
        &self,
        user_id: &str,
        hashes: &[String],
    ) -> Result<(), anyhow::Error> {
        let key = Self::mfa_codes_key(user_id);
        let hashes = hashes.to_vec();
        let mut conn = self.manager.clone();
        self.run("MFA_REPLACE_CODES", async move {
            let mut pipe = redis::pipe();
            pipe.cmd("DEL").arg(&key).ignore();
            if !hashes.is_empty() {
                pipe.cmd("SADD").arg(&key).arg(&hashes).ignore();
            }
            pipe.query_async(&mut conn).await
        })
        .await
    }

    async fn backup_code_hashes(&self, user_id: &str) -> Result<Vec<String>, anyhow::Error> {
        let key = Self::mfa_codes_key(user_id);
        let mut conn = self.manager.clone();
        self.run("MFA_CODES", async move {
            redis::cmd("SMEMBERS").arg(&key).query_async(&mut conn).await
        })
        .await
    }

    async fn consume_backup_code(
        &self,
        user_id: &str,
        hash: &str,
    ) -> Result<bool, anyhow::Error> {
        // SREM is atomic: it returns 1 for exactly one of any set of
        // concurrent callers removing the same member.
        let key = Self::mfa_codes_key(user_id);
        let hash = hash.to_string();
        let mut conn = self.manager.clone();
        let removed: i64 = self
            .run("MFA_CONSUME_CODE", async move {
                redis::cmd("SREM")
                    .arg(&key)
                    .arg(&hash)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(removed == 1)
    }
}
