use std::sync::Arc;

use crate::config::LockoutConfig;
use crate::services::AuthError;
use crate::stores::CounterStore;

fn user_attempts_key(user_key: &str) -> String {
    format!("attempts:user:{}", user_key)
}

fn ip_attempts_key(ip: &str) -> String {
    format!("attempts:ip:{}", ip)
}

fn user_lock_key(user_key: &str) -> String {
    format!("lock:user:{}", user_key)
}

fn ip_lock_key(ip: &str) -> String {
    format!("lock:ip:{}", ip)
}

/// Result of a lock check.
#[derive(Debug)]
pub struct LockStatus {
    pub locked: bool,
    pub retry_after_seconds: Option<u64>,
}

impl LockStatus {
    fn open() -> Self {
        Self {
            locked: false,
            retry_after_seconds: None,
        }
    }

    fn locked(retry_after_seconds: u64) -> Self {
        Self {
            locked: true,
            retry_after_seconds: Some(retry_after_seconds),
        }
    }
}

/// Brute-force guard counting failed attempts per account and per source IP.
///
/// Counting happens in the shared counter store, so the thresholds hold
/// across service instances. Each increment is atomic and the lock decision
/// is made on the count that same increment returned. When the store is
/// unreachable the guard reports locked.
#[derive(Clone)]
pub struct LockoutGuard {
    counters: Arc<dyn CounterStore>,
    config: LockoutConfig,
}

impl LockoutGuard {
    pub fn new(counters: Arc<dyn CounterStore>, config: LockoutConfig) -> Self {
        Self { counters, config }
    }

    /// Whether either dimension is currently locked.
    ///
    /// `user_key` is the presented identifier (normalized email), not a
    /// resolved user ID: unknown accounts must count too.
    pub async fn check_locked(&self, user_key: &str, ip: &str) -> LockStatus {
        for key in [user_lock_key(user_key), ip_lock_key(ip)] {
            match self.counters.get(&key).await {
                Ok(Some(_)) => {
                    let retry_after = match self.counters.ttl(&key).await {
                        Ok(Some(ttl)) => ttl,
                        // Lock exists but TTL is unreadable; report the full
                        // lock duration rather than unlocking early.
                        Ok(None) | Err(_) => self.config.lock_seconds,
                    };
                    return LockStatus::locked(retry_after);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Lock check failed, failing closed");
                    return LockStatus::locked(self.config.lock_seconds);
                }
            }
        }
        LockStatus::open()
    }

    /// Count one failed attempt against both dimensions and lock whichever
    /// crossed its threshold. Returns `Err(Lockout)` when a lock was placed.
    pub async fn record_failure(&self, user_key: &str, ip: &str) -> Result<(), AuthError> {
        let user_count = self
            .counters
            .incr_with_ttl(&user_attempts_key(user_key), self.config.window_seconds)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failure counting unavailable, failing closed");
                AuthError::Lockout {
                    retry_after_seconds: self.config.lock_seconds,
                }
            })?;
        let ip_count = self
            .counters
            .incr_with_ttl(&ip_attempts_key(ip), self.config.window_seconds)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failure counting unavailable, failing closed");
                AuthError::Lockout {
                    retry_after_seconds: self.config.lock_seconds,
                }
            })?;

        let mut locked = false;

        if user_count >= self.config.max_user_attempts as i64 {
            self.place_lock(&user_lock_key(user_key)).await;
            tracing::warn!(user_key = %user_key, count = user_count, "Account lockout threshold reached");
            locked = true;
        }

        if ip_count >= self.config.max_ip_attempts as i64 {
            self.place_lock(&ip_lock_key(ip)).await;
            tracing::warn!(ip = %ip, count = ip_count, "IP lockout threshold reached");
            locked = true;
        }

        if locked {
            Err(AuthError::Lockout {
                retry_after_seconds: self.config.lock_seconds,
            })
        } else {
            Ok(())
        }
    }

    /// NX set: repeated threshold crossings never refresh an existing
    /// lock's TTL.
    async fn place_lock(&self, key: &str) {
        if let Err(e) = self
            .counters
            .set_nx(key, "locked", self.config.lock_seconds)
            .await
        {
            // The caller still reports Lockout; only the persisted lock
            // is at risk here.
            tracing::error!(error = %e, key = %key, "Failed to persist lock");
        }
    }

    /// Reset failure counters after a fully successful login. Lock keys are
    /// deliberately untouched: an existing lock outlives a success.
    pub async fn clear_on_success(&self, user_key: &str, ip: &str) {
        for key in [user_attempts_key(user_key), ip_attempts_key(ip)] {
            if let Err(e) = self.counters.delete(&key).await {
                tracing::warn!(error = %e, key = %key, "Failed to clear attempt counter");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::InMemoryCounterStore;
    use async_trait::async_trait;

    fn test_config() -> LockoutConfig {
        LockoutConfig {
            max_user_attempts: 3,
            max_ip_attempts: 6,
            window_seconds: 900,
            lock_seconds: 900,
        }
    }

    fn guard() -> (LockoutGuard, Arc<InMemoryCounterStore>) {
        let counters = Arc::new(InMemoryCounterStore::new());
        (LockoutGuard::new(counters.clone(), test_config()), counters)
    }

    struct FailingCounterStore;

    #[async_trait]
    impl CounterStore for FailingCounterStore {
        async fn incr_with_ttl(&self, _: &str, _: u64) -> Result<i64, anyhow::Error> {
            Err(anyhow::anyhow!("store down"))
        }
        async fn cas_set(&self, _: &str, _: &str, _: &str, _: u64) -> Result<bool, anyhow::Error> {
            Err(anyhow::anyhow!("store down"))
        }
        async fn set_with_ttl(&self, _: &str, _: &str, _: u64) -> Result<(), anyhow::Error> {
            Err(anyhow::anyhow!("store down"))
        }
        async fn set_nx(&self, _: &str, _: &str, _: u64) -> Result<bool, anyhow::Error> {
            Err(anyhow::anyhow!("store down"))
        }
        async fn get(&self, _: &str) -> Result<Option<String>, anyhow::Error> {
            Err(anyhow::anyhow!("store down"))
        }
        async fn ttl(&self, _: &str) -> Result<Option<u64>, anyhow::Error> {
            Err(anyhow::anyhow!("store down"))
        }
        async fn delete(&self, _: &str) -> Result<(), anyhow::Error> {
            Err(anyhow::anyhow!("store down"))
        }
    }

    #[tokio::test]
    async fn test_lock_placed_at_user_threshold() {
        let (guard, _) = guard();

        assert!(guard.record_failure("a@example.com", "1.2.3.4").await.is_ok());
        assert!(guard.record_failure("a@example.com", "1.2.3.4").await.is_ok());
        let err = guard
            .record_failure("a@example.com", "1.2.3.4")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Lockout { .. }));

        let status = guard.check_locked("a@example.com", "1.2.3.4").await;
        assert!(status.locked);
        assert!(status.retry_after_seconds.is_some());
    }

    #[tokio::test]
    async fn test_other_account_unaffected_below_ip_threshold() {
        let (guard, _) = guard();

        for _ in 0..2 {
            guard.record_failure("a@example.com", "1.2.3.4").await.ok();
        }
        guard.record_failure("a@example.com", "1.2.3.4").await.ok();

        // Same IP, different account: only 3 IP failures so far, threshold 6
        let status = guard.check_locked("b@example.com", "1.2.3.4").await;
        assert!(!status.locked);
    }

    #[tokio::test]
    async fn test_ip_lock_spans_accounts() {
        let (guard, _) = guard();

        for i in 0..6 {
            let user = format!("user{}@example.com", i);
            guard.record_failure(&user, "1.2.3.4").await.ok();
        }

        let status = guard.check_locked("fresh@example.com", "1.2.3.4").await;
        assert!(status.locked);
    }

    #[tokio::test]
    async fn test_clear_on_success_keeps_lock() {
        let (guard, _) = guard();

        for _ in 0..3 {
            guard.record_failure("a@example.com", "1.2.3.4").await.ok();
        }
        assert!(guard.check_locked("a@example.com", "1.2.3.4").await.locked);

        guard.clear_on_success("a@example.com", "1.2.3.4").await;
        assert!(guard.check_locked("a@example.com", "1.2.3.4").await.locked);
    }

    #[tokio::test]
    async fn test_clear_on_success_resets_counters() {
        let (guard, _) = guard();

        guard.record_failure("a@example.com", "1.2.3.4").await.ok();
        guard.record_failure("a@example.com", "1.2.3.4").await.ok();
        guard.clear_on_success("a@example.com", "1.2.3.4").await;

        // The window restarts from zero
        assert!(guard.record_failure("a@example.com", "1.2.3.4").await.is_ok());
        assert!(guard.record_failure("a@example.com", "1.2.3.4").await.is_ok());
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let guard = LockoutGuard::new(Arc::new(FailingCounterStore), test_config());

        let status = guard.check_locked("a@example.com", "1.2.3.4").await;
        assert!(status.locked);

        let err = guard
            .record_failure("a@example.com", "1.2.3.4")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Lockout { .. }));
    }
}
