use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A login session. One session owns exactly one refresh-token lineage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,

    pub user_id: String,

    pub tenant_id: String,

    /// Lineage of refresh tokens rotated from this login.
    pub lineage_id: String,

    pub created_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,

    /// Set at logout, reuse detection, or "revoke all sessions".
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,

    pub device_info: String,
}

impl Session {
    pub fn new(
        user_id: String,
        tenant_id: String,
        lineage_id: String,
        lifetime_days: i64,
        device_info: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            tenant_id,
            lineage_id,
            created_at: now,
            expires_at: now + Duration::days(lifetime_days),
            revoked_at: None,
            device_info,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Not revoked and not expired.
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none() && !self.is_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_active() {
        let session = Session::new(
            "user_1".to_string(),
            "tenant_1".to_string(),
            "lineage_1".to_string(),
            7,
            "test-device".to_string(),
        );
        assert!(session.is_active());
        assert!(!session.is_expired());
    }

    #[test]
    fn test_revoked_session_not_active() {
        let mut session = Session::new(
            "user_1".to_string(),
            "tenant_1".to_string(),
            "lineage_1".to_string(),
            7,
            "test-device".to_string(),
        );
        session.revoked_at = Some(Utc::now());
        assert!(!session.is_active());
    }

    #[test]
    fn test_expired_session_not_active() {
        let mut session = Session::new(
            "user_1".to_string(),
            "tenant_1".to_string(),
            "lineage_1".to_string(),
            7,
            "test-device".to_string(),
        );
        session.expires_at = Utc::now() - Duration::seconds(1);
        assert!(!session.is_active());
    }
}
