use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::role::Role;

/// A role grant scoped to one venue, layered on top of the base role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueRole {
    pub venue_id: String,
    pub role: Role,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl VenueRole {
    pub fn new(venue_id: String, role: Role, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            venue_id,
            role,
            granted_at: Utc::now(),
            expires_at,
            is_active: true,
        }
    }

    /// Active and not past its expiry at `now`.
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |exp| exp > now)
    }
}

/// An authenticated identity within a tenant.
///
/// Owned by the identity store; venue role entries are mutated only through
/// the RBAC resolver's grant/revoke operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub tenant_id: String,
    pub email: String,
    /// Opaque hash consumed by the external `CredentialVerifier`.
    pub password_hash: String,
    pub base_role: Role,
    #[serde(default)]
    pub venue_roles: Vec<VenueRole>,
}

impl Principal {
    pub fn new(
        tenant_id: String,
        email: String,
        password_hash: String,
        base_role: Role,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id,
            email,
            password_hash,
            base_role,
            venue_roles: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_venue_role_effective() {
        let now = Utc::now();
        let role = VenueRole::new("venue_1".to_string(), Role::Scanner, None);
        assert!(role.is_effective(now));
    }

    #[test]
    fn test_expired_venue_role_not_effective() {
        let now = Utc::now();
        let mut role = VenueRole::new("venue_1".to_string(), Role::Scanner, None);
        role.expires_at = Some(now - Duration::seconds(1));
        assert!(!role.is_effective(now));
    }

    #[test]
    fn test_revoked_venue_role_not_effective() {
        let now = Utc::now();
        let mut role = VenueRole::new("venue_1".to_string(), Role::Scanner, None);
        role.is_active = false;
        assert!(!role.is_effective(now));
    }
}
