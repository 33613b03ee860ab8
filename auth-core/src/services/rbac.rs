use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

use crate::models::{Principal, Role, VenueRole, WILDCARD};
use crate::services::AuthError;
use crate::stores::PrincipalStore;

/// The permissions effective for a principal in some scope.
///
/// `All` is the wildcard: it grants every permission string, including ones
/// no role in the catalog names, without enumerating them.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionSet {
    All,
    Named(HashSet<String>),
}

impl PermissionSet {
    fn empty() -> Self {
        PermissionSet::Named(HashSet::new())
    }

    fn union_role(&mut self, role: Role) {
        if matches!(self, PermissionSet::All) {
            return;
        }
        let perms = role.permissions();
        if perms.contains(&WILDCARD) {
            *self = PermissionSet::All;
            return;
        }
        if let PermissionSet::Named(set) = self {
            set.extend(perms.iter().map(|p| p.to_string()));
        }
    }

    pub fn contains(&self, permission: &str) -> bool {
        match self {
            PermissionSet::All => true,
            PermissionSet::Named(set) => set.contains(permission),
        }
    }

    /// Stable list form for embedding in token claims.
    pub fn snapshot(&self) -> Vec<String> {
        match self {
            PermissionSet::All => vec![WILDCARD.to_string()],
            PermissionSet::Named(set) => {
                let mut perms: Vec<String> = set.iter().cloned().collect();
                perms.sort();
                perms
            }
        }
    }
}

/// Resolves effective permissions and administers venue-scoped role grants.
#[derive(Clone)]
pub struct RbacResolver {
    principals: Arc<dyn PrincipalStore>,
}

impl RbacResolver {
    pub fn new(principals: Arc<dyn PrincipalStore>) -> Self {
        Self { principals }
    }

    /// Effective permissions: the base role's set, plus every active,
    /// unexpired venue role matching `venue_id`. Without a venue scope only
    /// the base role contributes.
    pub fn resolve(&self, principal: &Principal, venue_id: Option<&str>) -> PermissionSet {
        let now = Utc::now();
        let mut set = PermissionSet::empty();
        set.union_role(principal.base_role);

        if let Some(venue) = venue_id {
            for grant in &principal.venue_roles {
                if grant.venue_id == venue && grant.is_effective(now) {
                    set.union_role(grant.role);
                }
            }
        }

        set
    }

    pub fn check_permission(
        &self,
        principal: &Principal,
        permission: &str,
        venue_id: Option<&str>,
    ) -> bool {
        self.resolve(principal, venue_id).contains(permission)
    }

    pub fn require_permission(
        &self,
        principal: &Principal,
        permission: &str,
        venue_id: Option<&str>,
    ) -> Result<(), AuthError> {
        if self.check_permission(principal, permission, venue_id) {
            Ok(())
        } else {
            Err(AuthError::Authorization {
                missing: permission.to_string(),
            })
        }
    }

    /// Grant a venue-scoped role. Requires `roles:manage` on the caller.
    ///
    /// Granting a role the user already holds actively for the venue updates
    /// the expiry in place without duplicating the entry or resetting
    /// `granted_at`. Roles outside the catalog cannot be expressed: callers
    /// parse untrusted role names into `Role` before reaching this point.
    pub async fn grant_venue_role(
        &self,
        caller: &Principal,
        user_id: &str,
        venue_id: &str,
        role: Role,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), AuthError> {
        self.require_permission(caller, "roles:manage", None)?;

        let mut principal = self
            .principals
            .get(user_id)
            .await?
            .ok_or_else(|| AuthError::InvalidRequest("Unknown user".to_string()))?;

        match principal
            .venue_roles
            .iter_mut()
            .find(|g| g.venue_id == venue_id && g.role == role && g.is_active)
        {
            Some(existing) => {
                existing.expires_at = expires_at;
            }
            None => {
                principal
                    .venue_roles
                    .push(VenueRole::new(venue_id.to_string(), role, expires_at));
            }
        }

        self.principals.put(&principal).await?;

        tracing::info!(
            caller_id = %caller.id,
            user_id = %user_id,
            venue_id = %venue_id,
            role = %role,
            "Venue role granted"
        );
        Ok(())
    }

    /// Revoke a venue-scoped role. Requires `roles:manage` on the caller.
    ///
    /// Revocation is a soft deactivation so the grant history survives.
    /// Revoking a grant the user does not hold is a no-op.
    pub async fn revoke_venue_role(
        &self,
        caller: &Principal,
        user_id: &str,
        venue_id: &str,
        role: Role,
    ) -> Result<(), AuthError> {
        self.require_permission(caller, "roles:manage", None)?;

        let mut principal = self
            .principals
            .get(user_id)
            .await?
            .ok_or_else(|| AuthError::InvalidRequest("Unknown user".to_string()))?;

        let mut changed = false;
        for grant in principal
            .venue_roles
            .iter_mut()
            .filter(|g| g.venue_id == venue_id && g.role == role && g.is_active)
        {
            grant.is_active = false;
            changed = true;
        }

        if !changed {
            tracing::debug!(user_id = %user_id, venue_id = %venue_id, "No active grant to revoke");
            return Ok(());
        }

        self.principals.put(&principal).await?;

        tracing::info!(
            caller_id = %caller.id,
            user_id = %user_id,
            venue_id = %venue_id,
            role = %role,
            "Venue role revoked"
        );
        Ok(())
    }
}
