//! Role catalog - closed set of roles with static permission mappings.

use serde::{Deserialize, Serialize};

/// Catalog entry meaning "all permissions".
pub const WILDCARD: &str = "*";

/// Roles known to the platform.
///
/// The catalog is a closed enum so adding a role is a compile-time-checked
/// change: `permissions` matches exhaustively and will not build if a
/// variant is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    PlatformAdmin,
    TenantAdmin,
    VenueManager,
    BoxOffice,
    Scanner,
    Attendee,
}

impl Role {
    /// Static permission set for this role.
    pub fn permissions(&self) -> &'static [&'static str] {
        match self {
            Role::PlatformAdmin => &[WILDCARD],
            Role::TenantAdmin => &[
                "venues:manage",
                "events:manage",
                "roles:manage",
                "reports:view",
                "tickets:refund",
                "orders:view",
            ],
            Role::VenueManager => &[
                "events:manage",
                "staff:manage",
                "tickets:scan",
                "tickets:refund",
                "reports:view",
                "orders:view",
            ],
            Role::BoxOffice => &["tickets:sell", "tickets:refund", "orders:view"],
            Role::Scanner => &["tickets:scan"],
            Role::Attendee => &["tickets:view", "profile:edit"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::PlatformAdmin => "platform_admin",
            Role::TenantAdmin => "tenant_admin",
            Role::VenueManager => "venue_manager",
            Role::BoxOffice => "box_office",
            Role::Scanner => "scanner",
            Role::Attendee => "attendee",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "platform_admin" => Ok(Role::PlatformAdmin),
            "tenant_admin" => Ok(Role::TenantAdmin),
            "venue_manager" => Ok(Role::VenueManager),
            "box_office" => Ok(Role::BoxOffice),
            "scanner" => Ok(Role::Scanner),
            "attendee" => Ok(Role::Attendee),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
