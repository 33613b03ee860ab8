//! Authentication core for the multi-tenant ticketing platform.
//!
//! Handles credential login with MFA, token issuance and rotation with
//! reuse detection, venue-scoped RBAC, and brute-force lockout. Transport
//! and persistence live elsewhere: callers wire in the stores and map
//! [`services::AuthError`] onto their protocol of choice via
//! `AuthError::status_code`.

pub mod config;
pub mod models;
pub mod services;
pub mod stores;

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` overrides the
/// configured level. Safe to call more than once; later calls are no-ops.
pub fn init_tracing(log_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .json()
        .try_init();
}
