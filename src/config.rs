use crate::infrastructure::StorageBackend;
use chrono::Duration;

/// Runtime knobs for the payment coordinator and the service facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub backend: StorageBackend,
    /// How long an authorization may stay unconfirmed before the reconciler
    /// is allowed to void it.
    pub authorization_ttl: Duration,
    /// Invoice-update attempts after a payment is confirmed before the call
    /// gives up with a partial commit.
    pub confirm_retry_budget: u32,
    /// Age after which an unfinished idempotency reservation may be reclaimed.
    pub idempotency_pending_ttl: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::InMemory,
            authorization_ttl: Duration::minutes(15),
            confirm_retry_budget: 3,
            idempotency_pending_ttl: Duration::seconds(30),
        }
    }
}
