use super::idempotency::Reservation;
use super::invoice::{Invoice, InvoiceId, InvoiceStatus};
use super::payment::{Payment, PaymentId, PaymentState};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Durable invoice storage with optimistic concurrency.
///
/// `put_if_version` writes `invoice` only if the stored copy is still at
/// `expected_version` (0 meaning "must not exist yet") and otherwise fails
/// with `VersionConflict`.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn get(&self, id: &InvoiceId) -> Result<Option<Invoice>>;
    async fn put_if_version(&self, invoice: Invoice, expected_version: u64) -> Result<()>;
    async fn list_by_status(&self, status: InvoiceStatus) -> Result<Vec<Invoice>>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn get(&self, id: &PaymentId) -> Result<Option<Payment>>;
    async fn put_if_version(&self, payment: Payment, expected_version: u64) -> Result<()>;
    async fn list_by_state(&self, state: PaymentState) -> Result<Vec<Payment>>;
}

/// Maps idempotency keys to the terminal result of the call that used them.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically claims `key` for a request with `fingerprint`.
    async fn reserve(
        &self,
        key: &str,
        fingerprint: &str,
        now: DateTime<Utc>,
        pending_ttl: Duration,
    ) -> Result<Reservation>;
    /// Records the terminal result for a held key.
    async fn complete(&self, key: &str, snapshot: serde_json::Value) -> Result<()>;
    /// Drops a held key so the request can be executed again.
    async fn release(&self, key: &str) -> Result<()>;
}

pub type InvoiceStoreRef = Arc<dyn InvoiceStore>;
pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type IdempotencyStoreRef = Arc<dyn IdempotencyStore>;
