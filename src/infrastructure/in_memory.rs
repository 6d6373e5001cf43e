use crate::domain::idempotency::{IdempotencyRecord, Reservation};
use crate::domain::invoice::{Invoice, InvoiceId, InvoiceStatus};
use crate::domain::payment::{Payment, PaymentId, PaymentState};
use crate::domain::ports::{IdempotencyStore, InvoiceStore, PaymentStore};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory invoice store.
///
/// Conditional writes take the write lock for the whole compare-and-set, so
/// concurrent writers against the same version see exactly one winner.
#[derive(Default, Clone)]
pub struct InMemoryInvoiceStore {
    invoices: Arc<RwLock<HashMap<InvoiceId, Invoice>>>,
}

impl InMemoryInvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvoiceStore for InMemoryInvoiceStore {
    async fn get(&self, id: &InvoiceId) -> Result<Option<Invoice>> {
        let invoices = self.invoices.read().await;
        Ok(invoices.get(id).cloned())
    }

    async fn put_if_version(&self, invoice: Invoice, expected_version: u64) -> Result<()> {
        let mut invoices = self.invoices.write().await;
        let current = invoices.get(&invoice.id).map_or(0, |i| i.version);
        check_version(&invoice.id.to_string(), expected_version, current)?;
        invoices.insert(invoice.id, invoice);
        Ok(())
    }

    async fn list_by_status(&self, status: InvoiceStatus) -> Result<Vec<Invoice>> {
        let invoices = self.invoices.read().await;
        let mut matching: Vec<Invoice> = invoices
            .values()
            .filter(|i| i.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|i| i.created_at);
        Ok(matching)
    }
}

/// A thread-safe in-memory payment store.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    payments: Arc<RwLock<HashMap<PaymentId, Payment>>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn get(&self, id: &PaymentId) -> Result<Option<Payment>> {
        let payments = self.payments.read().await;
        Ok(payments.get(id).cloned())
    }

    async fn put_if_version(&self, payment: Payment, expected_version: u64) -> Result<()> {
        let mut payments = self.payments.write().await;
        let current = payments.get(&payment.id).map_or(0, |p| p.version);
        check_version(&payment.id.to_string(), expected_version, current)?;
        payments.insert(payment.id, payment);
        Ok(())
    }

    async fn list_by_state(&self, state: PaymentState) -> Result<Vec<Payment>> {
        let payments = self.payments.read().await;
        let mut matching: Vec<Payment> = payments
            .values()
            .filter(|p| p.state == state)
            .cloned()
            .collect();
        matching.sort_by_key(|p| p.authorized_at);
        Ok(matching)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryIdempotencyStore {
    records: Arc<RwLock<HashMap<String, IdempotencyRecord>>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn reserve(
        &self,
        key: &str,
        fingerprint: &str,
        now: DateTime<Utc>,
        pending_ttl: Duration,
    ) -> Result<Reservation> {
        let mut records = self.records.write().await;
        let (reservation, write) =
            IdempotencyRecord::claim(records.get(key), key, fingerprint, now, pending_ttl)?;
        if let Some(record) = write {
            records.insert(key.to_string(), record);
        }
        Ok(reservation)
    }

    async fn complete(&self, key: &str, snapshot: serde_json::Value) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(key)
            .ok_or_else(|| PaymentError::not_found("idempotency key", key))?;
        record.result_snapshot = Some(snapshot);
        Ok(())
    }

    async fn release(&self, key: &str) -> Result<()> {
        let mut records = self.records.write().await;
        if records
            .get(key)
            .is_some_and(|r| r.result_snapshot.is_none())
        {
            records.remove(key);
        }
        Ok(())
    }
}

pub(crate) fn check_version(id: &str, expected: u64, actual: u64) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(PaymentError::VersionConflict {
            id: id.to_string(),
            expected,
            actual,
        })
    }
}
