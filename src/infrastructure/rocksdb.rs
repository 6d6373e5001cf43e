use super::in_memory::check_version;
use crate::domain::idempotency::{IdempotencyRecord, Reservation};
use crate::domain::invoice::{Invoice, InvoiceId, InvoiceStatus};
use crate::domain::payment::{Payment, PaymentId, PaymentState};
use crate::domain::ports::{IdempotencyStore, InvoiceStore, PaymentStore};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for invoices, keyed by invoice id.
pub const CF_INVOICES: &str = "invoices";
/// Column Family for payments, keyed by payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family for idempotency records, keyed by idempotency key.
pub const CF_IDEMPOTENCY: &str = "idempotency";

/// A persistent ledger store backed by RocksDB.
///
/// Invoices, payments and idempotency records live in separate Column
/// Families as JSON values. RocksDB has no compare-and-set on a plain `DB`,
/// so every conditional write runs its read-compare-write under one shared
/// async mutex. Reads stay lock-free.
///
/// `Clone` shares the underlying `Arc<DB>` and the write guard.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_guard: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path`, creating the Column
    /// Families on first use.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_INVOICES, CF_PAYMENTS, CF_IDEMPOTENCY]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self {
            db: Arc::new(db),
            write_guard: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            PaymentError::StorageError(Box::new(std::io::Error::other(format!(
                "{name} column family not found"
            ))))
        })
    }

    fn read<T: DeserializeOwned>(&self, family: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(family)?;
        match self.db.get_pinned_cf(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, family: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(family)?;
        self.db.put_cf(cf, key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, family: &str, mut keep: impl FnMut(&T) -> bool) -> Result<Vec<T>> {
        let cf = self.cf(family)?;
        let mut matching = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let entity: T = serde_json::from_slice(&value)?;
            if keep(&entity) {
                matching.push(entity);
            }
        }
        Ok(matching)
    }
}

#[async_trait]
impl InvoiceStore for RocksDBStore {
    async fn get(&self, id: &InvoiceId) -> Result<Option<Invoice>> {
        self.read(CF_INVOICES, id.0.as_bytes())
    }

    async fn put_if_version(&self, invoice: Invoice, expected_version: u64) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        let key = invoice.id.0.as_bytes();
        let current = self
            .read::<Invoice>(CF_INVOICES, key)?
            .map_or(0, |i| i.version);
        check_version(&invoice.id.to_string(), expected_version, current)?;
        self.write(CF_INVOICES, key, &invoice)
    }

    async fn list_by_status(&self, status: InvoiceStatus) -> Result<Vec<Invoice>> {
        let mut invoices = self.scan(CF_INVOICES, |i: &Invoice| i.status == status)?;
        invoices.sort_by_key(|i| i.created_at);
        Ok(invoices)
    }
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn get(&self, id: &PaymentId) -> Result<Option<Payment>> {
        self.read(CF_PAYMENTS, id.0.as_bytes())
    }

    async fn put_if_version(&self, payment: Payment, expected_version: u64) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        let key = payment.id.0.as_bytes();
        let current = self
            .read::<Payment>(CF_PAYMENTS, key)?
            .map_or(0, |p| p.version);
        check_version(&payment.id.to_string(), expected_version, current)?;
        self.write(CF_PAYMENTS, key, &payment)
    }

    async fn list_by_state(&self, state: PaymentState) -> Result<Vec<Payment>> {
        let mut payments = self.scan(CF_PAYMENTS, |p: &Payment| p.state == state)?;
        payments.sort_by_key(|p| p.authorized_at);
        Ok(payments)
    }
}

#[async_trait]
impl IdempotencyStore for RocksDBStore {
    async fn reserve(
        &self,
        key: &str,
        fingerprint: &str,
        now: DateTime<Utc>,
        pending_ttl: Duration,
    ) -> Result<Reservation> {
        let _guard = self.write_guard.lock().await;
        let existing: Option<IdempotencyRecord> = self.read(CF_IDEMPOTENCY, key.as_bytes())?;
        let (reservation, write) =
            IdempotencyRecord::claim(existing.as_ref(), key, fingerprint, now, pending_ttl)?;
        if let Some(record) = write {
            self.write(CF_IDEMPOTENCY, key.as_bytes(), &record)?;
        }
        Ok(reservation)
    }

    async fn complete(&self, key: &str, snapshot: serde_json::Value) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        let mut record: IdempotencyRecord = self
            .read(CF_IDEMPOTENCY, key.as_bytes())?
            .ok_or_else(|| PaymentError::not_found("idempotency key", key))?;
        record.result_snapshot = Some(snapshot);
        self.write(CF_IDEMPOTENCY, key.as_bytes(), &record)
    }

    async fn release(&self, key: &str) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        let existing: Option<IdempotencyRecord> = self.read(CF_IDEMPOTENCY, key.as_bytes())?;
        if existing.is_some_and(|r| r.result_snapshot.is_none()) {
            let cf = self.cf(CF_IDEMPOTENCY)?;
            self.db.delete_cf(cf, key.as_bytes())?;
        }
        Ok(())
    }
}
