//! Storage adapters for the ledger ports and the startup-time backend
//! selection.

pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;

use crate::domain::ports::{IdempotencyStoreRef, InvoiceStoreRef, PaymentStoreRef};
use crate::error::Result;
use in_memory::{InMemoryIdempotencyStore, InMemoryInvoiceStore, InMemoryPaymentStore};
use std::path::PathBuf;
use std::sync::Arc;

/// The storage kinds a deployment can choose from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    InMemory,
    RocksDb(PathBuf),
}

/// The set of stores one service instance runs against.
#[derive(Clone)]
pub struct Ledger {
    pub invoices: InvoiceStoreRef,
    pub payments: PaymentStoreRef,
    pub idempotency: IdempotencyStoreRef,
}

impl Ledger {
    pub fn in_memory() -> Self {
        Self {
            invoices: Arc::new(InMemoryInvoiceStore::new()),
            payments: Arc::new(InMemoryPaymentStore::new()),
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
        }
    }

    /// Resolves a configured backend to concrete stores. Called once at
    /// startup.
    pub fn open(backend: &StorageBackend) -> Result<Self> {
        match backend {
            StorageBackend::InMemory => Ok(Self::in_memory()),
            StorageBackend::RocksDb(path) => Self::open_rocksdb(path),
        }
    }

    #[cfg(feature = "storage-rocksdb")]
    fn open_rocksdb(path: &std::path::Path) -> Result<Self> {
        let store = self::rocksdb::RocksDBStore::open(path)?;
        tracing::info!(path = %path.display(), "opened RocksDB ledger");
        Ok(Self {
            invoices: Arc::new(store.clone()),
            payments: Arc::new(store.clone()),
            idempotency: Arc::new(store),
        })
    }

    #[cfg(not(feature = "storage-rocksdb"))]
    fn open_rocksdb(path: &std::path::Path) -> Result<Self> {
        tracing::warn!(
            path = %path.display(),
            "WARNING: Persistent storage requested, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
        Ok(Self::in_memory())
    }
}
