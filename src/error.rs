use crate::domain::invoice::InvoiceId;
use crate::domain::payment::PaymentId;
use miette::Diagnostic;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    #[diagnostic(code(invoicepay::validation))]
    ValidationError(String),

    #[error("Invalid state: {0}")]
    #[diagnostic(code(invoicepay::invalid_state))]
    InvalidState(String),

    #[error("Version conflict on {id}: expected version {expected}, found {actual}")]
    #[diagnostic(
        code(invoicepay::version_conflict),
        help("re-read the entity and retry with its current version")
    )]
    VersionConflict { id: String, expected: u64, actual: u64 },

    #[error("Overpayment: {requested} exceeds outstanding balance {outstanding}")]
    #[diagnostic(code(invoicepay::overpayment))]
    OverpaymentError {
        requested: Decimal,
        outstanding: Decimal,
    },

    #[error("Payment {0} is already confirmed")]
    #[diagnostic(code(invoicepay::already_confirmed))]
    AlreadyConfirmed(PaymentId),

    #[error("Idempotency key {0:?} was already used with a different request")]
    #[diagnostic(code(invoicepay::idempotency_conflict))]
    IdempotencyConflict(String),

    #[error("A request with idempotency key {0:?} is still in progress")]
    #[diagnostic(code(invoicepay::in_progress), help("retry once the first call settles"))]
    RequestInProgress(String),

    #[error("Partial commit: payment {payment_id} confirmed but invoice {invoice_id} not updated ({reason})")]
    #[diagnostic(
        code(invoicepay::partial_commit),
        help("the reconciler must apply the payment to the invoice")
    )]
    PartialCommitError {
        payment_id: PaymentId,
        invoice_id: InvoiceId,
        reason: String,
    },

    #[error("{entity} {id} not found")]
    #[diagnostic(code(invoicepay::not_found))]
    NotFound { entity: &'static str, id: String },

    #[error("Storage error: {0}")]
    #[diagnostic(code(invoicepay::storage))]
    StorageError(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl PaymentError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// True when the failed call still left a durable mutation behind.
    pub fn committed(&self) -> bool {
        matches!(self, Self::PartialCommitError { .. })
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(err: serde_json::Error) -> Self {
        Self::StorageError(Box::new(err))
    }
}

impl From<std::io::Error> for PaymentError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageError(Box::new(err))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for PaymentError {
    fn from(err: rocksdb::Error) -> Self {
        Self::StorageError(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;
