//! Wire-level error contract.
//!
//! | PaymentError | Status |
//! |--------------|--------|
//! | `ValidationError` | `INVALID_ARGUMENT` |
//! | `NotFound` | `NOT_FOUND` |
//! | `IdempotencyConflict`, `AlreadyConfirmed` | `ALREADY_EXISTS` |
//! | `InvalidState` | `FAILED_PRECONDITION` |
//! | `VersionConflict`, `RequestInProgress` | `ABORTED` |
//! | `OverpaymentError` | `OUT_OF_RANGE` |
//! | `StorageError` | `INTERNAL` |
//! | `PartialCommitError` | `DATA_LOSS` |

use crate::error::PaymentError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Internal,
    DataLoss,
}

impl StatusCode {
    /// Numeric code, aligned with the gRPC status space.
    pub fn number(self) -> u8 {
        match self {
            Self::InvalidArgument => 3,
            Self::NotFound => 5,
            Self::AlreadyExists => 6,
            Self::FailedPrecondition => 9,
            Self::Aborted => 10,
            Self::OutOfRange => 11,
            Self::Internal => 13,
            Self::DataLoss => 15,
        }
    }

    /// Whether a client may retry the same call after re-reading state.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// An error as the caller sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcStatus {
    pub code: StatusCode,
    pub message: String,
    /// Entities an operator has to look at, set for partial commits.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_ids: Vec<String>,
}

impl RpcStatus {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            entity_ids: Vec::new(),
        }
    }
}

impl fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({}): {}", self.code, self.code.number(), self.message)
    }
}

impl std::error::Error for RpcStatus {}

impl From<PaymentError> for RpcStatus {
    fn from(err: PaymentError) -> Self {
        let code = match &err {
            PaymentError::ValidationError(_) => StatusCode::InvalidArgument,
            PaymentError::NotFound { .. } => StatusCode::NotFound,
            PaymentError::IdempotencyConflict(_) | PaymentError::AlreadyConfirmed(_) => {
                StatusCode::AlreadyExists
            }
            PaymentError::InvalidState(_) => StatusCode::FailedPrecondition,
            PaymentError::VersionConflict { .. } | PaymentError::RequestInProgress(_) => {
                StatusCode::Aborted
            }
            PaymentError::OverpaymentError { .. } => StatusCode::OutOfRange,
            PaymentError::PartialCommitError {
                payment_id,
                invoice_id,
                ..
            } => {
                return Self {
                    code: StatusCode::DataLoss,
                    message: err.to_string(),
                    entity_ids: vec![payment_id.to_string(), invoice_id.to_string()],
                };
            }
            PaymentError::StorageError(source) => {
                // Log the full error but don't expose it to clients
                tracing::error!(error = %source, "storage error");
                return Self::new(StatusCode::Internal, "Internal storage error");
            }
        };
        Self::new(code, err.to_string())
    }
}
