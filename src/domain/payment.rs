use super::invoice::InvoiceId;
use super::money::{Amount, Currency};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(pub Uuid);

impl PaymentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Uuid::parse_str(raw.trim())
            .map(Self)
            .map_err(|_| PaymentError::ValidationError(format!("Malformed payment id {raw:?}")))
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Authorized,
    Confirmed,
    Voided,
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Authorized => "authorized",
            Self::Confirmed => "confirmed",
            Self::Voided => "voided",
        };
        f.write_str(name)
    }
}

/// Funds authorized against, and possibly applied to, a single invoice.
///
/// A payment starts `Authorized` and settles exactly once, either to
/// `Confirmed` or to `Voided`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Payment {
    pub id: PaymentId,
    pub invoice_id: InvoiceId,
    pub amount: Amount,
    pub currency: Currency,
    pub state: PaymentState,
    pub idempotency_key: String,
    pub version: u64,
    pub authorized_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn authorize(
        invoice_id: InvoiceId,
        amount: Amount,
        currency: Currency,
        idempotency_key: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentId::generate(),
            invoice_id,
            amount,
            currency,
            state: PaymentState::Authorized,
            idempotency_key,
            version: 0,
            authorized_at: now,
            settled_at: None,
        }
    }

    pub fn ensure_version(&self, expected: u64) -> Result<()> {
        if self.version == expected {
            Ok(())
        } else {
            Err(PaymentError::VersionConflict {
                id: self.id.to_string(),
                expected,
                actual: self.version,
            })
        }
    }

    pub fn confirm(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.state {
            PaymentState::Authorized => {
                self.state = PaymentState::Confirmed;
                self.settled_at = Some(now);
                Ok(())
            }
            PaymentState::Confirmed => Err(PaymentError::AlreadyConfirmed(self.id)),
            PaymentState::Voided => Err(PaymentError::InvalidState(format!(
                "payment {} is voided",
                self.id
            ))),
        }
    }

    pub fn void(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state != PaymentState::Authorized {
            return Err(PaymentError::InvalidState(format!(
                "cannot void payment {} in state {}",
                self.id, self.state
            )));
        }
        self.state = PaymentState::Voided;
        self.settled_at = Some(now);
        Ok(())
    }

    /// Expiry is advisory: an expired authorization can still be confirmed
    /// until something actually voids it.
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.state == PaymentState::Authorized && now - self.authorized_at >= ttl
    }

    pub fn bump(&mut self) -> u64 {
        let expected = self.version;
        self.version += 1;
        expected
    }
}
