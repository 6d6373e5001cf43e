use super::money::{Amount, Balance, Currency};
use super::payment::PaymentId;
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub Uuid);

impl InvoiceId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Uuid::parse_str(raw.trim())
            .map(Self)
            .map_err(|_| PaymentError::ValidationError(format!("Malformed invoice id {raw:?}")))
    }
}

impl fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Open,
    PartiallyPaid,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn accepts_payments(self) -> bool {
        matches!(self, Self::Open | Self::PartiallyPaid)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Draft => "draft",
            Self::Open => "open",
            Self::PartiallyPaid => "partially_paid",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct LineItem {
    pub description: String,
    pub amount: Decimal,
    pub currency: Currency,
}

/// Funds a payment holds against an invoice between its confirmation and
/// the moment they are applied.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct PendingPayment {
    pub payment_id: PaymentId,
    pub amount: Amount,
}

/// A billable record tracking what is owed and how much has been paid.
///
/// `version` is the optimistic concurrency token: every accepted mutation
/// bumps it, and stores only accept a write whose expected version matches
/// the stored one.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Invoice {
    pub id: InvoiceId,
    pub status: InvoiceStatus,
    pub currency: Currency,
    pub line_items: Vec<LineItem>,
    pub total_amount: Balance,
    pub amount_paid: Balance,
    /// Payments whose amount is already included in `amount_paid`.
    pub applied_payments: Vec<PaymentId>,
    /// Payments being confirmed. Their amounts are held out of the
    /// available balance until they are applied or released.
    #[serde(default)]
    pub pending_payments: Vec<PendingPayment>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Builds an unsaved draft (version 0) after validating the line items.
    pub fn draft(currency: Currency, line_items: Vec<LineItem>, now: DateTime<Utc>) -> Result<Self> {
        if line_items.is_empty() {
            return Err(PaymentError::ValidationError(
                "An invoice needs at least one line item".to_string(),
            ));
        }
        for item in &line_items {
            validate_item(item, &currency)?;
            if item.amount <= Decimal::ZERO {
                return Err(PaymentError::ValidationError(format!(
                    "Line item {:?} must have a positive amount",
                    item.description
                )));
            }
        }

        let total_amount = Balance::checked_sum(line_items.iter().map(|i| Balance::new(i.amount)))?;
        Ok(Self {
            id: InvoiceId::generate(),
            status: InvoiceStatus::Draft,
            currency,
            line_items,
            total_amount,
            amount_paid: Balance::ZERO,
            applied_payments: Vec::new(),
            pending_payments: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn outstanding(&self) -> Balance {
        self.total_amount - self.amount_paid
    }

    /// Amount held by confirmations that have not been applied yet. Never
    /// exceeds `outstanding`.
    pub fn pending_total(&self) -> Balance {
        self.pending_payments
            .iter()
            .fold(Balance::ZERO, |acc, p| Balance::new(acc.value().saturating_add(p.amount.value())))
    }

    /// What a new payment may still claim.
    pub fn available(&self) -> Balance {
        self.outstanding() - self.pending_total()
    }

    pub fn has_applied(&self, payment_id: &PaymentId) -> bool {
        self.applied_payments.contains(payment_id)
    }

    pub fn has_pending(&self, payment_id: &PaymentId) -> bool {
        self.pending_payments.iter().any(|p| &p.payment_id == payment_id)
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

    /// Draft -> Open.
    pub fn open(&mut self) -> Result<()> {
        if self.status != InvoiceStatus::Draft {
            return Err(self.illegal("open"));
        }
        self.status = InvoiceStatus::Open;
        Ok(())
    }

    /// Appends delta line items and recomputes the total.
    ///
    /// Deltas may be credits (negative amounts) but the resulting total must
    /// stay positive and may not drop below what has already been paid or is
    /// held by pending payments. A partially paid invoice adjusted down to
    /// exactly its paid amount is settled.
    pub fn adjust(&mut self, delta: Vec<LineItem>) -> Result<()> {
        if !self.status.accepts_payments() {
            return Err(self.illegal("adjust"));
        }
        if delta.is_empty() {
            return Err(PaymentError::ValidationError(
                "An adjustment needs at least one line item".to_string(),
            ));
        }
        for item in &delta {
            validate_item(item, &self.currency)?;
            if item.amount.is_zero() {
                return Err(PaymentError::ValidationError(format!(
                    "Line item {:?} has a zero amount",
                    item.description
                )));
            }
        }

        let new_total = Balance::checked_sum(
            std::iter::once(self.total_amount).chain(delta.iter().map(|i| Balance::new(i.amount))),
        )?;
        if !new_total.is_positive() {
            return Err(PaymentError::ValidationError(format!(
                "Adjusted total {new_total} must stay positive"
            )));
        }
        let committed = self.amount_paid.checked_add(self.pending_total())?;
        if new_total < committed {
            return Err(PaymentError::ValidationError(format!(
                "Adjusted total {new_total} is below the amount already paid or pending {committed}"
            )));
        }

        self.line_items.extend(delta);
        self.total_amount = new_total;
        if self.amount_paid == self.total_amount {
            self.status = InvoiceStatus::Paid;
        }
        Ok(())
    }

    /// Holds `amount` for a payment about to be confirmed. Returns `false`
    /// when the payment already holds funds or was already applied.
    pub fn reserve_payment(&mut self, payment_id: PaymentId, amount: Amount) -> Result<bool> {
        if self.has_applied(&payment_id) || self.has_pending(&payment_id) {
            return Ok(false);
        }
        self.ensure_payable(amount)?;
        self.pending_payments.push(PendingPayment { payment_id, amount });
        Ok(true)
    }

    /// Drops a reservation whose payment never got confirmed.
    pub fn release_payment(&mut self, payment_id: &PaymentId) -> bool {
        let before = self.pending_payments.len();
        self.pending_payments.retain(|p| &p.payment_id != payment_id);
        self.pending_payments.len() != before
    }

    /// Applies a confirmed payment, consuming its reservation if it holds
    /// one. Returns `false` when the payment was already applied, leaving
    /// the invoice untouched.
    pub fn apply_payment(&mut self, payment_id: PaymentId, amount: Amount) -> Result<bool> {
        if self.has_applied(&payment_id) {
            return Ok(false);
        }
        if !self.release_payment(&payment_id) {
            self.ensure_payable(amount)?;
        }

        self.amount_paid = self.amount_paid.checked_add(amount.into())?;
        self.applied_payments.push(payment_id);
        self.status = if self.amount_paid < self.total_amount {
            InvoiceStatus::PartiallyPaid
        } else {
            InvoiceStatus::Paid
        };
        Ok(true)
    }

    /// Only unpaid invoices can be cancelled; paid ones are refunded through
    /// compensating payments instead. Funds held by a confirmation in flight
    /// count as paid.
    pub fn cancel(&mut self) -> Result<()> {
        match self.status {
            InvoiceStatus::Draft | InvoiceStatus::Open
                if self.amount_paid == Balance::ZERO && self.pending_payments.is_empty() =>
            {
                self.status = InvoiceStatus::Cancelled;
                Ok(())
            }
            _ => Err(self.illegal("cancel")),
        }
    }

    /// Stamps an accepted mutation and returns the version the store must
    /// still hold for the write to succeed.
    pub fn bump(&mut self, now: DateTime<Utc>) -> u64 {
        let expected = self.version;
        self.version += 1;
        self.updated_at = now;
        expected
    }

    fn ensure_payable(&self, amount: Amount) -> Result<()> {
        if !self.status.accepts_payments() {
            return Err(self.illegal("pay"));
        }
        let available = self.available();
        if Balance::from(amount) > available {
            return Err(PaymentError::OverpaymentError {
                requested: amount.value(),
                outstanding: available.value(),
            });
        }
        Ok(())
    }

    fn illegal(&self, operation: &str) -> PaymentError {
        PaymentError::InvalidState(format!(
            "cannot {operation} invoice {} in status {}",
            self.id, self.status
        ))
    }
}

fn validate_item(item: &LineItem, currency: &Currency) -> Result<()> {
    if item.description.trim().is_empty() {
        return Err(PaymentError::ValidationError(
            "Line item description is required".to_string(),
        ));
    }
    if &item.currency != currency {
        return Err(PaymentError::ValidationError(format!(
            "Line item {:?} is in {} but the invoice is in {}",
            item.description, item.currency, currency
        )));
    }
    Ok(())
}
