use super::authorization::PaymentAuthorizationCoordinator;
use crate::domain::invoice::InvoiceStatus;
use crate::domain::payment::{PaymentId, PaymentState};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};

/// Outcome of one reconciliation sweep.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReconcileReport {
    /// Expired authorizations that were voided.
    pub voided: Vec<PaymentId>,
    /// Invoice holds dropped because their payment was voided or is gone.
    pub released: Vec<PaymentId>,
    /// Confirmed payments whose invoice update was finished.
    pub settled: Vec<PaymentId>,
    /// Payments that still could not be brought in line with their invoice.
    pub diverged: Vec<(PaymentId, String)>,
}

/// Background housekeeping over the payment ledger: voids stale
/// authorizations, frees invoice holds nobody will confirm, and repairs
/// confirmations that stopped half way. One bad record never stops a sweep.
pub struct Reconciler {
    coordinator: PaymentAuthorizationCoordinator,
    authorization_ttl: Duration,
}

impl Reconciler {
    pub fn new(coordinator: PaymentAuthorizationCoordinator, authorization_ttl: Duration) -> Self {
        Self {
            coordinator,
            authorization_ttl,
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for payment in self
            .coordinator
            .expired_authorizations(self.authorization_ttl, now)
            .await?
        {
            match self.coordinator.void_payment(&payment.id, payment.version).await {
                Ok(_) => report.voided.push(payment.id),
                // Confirmed or voided by someone else since the listing.
                Err(PaymentError::VersionConflict { .. } | PaymentError::InvalidState(_)) => {
                    warn!(payment_id = %payment.id, "authorization changed during sweep, skipped");
                }
                Err(err) => return Err(err),
            }
        }

        for status in [InvoiceStatus::Open, InvoiceStatus::PartiallyPaid] {
            for invoice in self.coordinator.invoices().list_invoices(status).await? {
                for pending in &invoice.pending_payments {
                    let stale = match self.coordinator.get_payment(&pending.payment_id).await {
                        Ok(payment) => payment.state == PaymentState::Voided,
                        Err(PaymentError::NotFound { .. }) => true,
                        Err(err) => {
                            warn!(payment_id = %pending.payment_id, error = %err, "could not check reservation");
                            report.diverged.push((pending.payment_id, err.to_string()));
                            continue;
                        }
                    };
                    if !stale {
                        continue;
                    }
                    match self
                        .coordinator
                        .release_reservation(&invoice.id, &pending.payment_id)
                        .await
                    {
                        Ok(()) => report.released.push(pending.payment_id),
                        Err(err) => {
                            warn!(payment_id = %pending.payment_id, error = %err, "could not release reservation");
                            report.diverged.push((pending.payment_id, err.to_string()));
                        }
                    }
                }
            }
        }

        for payment in self.coordinator.list_payments(PaymentState::Confirmed).await? {
            let invoice = match self.coordinator.invoices().get_invoice(&payment.invoice_id).await {
                Ok(invoice) => invoice,
                Err(err) => {
                    error!(payment_id = %payment.id, invoice_id = %payment.invoice_id, error = %err, "invoice of confirmed payment unreadable");
                    report.diverged.push((payment.id, err.to_string()));
                    continue;
                }
            };
            if invoice.has_applied(&payment.id) {
                continue;
            }
            match self.coordinator.settle(&payment).await {
                Ok(_) => report.settled.push(payment.id),
                Err(err) => {
                    error!(payment_id = %payment.id, error = %err, "payment still diverged from its invoice");
                    report.diverged.push((payment.id, err.to_string()));
                }
            }
        }

        info!(
            voided = report.voided.len(),
            released = report.released.len(),
            settled = report.settled.len(),
            diverged = report.diverged.len(),
            "reconciliation sweep finished"
        );
        Ok(report)
    }
}
