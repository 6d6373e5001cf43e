use crate::domain::invoice::{Invoice, InvoiceId, InvoiceStatus, LineItem};
use crate::domain::money::Currency;
use crate::domain::payment::{Payment, PaymentId, PaymentState};
use crate::domain::ports::InvoiceStoreRef;
use crate::error::{PaymentError, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

/// Owns invoice state transitions.
///
/// Every mutation is a read-modify-write against the store: the caller's
/// `expected_version` is checked against the fresh read, and the write only
/// lands if nobody else bumped the version in between.
#[derive(Clone)]
pub struct InvoiceLifecycleManager {
    invoices: InvoiceStoreRef,
}

impl InvoiceLifecycleManager {
    pub fn new(invoices: InvoiceStoreRef) -> Self {
        Self { invoices }
    }

    /// Creates an invoice and opens it right away; the stored copy starts at
    /// version 1.
    pub async fn create_invoice(&self, currency: Currency, line_items: Vec<LineItem>) -> Result<Invoice> {
        let now = Utc::now();
        let mut invoice = Invoice::draft(currency, line_items, now)?;
        invoice.open()?;
        let expected = invoice.bump(now);
        self.invoices.put_if_version(invoice.clone(), expected).await?;

        info!(
            invoice_id = %invoice.id,
            total = %invoice.total_amount,
            currency = %invoice.currency,
            "invoice created"
        );
        Ok(invoice)
    }

    pub async fn get_invoice(&self, id: &InvoiceId) -> Result<Invoice> {
        self.invoices
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::not_found("invoice", id))
    }

    pub async fn list_invoices(&self, status: InvoiceStatus) -> Result<Vec<Invoice>> {
        self.invoices.list_by_status(status).await
    }

    pub async fn adjust_invoice(
        &self,
        id: &InvoiceId,
        expected_version: u64,
        delta: Vec<LineItem>,
    ) -> Result<Invoice> {
        let mut invoice = self.get_invoice(id).await?;
        invoice.ensure_version(expected_version)?;
        invoice.adjust(delta)?;
        let invoice = self.commit(invoice).await?;

        info!(
            invoice_id = %invoice.id,
            version = invoice.version,
            total = %invoice.total_amount,
            status = %invoice.status,
            "invoice adjusted"
        );
        Ok(invoice)
    }

    /// Holds the payment's amount on its invoice ahead of confirmation, so
    /// concurrent confirmations cannot jointly overdraw the balance.
    pub async fn reserve_payment(&self, payment: &Payment, retries: u32) -> Result<Invoice> {
        let invoice = self
            .modify(&payment.invoice_id, retries, |invoice| {
                ensure_same_currency(invoice, payment)?;
                invoice.reserve_payment(payment.id, payment.amount)
            })
            .await?;
        debug!(invoice_id = %invoice.id, payment_id = %payment.id, "payment amount reserved");
        Ok(invoice)
    }

    pub async fn release_payment(
        &self,
        id: &InvoiceId,
        payment_id: &PaymentId,
        retries: u32,
    ) -> Result<Invoice> {
        let invoice = self
            .modify(id, retries, |invoice| Ok(invoice.release_payment(payment_id)))
            .await?;
        info!(invoice_id = %id, %payment_id, "payment reservation released");
        Ok(invoice)
    }

    /// Applies a confirmed payment to its invoice.
    ///
    /// Re-applying a payment the invoice already counts is a no-op that
    /// returns the current invoice.
    pub async fn apply_payment(&self, payment: &Payment, retries: u32) -> Result<Invoice> {
        if payment.state != PaymentState::Confirmed {
            return Err(PaymentError::InvalidState(format!(
                "payment {} is {} and cannot be applied",
                payment.id, payment.state
            )));
        }

        let mut applied = false;
        let invoice = self
            .modify(&payment.invoice_id, retries, |invoice| {
                ensure_same_currency(invoice, payment)?;
                applied = invoice.apply_payment(payment.id, payment.amount)?;
                Ok(applied)
            })
            .await?;

        if applied {
            info!(
                invoice_id = %invoice.id,
                payment_id = %payment.id,
                amount_paid = %invoice.amount_paid,
                status = %invoice.status,
                "payment applied to invoice"
            );
        } else {
            debug!(invoice_id = %invoice.id, payment_id = %payment.id, "payment already applied");
        }
        Ok(invoice)
    }

    pub async fn cancel_invoice(&self, id: &InvoiceId, expected_version: u64) -> Result<Invoice> {
        let mut invoice = self.get_invoice(id).await?;
        invoice.ensure_version(expected_version)?;
        invoice.cancel()?;
        let invoice = self.commit(invoice).await?;

        info!(invoice_id = %invoice.id, version = invoice.version, "invoice cancelled");
        Ok(invoice)
    }

    /// Read-modify-write that re-reads the invoice and re-runs `mutate` on
    /// version conflicts, up to `retries` extra attempts. `mutate` returns
    /// `false` when there is nothing to write.
    async fn modify<F>(&self, id: &InvoiceId, retries: u32, mut mutate: F) -> Result<Invoice>
    where
        F: FnMut(&mut Invoice) -> Result<bool> + Send,
    {
        let mut attempt = 0;
        loop {
            let mut invoice = self.get_invoice(id).await?;
            if !mutate(&mut invoice)? {
                return Ok(invoice);
            }
            match self.commit(invoice).await {
                Err(PaymentError::VersionConflict { .. }) if attempt < retries => {
                    attempt += 1;
                    warn!(invoice_id = %id, attempt, "invoice changed concurrently, retrying");
                }
                outcome => return outcome,
            }
        }
    }

    async fn commit(&self, mut invoice: Invoice) -> Result<Invoice> {
        let expected = invoice.bump(Utc::now());
        self.invoices.put_if_version(invoice.clone(), expected).await?;
        Ok(invoice)
    }
}

fn ensure_same_currency(invoice: &Invoice, payment: &Payment) -> Result<()> {
    if payment.currency != invoice.currency {
        return Err(PaymentError::ValidationError(format!(
            "payment currency {} does not match invoice currency {}",
            payment.currency, invoice.currency
        )));
    }
    Ok(())
}
