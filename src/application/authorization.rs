use super::invoices::InvoiceLifecycleManager;
use crate::domain::invoice::{Invoice, InvoiceId};
use crate::domain::money::{Amount, Balance, Currency};
use crate::domain::payment::{Payment, PaymentId, PaymentState};
use crate::domain::ports::PaymentStoreRef;
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};

/// A confirmed payment together with the invoice it was applied to.
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    pub payment: Payment,
    pub invoice: Invoice,
}

/// Runs the two-phase Authorize -> Confirm protocol.
///
/// Authorizing records intent only. Confirming is a saga over three writes:
/// the payment's amount is first reserved on the invoice, then the payment
/// transition is committed under its own version guard, and finally the
/// reservation is turned into an applied payment. Business rules are all
/// checked by the reservation, so once the payment is confirmed only
/// exhausted retries on invoice conflicts can stop the saga.
#[derive(Clone)]
pub struct PaymentAuthorizationCoordinator {
    payments: PaymentStoreRef,
    invoices: InvoiceLifecycleManager,
    confirm_retry_budget: u32,
}

impl PaymentAuthorizationCoordinator {
    pub fn new(
        payments: PaymentStoreRef,
        invoices: InvoiceLifecycleManager,
        confirm_retry_budget: u32,
    ) -> Self {
        Self {
            payments,
            invoices,
            confirm_retry_budget,
        }
    }

    pub async fn authorize_payment(
        &self,
        invoice_id: &InvoiceId,
        amount: Amount,
        currency: Currency,
        idempotency_key: String,
    ) -> Result<Payment> {
        let invoice = self.invoices.get_invoice(invoice_id).await?;
        check_payable(&invoice, amount, &currency)?;

        let mut payment = Payment::authorize(invoice.id, amount, currency, idempotency_key, Utc::now());
        let expected = payment.bump();
        self.payments.put_if_version(payment.clone(), expected).await?;

        info!(
            payment_id = %payment.id,
            invoice_id = %invoice.id,
            amount = %payment.amount,
            "payment authorized"
        );
        Ok(payment)
    }

    /// Confirms an authorization and applies it to its invoice.
    ///
    /// A payment that is already confirmed and already applied yields
    /// `AlreadyConfirmed`. One that is confirmed but whose invoice update
    /// never landed has its saga resumed instead.
    pub async fn confirm_payment(&self, id: &PaymentId, expected_version: u64) -> Result<Confirmation> {
        let mut payment = self.get_payment(id).await?;

        if payment.state == PaymentState::Confirmed {
            let invoice = self.invoices.get_invoice(&payment.invoice_id).await?;
            if invoice.has_applied(&payment.id) {
                return Err(PaymentError::AlreadyConfirmed(payment.id));
            }
            warn!(payment_id = %payment.id, "resuming unfinished payment confirmation");
            let invoice = self.settle(&payment).await?;
            return Ok(Confirmation { payment, invoice });
        }

        payment.ensure_version(expected_version)?;
        payment.confirm(Utc::now())?;
        self.invoices
            .reserve_payment(&payment, self.confirm_retry_budget)
            .await?;

        let expected = payment.bump();
        if let Err(err) = self.payments.put_if_version(payment.clone(), expected).await {
            self.abandon_reservation(&payment).await;
            return Err(err);
        }
        info!(payment_id = %payment.id, version = payment.version, "payment confirmed");

        let invoice = self.settle(&payment).await?;
        Ok(Confirmation { payment, invoice })
    }

    pub async fn void_payment(&self, id: &PaymentId, expected_version: u64) -> Result<Payment> {
        let mut payment = self.get_payment(id).await?;
        payment.ensure_version(expected_version)?;
        payment.void(Utc::now())?;
        let expected = payment.bump();
        self.payments.put_if_version(payment.clone(), expected).await?;

        info!(payment_id = %payment.id, invoice_id = %payment.invoice_id, "payment voided");
        Ok(payment)
    }

    pub async fn get_payment(&self, id: &PaymentId) -> Result<Payment> {
        self.payments
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::not_found("payment", id))
    }

    pub async fn list_payments(&self, state: PaymentState) -> Result<Vec<Payment>> {
        self.payments.list_by_state(state).await
    }

    /// Authorized payments whose confirmation window has lapsed.
    pub async fn expired_authorizations(&self, ttl: Duration, now: DateTime<Utc>) -> Result<Vec<Payment>> {
        let authorized = self.payments.list_by_state(PaymentState::Authorized).await?;
        Ok(authorized
            .into_iter()
            .filter(|p| p.is_expired(ttl, now))
            .collect())
    }

    pub fn invoices(&self) -> &InvoiceLifecycleManager {
        &self.invoices
    }

    /// Drops a payment's hold on its invoice. A confirmed payment keeps its
    /// hold until it is applied.
    pub(crate) async fn release_reservation(&self, invoice_id: &InvoiceId, payment_id: &PaymentId) -> Result<()> {
        if let Some(payment) = self.payments.get(payment_id).await? {
            if payment.state == PaymentState::Confirmed {
                return Ok(());
            }
        }
        self.invoices
            .release_payment(invoice_id, payment_id, self.confirm_retry_budget)
            .await?;
        Ok(())
    }

    /// Applies a confirmed payment to its invoice, re-reading the invoice on
    /// every version conflict. Never touches the payment record.
    pub(crate) async fn settle(&self, payment: &Payment) -> Result<Invoice> {
        self.invoices
            .apply_payment(payment, self.confirm_retry_budget)
            .await
            .map_err(|err| {
                error!(
                    payment_id = %payment.id,
                    invoice_id = %payment.invoice_id,
                    error = %err,
                    "PARTIAL COMMIT: payment confirmed but invoice balance not updated, reconciliation required"
                );
                PaymentError::PartialCommitError {
                    payment_id: payment.id,
                    invoice_id: payment.invoice_id,
                    reason: err.to_string(),
                }
            })
    }

    /// The payment write lost; give the held funds back unless a concurrent
    /// confirm of the same payment won, in which case they are its to apply.
    async fn abandon_reservation(&self, payment: &Payment) {
        if let Err(err) = self
            .release_reservation(&payment.invoice_id, &payment.id)
            .await
        {
            warn!(
                payment_id = %payment.id,
                invoice_id = %payment.invoice_id,
                error = %err,
                "could not release payment reservation, left for reconciliation"
            );
        }
    }
}

fn check_payable(invoice: &Invoice, amount: Amount, currency: &Currency) -> Result<()> {
    if &invoice.currency != currency {
        return Err(PaymentError::ValidationError(format!(
            "payment currency {currency} does not match invoice currency {}",
            invoice.currency
        )));
    }
    if !invoice.status.accepts_payments() {
        return Err(PaymentError::InvalidState(format!(
            "invoice {} in status {} does not accept payments",
            invoice.id, invoice.status
        )));
    }
    let available = invoice.available();
    if Balance::from(amount) > available {
        return Err(PaymentError::OverpaymentError {
            requested: amount.value(),
            outstanding: available.value(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::invoice::{InvoiceStatus, LineItem};
    use crate::domain::ports::{InvoiceStore, InvoiceStoreRef};
    use crate::infrastructure::in_memory::{InMemoryInvoiceStore, InMemoryPaymentStore};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    fn amount(value: Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    fn coordinator_with(invoices: InvoiceStoreRef, budget: u32) -> PaymentAuthorizationCoordinator {
        PaymentAuthorizationCoordinator::new(
            Arc::new(InMemoryPaymentStore::new()),
            InvoiceLifecycleManager::new(invoices),
            budget,
        )
    }

    async fn invoice_of(coordinator: &PaymentAuthorizationCoordinator, total: Decimal) -> Invoice {
        coordinator
            .invoices()
            .create_invoice(
                usd(),
                vec![LineItem {
                    description: "widget".to_string(),
                    amount: total,
                    currency: usd(),
                }],
            )
            .await
            .unwrap()
    }

    /// Fails the next `conflicts` invoice writes that apply a payment.
    struct FlakyInvoiceStore {
        inner: InMemoryInvoiceStore,
        conflicts: AtomicU32,
    }

    #[async_trait]
    impl InvoiceStore for FlakyInvoiceStore {
        async fn get(&self, id: &InvoiceId) -> Result<Option<Invoice>> {
            self.inner.get(id).await
        }

        async fn put_if_version(&self, invoice: Invoice, expected_version: u64) -> Result<()> {
            if !invoice.applied_payments.is_empty()
                && self
                    .conflicts
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(PaymentError::VersionConflict {
                    id: invoice.id.to_string(),
                    expected: expected_version,
                    actual: expected_version + 1,
                });
            }
            self.inner.put_if_version(invoice, expected_version).await
        }

        async fn list_by_status(&self, status: InvoiceStatus) -> Result<Vec<Invoice>> {
            self.inner.list_by_status(status).await
        }
    }

    /// Widens the window between reading an invoice and writing it back.
    struct SlowInvoiceStore {
        inner: InMemoryInvoiceStore,
    }

    #[async_trait]
    impl InvoiceStore for SlowInvoiceStore {
        async fn get(&self, id: &InvoiceId) -> Result<Option<Invoice>> {
            let invoice = self.inner.get(id).await;
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            invoice
        }

        async fn put_if_version(&self, invoice: Invoice, expected_version: u64) -> Result<()> {
            self.inner.put_if_version(invoice, expected_version).await
        }

        async fn list_by_status(&self, status: InvoiceStatus) -> Result<Vec<Invoice>> {
            self.inner.list_by_status(status).await
        }
    }

    #[tokio::test]
    async fn test_authorize_does_not_touch_invoice() {
        let coordinator = coordinator_with(Arc::new(InMemoryInvoiceStore::new()), 3);
        let invoice = invoice_of(&coordinator, dec!(100)).await;

        let payment = coordinator
            .authorize_payment(&invoice.id, amount(dec!(40)), usd(), "k1".to_string())
            .await
            .unwrap();
        assert_eq!(payment.state, PaymentState::Authorized);
        assert_eq!(payment.version, 1);

        let unchanged = coordinator.invoices().get_invoice(&invoice.id).await.unwrap();
        assert_eq!(unchanged, invoice);
    }

    #[tokio::test]
    async fn test_authorize_rejects_currency_mismatch_and_overpayment() {
        let coordinator = coordinator_with(Arc::new(InMemoryInvoiceStore::new()), 3);
        let invoice = invoice_of(&coordinator, dec!(100)).await;

        let eur = coordinator
            .authorize_payment(&invoice.id, amount(dec!(10)), Currency::new("EUR").unwrap(), "k".into())
            .await;
        assert!(matches!(eur, Err(PaymentError::ValidationError(_))));

        let over = coordinator
            .authorize_payment(&invoice.id, amount(dec!(100.01)), usd(), "k".into())
            .await;
        assert!(matches!(over, Err(PaymentError::OverpaymentError { .. })));
        assert!(coordinator
            .list_payments(PaymentState::Authorized)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_confirm_applies_and_replay_reports_already_confirmed() {
        let coordinator = coordinator_with(Arc::new(InMemoryInvoiceStore::new()), 3);
        let invoice = invoice_of(&coordinator, dec!(100)).await;
        let payment = coordinator
            .authorize_payment(&invoice.id, amount(dec!(100)), usd(), "k".into())
            .await
            .unwrap();

        let confirmation = coordinator.confirm_payment(&payment.id, 1).await.unwrap();
        assert_eq!(confirmation.payment.state, PaymentState::Confirmed);
        assert_eq!(confirmation.invoice.status, InvoiceStatus::Paid);

        let replay = coordinator.confirm_payment(&payment.id, 1).await;
        assert!(matches!(replay, Err(PaymentError::AlreadyConfirmed(id)) if id == payment.id));
    }

    #[tokio::test]
    async fn test_confirm_voided_is_invalid_state() {
        let coordinator = coordinator_with(Arc::new(InMemoryInvoiceStore::new()), 3);
        let invoice = invoice_of(&coordinator, dec!(100)).await;
        let payment = coordinator
            .authorize_payment(&invoice.id, amount(dec!(50)), usd(), "k".into())
            .await
            .unwrap();
        coordinator.void_payment(&payment.id, 1).await.unwrap();

        let result = coordinator.confirm_payment(&payment.id, 2).await;
        assert!(matches!(result, Err(PaymentError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_confirm_retries_invoice_conflicts_within_budget() {
        let store = Arc::new(FlakyInvoiceStore {
            inner: InMemoryInvoiceStore::new(),
            conflicts: AtomicU32::new(0),
        });
        let coordinator = coordinator_with(store.clone(), 2);
        let invoice = invoice_of(&coordinator, dec!(100)).await;
        let payment = coordinator
            .authorize_payment(&invoice.id, amount(dec!(30)), usd(), "k".into())
            .await
            .unwrap();

        store.conflicts.store(2, Ordering::SeqCst);
        let confirmation = coordinator.confirm_payment(&payment.id, 1).await.unwrap();
        assert_eq!(confirmation.invoice.amount_paid, Balance::new(dec!(30)));
        assert_eq!(confirmation.invoice.status, InvoiceStatus::PartiallyPaid);
    }

    #[tokio::test]
    async fn test_exhausted_budget_is_partial_commit_and_resumable() {
        let store = Arc::new(FlakyInvoiceStore {
            inner: InMemoryInvoiceStore::new(),
            conflicts: AtomicU32::new(0),
        });
        let coordinator = coordinator_with(store.clone(), 1);
        let invoice = invoice_of(&coordinator, dec!(100)).await;
        let payment = coordinator
            .authorize_payment(&invoice.id, amount(dec!(30)), usd(), "k".into())
            .await
            .unwrap();

        store.conflicts.store(5, Ordering::SeqCst);
        let result = coordinator.confirm_payment(&payment.id, 1).await;
        assert!(matches!(
            result,
            Err(PaymentError::PartialCommitError { payment_id, invoice_id, .. })
                if payment_id == payment.id && invoice_id == invoice.id
        ));
        // The payment transition stuck; the invoice only holds the funds.
        let stored = coordinator.get_payment(&payment.id).await.unwrap();
        assert_eq!(stored.state, PaymentState::Confirmed);
        let held = coordinator.invoices().get_invoice(&invoice.id).await.unwrap();
        assert_eq!(held.amount_paid, Balance::ZERO);
        assert!(held.has_pending(&payment.id));

        store.conflicts.store(0, Ordering::SeqCst);
        let resumed = coordinator.confirm_payment(&payment.id, 2).await.unwrap();
        assert_eq!(resumed.invoice.amount_paid, Balance::new(dec!(30)));
    }

    #[tokio::test]
    async fn test_unapplied_confirmation_blocks_cancel() {
        let store = Arc::new(FlakyInvoiceStore {
            inner: InMemoryInvoiceStore::new(),
            conflicts: AtomicU32::new(0),
        });
        let coordinator = coordinator_with(store.clone(), 0);
        let invoice = invoice_of(&coordinator, dec!(100)).await;
        let payment = coordinator
            .authorize_payment(&invoice.id, amount(dec!(100)), usd(), "k".into())
            .await
            .unwrap();

        store.conflicts.store(1, Ordering::SeqCst);
        let result = coordinator.confirm_payment(&payment.id, 1).await;
        assert!(matches!(result, Err(PaymentError::PartialCommitError { .. })));

        let held = coordinator.invoices().get_invoice(&invoice.id).await.unwrap();
        let cancel = coordinator.invoices().cancel_invoice(&invoice.id, held.version).await;
        assert!(matches!(cancel, Err(PaymentError::InvalidState(_))));

        let resumed = coordinator.confirm_payment(&payment.id, 2).await.unwrap();
        assert_eq!(resumed.invoice.status, InvoiceStatus::Paid);
        assert_eq!(resumed.invoice.amount_paid, Balance::new(dec!(100)));
    }

    #[tokio::test]
    async fn test_racing_confirms_leave_the_loser_authorized() {
        let store = Arc::new(SlowInvoiceStore {
            inner: InMemoryInvoiceStore::new(),
        });
        let coordinator = coordinator_with(store, 3);
        let invoice = invoice_of(&coordinator, dec!(100)).await;
        let first = coordinator
            .authorize_payment(&invoice.id, amount(dec!(60)), usd(), "a".into())
            .await
            .unwrap();
        let second = coordinator
            .authorize_payment(&invoice.id, amount(dec!(60)), usd(), "b".into())
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            coordinator.confirm_payment(&first.id, 1),
            coordinator.confirm_payment(&second.id, 1)
        );
        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(PaymentError::OverpaymentError { .. }))));

        let confirmed = coordinator.list_payments(PaymentState::Confirmed).await.unwrap();
        let authorized = coordinator.list_payments(PaymentState::Authorized).await.unwrap();
        assert_eq!((confirmed.len(), authorized.len()), (1, 1));

        let settled = coordinator.invoices().get_invoice(&invoice.id).await.unwrap();
        assert_eq!(settled.applied_payments, vec![confirmed[0].id]);
        assert!(settled.pending_payments.is_empty());
        assert_eq!(settled.amount_paid, Balance::new(dec!(60)));
    }

    #[tokio::test]
    async fn test_stale_reservation_is_released_once_voided() {
        let coordinator = coordinator_with(Arc::new(InMemoryInvoiceStore::new()), 3);
        let invoice = invoice_of(&coordinator, dec!(100)).await;
        let payment = coordinator
            .authorize_payment(&invoice.id, amount(dec!(40)), usd(), "k".into())
            .await
            .unwrap();

        let mut confirming = payment.clone();
        confirming.confirm(Utc::now()).unwrap();
        coordinator.invoices().reserve_payment(&confirming, 0).await.unwrap();

        // Still authorized in the store: nothing confirmed it, so the hold goes.
        coordinator.void_payment(&payment.id, 1).await.unwrap();
        coordinator
            .release_reservation(&invoice.id, &payment.id)
            .await
            .unwrap();
        let freed = coordinator.invoices().get_invoice(&invoice.id).await.unwrap();
        assert_eq!(freed.available(), Balance::new(dec!(100)));
    }

    #[tokio::test]
    async fn test_expired_authorization_can_still_be_confirmed() {
        let coordinator = coordinator_with(Arc::new(InMemoryInvoiceStore::new()), 3);
        let invoice = invoice_of(&coordinator, dec!(100)).await;
        let payment = coordinator
            .authorize_payment(&invoice.id, amount(dec!(10)), usd(), "k".into())
            .await
            .unwrap();

        let later = Utc::now() + Duration::hours(2);
        let expired = coordinator
            .expired_authorizations(Duration::minutes(15), later)
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);

        let confirmation = coordinator.confirm_payment(&payment.id, 1).await.unwrap();
        assert_eq!(confirmation.payment.state, PaymentState::Confirmed);
    }
}
