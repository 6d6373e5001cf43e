use super::authorization::PaymentAuthorizationCoordinator;
use super::invoices::InvoiceLifecycleManager;
use super::reconciler::Reconciler;
use crate::config::ServiceConfig;
use crate::domain::idempotency::{Reservation, fingerprint};
use crate::domain::invoice::{InvoiceId, LineItem};
use crate::domain::money::{Amount, Currency};
use crate::domain::payment::PaymentId;
use crate::domain::ports::IdempotencyStoreRef;
use crate::error::{PaymentError, Result};
use crate::infrastructure::Ledger;
use crate::interfaces::rpc::messages::*;
use crate::interfaces::rpc::status::RpcStatus;
use crate::interfaces::rpc::{PaymentsRpc, RpcResult};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::future::Future;
use tracing::{debug, error, instrument, warn};

/// The RPC-facing facade.
///
/// Validates and normalizes requests, runs mutating calls through the
/// idempotency index, delegates to the lifecycle manager or the
/// authorization coordinator, and maps failures to wire statuses.
#[derive(Clone)]
pub struct PaymentsService {
    invoices: InvoiceLifecycleManager,
    coordinator: PaymentAuthorizationCoordinator,
    idempotency: IdempotencyStoreRef,
    pending_ttl: Duration,
}

/// The effective idempotency key of a call and the fingerprint of its
/// normalized body.
struct Keyed {
    key: String,
    fingerprint: String,
}

impl Keyed {
    /// Falls back to a key derived from the fingerprint when the caller
    /// supplied none, so identical anonymous requests collapse into one.
    fn new(call: &str, supplied: Option<&str>, body: &serde_json::Value) -> Result<Self> {
        let fingerprint = fingerprint(call, body);
        let key = match supplied.map(str::trim) {
            Some("") => {
                return Err(PaymentError::ValidationError(
                    "idempotency_key must not be blank".to_string(),
                ));
            }
            Some(key) => key.to_string(),
            None => format!("{call}:{fingerprint}"),
        };
        Ok(Self { key, fingerprint })
    }
}

impl PaymentsService {
    pub fn new(ledger: Ledger, config: &ServiceConfig) -> Self {
        let invoices = InvoiceLifecycleManager::new(ledger.invoices);
        let coordinator = PaymentAuthorizationCoordinator::new(
            ledger.payments,
            invoices.clone(),
            config.confirm_retry_budget,
        );
        Self {
            invoices,
            coordinator,
            idempotency: ledger.idempotency,
            pending_ttl: config.idempotency_pending_ttl,
        }
    }

    pub fn reconciler(&self, authorization_ttl: Duration) -> Reconciler {
        Reconciler::new(self.coordinator.clone(), authorization_ttl)
    }

    /// Runs `operation` at most once per key.
    ///
    /// Successes and partial commits are recorded as the key's terminal
    /// result. Any other failure left nothing durable behind, so the key is
    /// released and the request may be sent again.
    async fn idempotent<T, F>(&self, keyed: &Keyed, operation: F) -> RpcResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: Future<Output = Result<T>>,
    {
        let reservation = self
            .idempotency
            .reserve(&keyed.key, &keyed.fingerprint, Utc::now(), self.pending_ttl)
            .await?;
        if let Reservation::Replay(snapshot) = reservation {
            debug!(key = %keyed.key, "replaying stored result");
            let stored: RpcResult<T> = serde_json::from_value(snapshot).map_err(PaymentError::from)?;
            return stored;
        }

        match operation.await {
            Ok(response) => {
                let snapshot = serde_json::to_value(Ok::<&T, &RpcStatus>(&response))
                    .map_err(PaymentError::from)?;
                if let Err(err) = self.idempotency.complete(&keyed.key, snapshot).await {
                    error!(key = %keyed.key, error = %err, "failed to record idempotent result");
                }
                Ok(response)
            }
            Err(err) if err.committed() => {
                let status = RpcStatus::from(err);
                let snapshot = serde_json::to_value(Err::<&T, &RpcStatus>(&status))
                    .map_err(PaymentError::from)?;
                if let Err(err) = self.idempotency.complete(&keyed.key, snapshot).await {
                    error!(key = %keyed.key, error = %err, "failed to record idempotent result");
                }
                Err(status)
            }
            Err(err) => {
                if let Err(release_err) = self.idempotency.release(&keyed.key).await {
                    warn!(key = %keyed.key, error = %release_err, "failed to release idempotency key");
                }
                Err(err.into())
            }
        }
    }
}

fn line_items(inputs: Vec<LineItemInput>) -> Result<Vec<LineItem>> {
    inputs
        .into_iter()
        .map(|input| {
            Ok(LineItem {
                description: input.description.trim().to_string(),
                amount: input.amount.normalize(),
                currency: Currency::new(&input.currency)?,
            })
        })
        .collect()
}

#[async_trait]
impl PaymentsRpc for PaymentsService {
    #[instrument(skip_all, fields(invoice_id = %request.invoice_id))]
    async fn authorize_payment(&self, request: AuthorizePaymentRequest) -> RpcResult<AuthorizePaymentResponse> {
        let invoice_id = InvoiceId::parse(&request.invoice_id)?;
        let amount = Amount::new(request.amount)?;
        let currency = Currency::new(&request.currency)?;
        let body = json!({ "invoice_id": invoice_id, "amount": amount, "currency": currency });
        let keyed = Keyed::new("AuthorizePayment", Some(&request.idempotency_key), &body)?;

        self.idempotent(&keyed, async {
            let payment = self
                .coordinator
                .authorize_payment(&invoice_id, amount, currency, keyed.key.clone())
                .await?;
            Ok(AuthorizePaymentResponse {
                payment_id: payment.id,
                state: payment.state,
                version: payment.version,
            })
        })
        .await
    }

    #[instrument(skip_all, fields(payment_id = %request.payment_id))]
    async fn confirm_payment(&self, request: ConfirmPaymentRequest) -> RpcResult<ConfirmPaymentResponse> {
        let payment_id = PaymentId::parse(&request.payment_id)?;
        let body = json!({ "payment_id": payment_id, "expected_version": request.expected_version });
        let keyed = Keyed::new("ConfirmPayment", request.idempotency_key.as_deref(), &body)?;

        self.idempotent(&keyed, async {
            let (payment, invoice) = match self
                .coordinator
                .confirm_payment(&payment_id, request.expected_version)
                .await
            {
                Ok(confirmation) => (confirmation.payment, confirmation.invoice),
                Err(PaymentError::AlreadyConfirmed(_)) => {
                    debug!(%payment_id, "payment already confirmed, returning current state");
                    let payment = self.coordinator.get_payment(&payment_id).await?;
                    let invoice = self.invoices.get_invoice(&payment.invoice_id).await?;
                    (payment, invoice)
                }
                Err(err) => return Err(err),
            };
            Ok(ConfirmPaymentResponse {
                payment_id: payment.id,
                state: payment.state,
                invoice_id: invoice.id,
                new_invoice_status: invoice.status,
            })
        })
        .await
    }

    #[instrument(skip_all, fields(payment_id = %request.payment_id))]
    async fn void_payment(&self, request: VoidPaymentRequest) -> RpcResult<VoidPaymentResponse> {
        let payment_id = PaymentId::parse(&request.payment_id)?;
        let body = json!({ "payment_id": payment_id, "expected_version": request.expected_version });
        let keyed = Keyed::new("VoidPayment", request.idempotency_key.as_deref(), &body)?;

        self.idempotent(&keyed, async {
            let payment = self
                .coordinator
                .void_payment(&payment_id, request.expected_version)
                .await?;
            Ok(VoidPaymentResponse {
                payment_id: payment.id,
                state: payment.state,
                version: payment.version,
            })
        })
        .await
    }

    #[instrument(skip_all, fields(items = request.line_items.len()))]
    async fn create_invoice(&self, request: CreateInvoiceRequest) -> RpcResult<CreateInvoiceResponse> {
        let currency = Currency::new(&request.currency)?;
        let items = line_items(request.line_items)?;
        let body = json!({ "currency": currency, "line_items": items });
        let keyed = Keyed::new("CreateInvoice", request.idempotency_key.as_deref(), &body)?;

        self.idempotent(&keyed, async {
            let invoice = self.invoices.create_invoice(currency, items).await?;
            Ok(CreateInvoiceResponse {
                invoice_id: invoice.id,
                version: invoice.version,
                status: invoice.status,
                total_amount: invoice.total_amount.value(),
            })
        })
        .await
    }

    #[instrument(skip_all, fields(invoice_id = %request.invoice_id))]
    async fn adjust_invoice(&self, request: AdjustInvoiceRequest) -> RpcResult<AdjustInvoiceResponse> {
        let invoice_id = InvoiceId::parse(&request.invoice_id)?;
        let delta = line_items(request.line_item_delta)?;
        let body = json!({
            "invoice_id": invoice_id,
            "expected_version": request.expected_version,
            "line_item_delta": delta,
        });
        let keyed = Keyed::new("AdjustInvoice", request.idempotency_key.as_deref(), &body)?;

        self.idempotent(&keyed, async {
            let invoice = self
                .invoices
                .adjust_invoice(&invoice_id, request.expected_version, delta)
                .await?;
            Ok(AdjustInvoiceResponse {
                version: invoice.version,
                status: invoice.status,
                total_amount: invoice.total_amount.value(),
            })
        })
        .await
    }

    /// Pays an invoice directly by authorizing and confirming a payment for
    /// the amount, so the balance still only moves through a confirmed
    /// payment.
    #[instrument(skip_all, fields(invoice_id = %request.invoice_id))]
    async fn pay_invoice(&self, request: PayInvoiceRequest) -> RpcResult<PayInvoiceResponse> {
        let invoice_id = InvoiceId::parse(&request.invoice_id)?;
        let amount = Amount::new(request.amount)?;
        let body = json!({
            "invoice_id": invoice_id,
            "expected_version": request.expected_version,
            "amount": amount,
        });
        let keyed = Keyed::new("PayInvoice", request.idempotency_key.as_deref(), &body)?;

        self.idempotent(&keyed, async {
            let invoice = self.invoices.get_invoice(&invoice_id).await?;
            invoice.ensure_version(request.expected_version)?;

            let payment = self
                .coordinator
                .authorize_payment(&invoice_id, amount, invoice.currency.clone(), keyed.key.clone())
                .await?;
            match self.coordinator.confirm_payment(&payment.id, payment.version).await {
                Ok(confirmation) => Ok(PayInvoiceResponse {
                    version: confirmation.invoice.version,
                    status: confirmation.invoice.status,
                    amount_paid: confirmation.invoice.amount_paid.value(),
                    payment_id: payment.id,
                }),
                Err(err) if !err.committed() => {
                    if let Err(void_err) = self.coordinator.void_payment(&payment.id, payment.version).await {
                        warn!(payment_id = %payment.id, error = %void_err, "could not void unconfirmed payment");
                    }
                    Err(err)
                }
                Err(err) => Err(err),
            }
        })
        .await
    }

    #[instrument(skip_all, fields(invoice_id = %request.invoice_id))]
    async fn cancel_invoice(&self, request: CancelInvoiceRequest) -> RpcResult<CancelInvoiceResponse> {
        let invoice_id = InvoiceId::parse(&request.invoice_id)?;
        let body = json!({ "invoice_id": invoice_id, "expected_version": request.expected_version });
        let keyed = Keyed::new("CancelInvoice", request.idempotency_key.as_deref(), &body)?;

        self.idempotent(&keyed, async {
            let invoice = self
                .invoices
                .cancel_invoice(&invoice_id, request.expected_version)
                .await?;
            Ok(CancelInvoiceResponse {
                version: invoice.version,
                status: invoice.status,
            })
        })
        .await
    }

    async fn get_invoice(&self, request: GetInvoiceRequest) -> RpcResult<GetInvoiceResponse> {
        let invoice_id = InvoiceId::parse(&request.invoice_id)?;
        Ok(self.invoices.get_invoice(&invoice_id).await?)
    }

    async fn get_payment(&self, request: GetPaymentRequest) -> RpcResult<GetPaymentResponse> {
        let payment_id = PaymentId::parse(&request.payment_id)?;
        Ok(self.coordinator.get_payment(&payment_id).await?)
    }

    async fn list_invoices(&self, request: ListInvoicesRequest) -> RpcResult<ListInvoicesResponse> {
        let invoices = self.invoices.list_invoices(request.status).await?;
        Ok(ListInvoicesResponse { invoices })
    }
}
