mod common;

use async_trait::async_trait;
use common::{authorize_request, create_invoice, item, payment_count, service};
use invoicepay::application::service::PaymentsService;
use invoicepay::config::ServiceConfig;
use invoicepay::domain::invoice::{Invoice, InvoiceId, InvoiceStatus};
use invoicepay::domain::payment::PaymentState;
use invoicepay::domain::ports::InvoiceStore;
use invoicepay::error::Result;
use invoicepay::infrastructure::Ledger;
use invoicepay::infrastructure::in_memory::InMemoryInvoiceStore;
use invoicepay::interfaces::rpc::PaymentsRpc;
use invoicepay::interfaces::rpc::messages::*;
use invoicepay::interfaces::rpc::status::StatusCode;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adjusts_on_same_version() {
    let (service, _) = service();
    let created = create_invoice(&service, &[dec!(100)]).await;

    let mut handles = Vec::new();
    for delta in [dec!(10), dec!(25)] {
        let service = service.clone();
        let request = AdjustInvoiceRequest {
            invoice_id: created.invoice_id.to_string(),
            expected_version: created.version,
            line_item_delta: vec![item("extra", delta)],
            idempotency_key: None,
        };
        handles.push(tokio::spawn(async move { service.adjust_invoice(request).await }));
    }

    let mut successes = 0;
    let mut aborted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(response) => {
                successes += 1;
                assert_eq!(response.version, created.version + 1);
            }
            Err(status) => {
                assert_eq!(status.code, StatusCode::Aborted);
                aborted += 1;
            }
        }
    }
    assert_eq!((successes, aborted), (1, 1));

    let invoice = service
        .get_invoice(GetInvoiceRequest {
            invoice_id: created.invoice_id.to_string(),
        })
        .await
        .unwrap();
    assert_eq!(invoice.version, created.version + 1);
    assert_eq!(invoice.line_items.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_retries_with_same_key() {
    let (service, ledger) = service();
    let created = create_invoice(&service, &[dec!(100)]).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = service.clone();
        let request = authorize_request(&created, dec!(30), "burst");
        handles.push(tokio::spawn(async move { service.authorize_payment(request).await }));
    }

    let mut payment_ids = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(response) => payment_ids.push(response.payment_id),
            // Lost the race while the winner was still running.
            Err(status) => assert_eq!(status.code, StatusCode::Aborted),
        }
    }
    assert!(!payment_ids.is_empty());
    assert!(payment_ids.iter().all(|id| *id == payment_ids[0]));
    assert_eq!(payment_count(&ledger).await, 1);
}

/// Sleeps between reading an invoice and handing it back, so concurrent
/// read-modify-write cycles overlap.
struct SlowInvoiceStore {
    inner: InMemoryInvoiceStore,
}

#[async_trait]
impl InvoiceStore for SlowInvoiceStore {
    async fn get(&self, id: &InvoiceId) -> Result<Option<Invoice>> {
        let invoice = self.inner.get(id).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        invoice
    }

    async fn put_if_version(&self, invoice: Invoice, expected_version: u64) -> Result<()> {
        self.inner.put_if_version(invoice, expected_version).await
    }

    async fn list_by_status(&self, status: InvoiceStatus) -> Result<Vec<Invoice>> {
        self.inner.list_by_status(status).await
    }
}

fn slow_service() -> (PaymentsService, Ledger) {
    let ledger = Ledger {
        invoices: Arc::new(SlowInvoiceStore {
            inner: InMemoryInvoiceStore::new(),
        }),
        ..Ledger::in_memory()
    };
    let config = ServiceConfig {
        confirm_retry_budget: 10,
        ..ServiceConfig::default()
    };
    (PaymentsService::new(ledger.clone(), &config), ledger)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_confirms_never_overpay() {
    let (service, ledger) = slow_service();
    let created = create_invoice(&service, &[dec!(100)]).await;

    let mut authorized = Vec::new();
    for i in 0..4 {
        authorized.push(
            service
                .authorize_payment(authorize_request(&created, dec!(40), &format!("split-{i}")))
                .await
                .unwrap(),
        );
    }

    let mut handles = Vec::new();
    for payment in authorized {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .confirm_payment(ConfirmPaymentRequest {
                    payment_id: payment.payment_id.to_string(),
                    expected_version: payment.version,
                    idempotency_key: None,
                })
                .await
        }));
    }

    let mut winners = HashSet::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(response) => {
                winners.insert(response.payment_id);
            }
            // Rejected before anything was committed: the payment stays authorized.
            Err(status) => assert_eq!(status.code, StatusCode::OutOfRange, "{status:?}"),
        }
    }
    assert_eq!(winners.len(), 2);

    let confirmed: HashSet<_> = ledger
        .payments
        .list_by_state(PaymentState::Confirmed)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    let still_authorized = ledger
        .payments
        .list_by_state(PaymentState::Authorized)
        .await
        .unwrap();
    assert_eq!(confirmed, winners);
    assert_eq!(still_authorized.len(), 2);

    let invoice = service
        .get_invoice(GetInvoiceRequest {
            invoice_id: created.invoice_id.to_string(),
        })
        .await
        .unwrap();
    let applied: HashSet<_> = invoice.applied_payments.iter().copied().collect();
    assert_eq!(applied, confirmed);
    assert_eq!(invoice.amount_paid.value(), dec!(80));
    assert!(invoice.amount_paid <= invoice.total_amount);
}
