#![allow(dead_code)]

use invoicepay::application::service::PaymentsService;
use invoicepay::config::ServiceConfig;
use invoicepay::domain::payment::PaymentState;
use invoicepay::infrastructure::Ledger;
use invoicepay::interfaces::rpc::PaymentsRpc;
use invoicepay::interfaces::rpc::messages::*;
use rust_decimal::Decimal;
use std::io::Write;
use tempfile::NamedTempFile;

pub fn service() -> (PaymentsService, Ledger) {
    let ledger = Ledger::in_memory();
    let service = PaymentsService::new(ledger.clone(), &ServiceConfig::default());
    (service, ledger)
}

pub fn item(description: &str, amount: Decimal) -> LineItemInput {
    LineItemInput {
        description: description.to_string(),
        amount,
        currency: "USD".to_string(),
    }
}

pub async fn create_invoice(service: &PaymentsService, amounts: &[Decimal]) -> CreateInvoiceResponse {
    let line_items = amounts
        .iter()
        .enumerate()
        .map(|(i, amount)| item(&format!("item-{i}"), *amount))
        .collect();
    service
        .create_invoice(CreateInvoiceRequest {
            line_items,
            currency: "USD".to_string(),
            idempotency_key: Some(uuid::Uuid::new_v4().to_string()),
        })
        .await
        .expect("invoice creation failed")
}

pub fn authorize_request(invoice: &CreateInvoiceResponse, amount: Decimal, key: &str) -> AuthorizePaymentRequest {
    AuthorizePaymentRequest {
        invoice_id: invoice.invoice_id.to_string(),
        amount,
        currency: "USD".to_string(),
        idempotency_key: key.to_string(),
    }
}

pub async fn payment_count(ledger: &Ledger) -> usize {
    let mut count = 0;
    for state in [PaymentState::Authorized, PaymentState::Confirmed, PaymentState::Voided] {
        count += ledger.payments.list_by_state(state).await.unwrap().len();
    }
    count
}

/// Writes a JSON-lines call script to a temp file.
pub fn script(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file
}
