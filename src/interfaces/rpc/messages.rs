//! Decoded request and response messages for the payments RPC surface.

use crate::domain::invoice::{Invoice, InvoiceId, InvoiceStatus};
use crate::domain::payment::{Payment, PaymentId, PaymentState};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemInput {
    pub description: String,
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateInvoiceRequest {
    pub line_items: Vec<LineItemInput>,
    pub currency: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateInvoiceResponse {
    pub invoice_id: InvoiceId,
    pub version: u64,
    pub status: InvoiceStatus,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustInvoiceRequest {
    pub invoice_id: String,
    pub expected_version: u64,
    pub line_item_delta: Vec<LineItemInput>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustInvoiceResponse {
    pub version: u64,
    pub status: InvoiceStatus,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayInvoiceRequest {
    pub invoice_id: String,
    pub expected_version: u64,
    pub amount: Decimal,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayInvoiceResponse {
    pub version: u64,
    pub status: InvoiceStatus,
    pub amount_paid: Decimal,
    /// The payment that carried the funds.
    pub payment_id: PaymentId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelInvoiceRequest {
    pub invoice_id: String,
    pub expected_version: u64,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelInvoiceResponse {
    pub version: u64,
    pub status: InvoiceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizePaymentRequest {
    pub invoice_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizePaymentResponse {
    pub payment_id: PaymentId,
    pub state: PaymentState,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub payment_id: String,
    pub expected_version: u64,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmPaymentResponse {
    pub payment_id: PaymentId,
    pub state: PaymentState,
    pub invoice_id: InvoiceId,
    pub new_invoice_status: InvoiceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoidPaymentRequest {
    pub payment_id: String,
    pub expected_version: u64,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoidPaymentResponse {
    pub payment_id: PaymentId,
    pub state: PaymentState,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetInvoiceRequest {
    pub invoice_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetPaymentRequest {
    pub payment_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListInvoicesRequest {
    pub status: InvoiceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListInvoicesResponse {
    pub invoices: Vec<Invoice>,
}

pub type GetInvoiceResponse = Invoice;
pub type GetPaymentResponse = Payment;
