use crate::error::{PaymentError, Result};
use crate::interfaces::rpc::messages::*;
use serde::Deserialize;
use std::io::BufRead;

/// One decoded RPC invocation, tagged by call name.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "call", content = "request")]
pub enum RpcCall {
    AuthorizePayment(AuthorizePaymentRequest),
    ConfirmPayment(ConfirmPaymentRequest),
    VoidPayment(VoidPaymentRequest),
    CreateInvoice(CreateInvoiceRequest),
    AdjustInvoice(AdjustInvoiceRequest),
    PayInvoice(PayInvoiceRequest),
    CancelInvoice(CancelInvoiceRequest),
    GetInvoice(GetInvoiceRequest),
    GetPayment(GetPaymentRequest),
    ListInvoices(ListInvoicesRequest),
}

impl RpcCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AuthorizePayment(_) => "AuthorizePayment",
            Self::ConfirmPayment(_) => "ConfirmPayment",
            Self::VoidPayment(_) => "VoidPayment",
            Self::CreateInvoice(_) => "CreateInvoice",
            Self::AdjustInvoice(_) => "AdjustInvoice",
            Self::PayInvoice(_) => "PayInvoice",
            Self::CancelInvoice(_) => "CancelInvoice",
            Self::GetInvoice(_) => "GetInvoice",
            Self::GetPayment(_) => "GetPayment",
            Self::ListInvoices(_) => "ListInvoices",
        }
    }

    pub fn decode(line: usize, envelope: serde_json::Value) -> Result<Self> {
        serde_json::from_value(envelope)
            .map_err(|e| PaymentError::ValidationError(format!("line {line}: {e}")))
    }
}

/// Reads call envelopes from a JSON-lines source.
///
/// Blank lines and lines starting with `#` are skipped. Each remaining line
/// must hold one `{"call": ..., "request": {...}}` object; decoding into an
/// [`RpcCall`] happens later, once references to earlier replies are
/// resolved.
pub struct CallReader<R: BufRead> {
    source: R,
}

impl<R: BufRead> CallReader<R> {
    pub fn new(source: R) -> Self {
        Self { source }
    }

    /// Lazily parses envelopes, yielding the 1-based line number with each.
    pub fn envelopes(self) -> impl Iterator<Item = (usize, Result<serde_json::Value>)> {
        self.source
            .lines()
            .enumerate()
            .map(|(index, line)| (index + 1, line))
            .filter(|(_, line)| {
                line.as_ref()
                    .map_or(true, |l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
            })
            .map(|(number, line)| {
                let parsed = line.map_err(PaymentError::from).and_then(|l| {
                    serde_json::from_str(&l)
                        .map_err(|e| PaymentError::ValidationError(format!("line {number}: {e}")))
                });
                (number, parsed)
            })
    }
}
