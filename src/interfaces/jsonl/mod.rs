//! JSON-lines transport: decodes call envelopes, invokes the RPC surface and
//! encodes each outcome as a reply line.

pub mod call_reader;
pub mod reply_writer;
pub mod session;

use crate::error::PaymentError;
use crate::interfaces::rpc::status::RpcStatus;
use crate::interfaces::rpc::{PaymentsRpc, RpcResult};
use call_reader::{CallReader, RpcCall};
use reply_writer::{Reply, ReplyWriter};
use serde::Serialize;
use session::Session;
use std::io::{self, BufRead, Write};

/// Executes every call from `reader` in order, writing one reply per call.
/// Returns the number of calls that failed.
pub async fn run<R: BufRead, W: Write>(
    rpc: &dyn PaymentsRpc,
    reader: CallReader<R>,
    writer: &mut ReplyWriter<W>,
) -> io::Result<usize> {
    let mut session = Session::new();
    let mut failures = 0;

    for (line, envelope) in reader.envelopes() {
        let call = envelope
            .and_then(|raw| session.resolve(line, raw))
            .and_then(|raw| RpcCall::decode(line, raw));
        let reply = match call {
            Ok(call) => dispatch(rpc, line, call).await,
            Err(e) => {
                tracing::warn!(line, error = %e, "rejected input line");
                rejected(line, e)
            }
        };
        if reply.error.is_some() {
            failures += 1;
        }
        session.record(&reply);
        writer.write_reply(&reply)?;
    }

    writer.flush()?;
    Ok(failures)
}

/// Invokes one decoded call and packages its outcome.
pub async fn dispatch(rpc: &dyn PaymentsRpc, line: usize, call: RpcCall) -> Reply {
    let name = call.name();
    let outcome = match call {
        RpcCall::AuthorizePayment(request) => encode(rpc.authorize_payment(request).await),
        RpcCall::ConfirmPayment(request) => encode(rpc.confirm_payment(request).await),
        RpcCall::VoidPayment(request) => encode(rpc.void_payment(request).await),
        RpcCall::CreateInvoice(request) => encode(rpc.create_invoice(request).await),
        RpcCall::AdjustInvoice(request) => encode(rpc.adjust_invoice(request).await),
        RpcCall::PayInvoice(request) => encode(rpc.pay_invoice(request).await),
        RpcCall::CancelInvoice(request) => encode(rpc.cancel_invoice(request).await),
        RpcCall::GetInvoice(request) => encode(rpc.get_invoice(request).await),
        RpcCall::GetPayment(request) => encode(rpc.get_payment(request).await),
        RpcCall::ListInvoices(request) => encode(rpc.list_invoices(request).await),
    };

    let (ok, error) = match outcome {
        Ok(value) => (Some(value), None),
        Err(status) => (None, Some(status)),
    };
    Reply {
        line,
        call: Some(name),
        ok,
        error,
    }
}

/// A reply for a line that never decoded into a call.
pub fn rejected(line: usize, err: PaymentError) -> Reply {
    Reply {
        line,
        call: None,
        ok: None,
        error: Some(err.into()),
    }
}

fn encode<T: Serialize>(result: RpcResult<T>) -> RpcResult<serde_json::Value> {
    result.and_then(|response| {
        serde_json::to_value(response).map_err(|e| RpcStatus::from(PaymentError::from(e)))
    })
}
