//! The payments RPC surface: one method per remote call, exchanging decoded
//! messages. Transports (see [`crate::interfaces::jsonl`]) sit on top.

pub mod messages;
pub mod status;

use async_trait::async_trait;
use messages::*;
use status::RpcStatus;

pub type RpcResult<T> = std::result::Result<T, RpcStatus>;

#[async_trait]
pub trait PaymentsRpc: Send + Sync {
    async fn authorize_payment(&self, request: AuthorizePaymentRequest) -> RpcResult<AuthorizePaymentResponse>;
    async fn confirm_payment(&self, request: ConfirmPaymentRequest) -> RpcResult<ConfirmPaymentResponse>;
    async fn void_payment(&self, request: VoidPaymentRequest) -> RpcResult<VoidPaymentResponse>;
    async fn create_invoice(&self, request: CreateInvoiceRequest) -> RpcResult<CreateInvoiceResponse>;
    async fn adjust_invoice(&self, request: AdjustInvoiceRequest) -> RpcResult<AdjustInvoiceResponse>;
    async fn pay_invoice(&self, request: PayInvoiceRequest) -> RpcResult<PayInvoiceResponse>;
    async fn cancel_invoice(&self, request: CancelInvoiceRequest) -> RpcResult<CancelInvoiceResponse>;
    async fn get_invoice(&self, request: GetInvoiceRequest) -> RpcResult<GetInvoiceResponse>;
    async fn get_payment(&self, request: GetPaymentRequest) -> RpcResult<GetPaymentResponse>;
    async fn list_invoices(&self, request: ListInvoicesRequest) -> RpcResult<ListInvoicesResponse>;
}

/// Boxed RPC handler, shareable across tasks.
pub type PaymentsRpcRef = std::sync::Arc<dyn PaymentsRpc>;
