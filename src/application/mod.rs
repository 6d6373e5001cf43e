//! Application layer containing the business logic orchestration.
//!
//! [`service::PaymentsService`] is the RPC-facing entry point. It delegates
//! invoice transitions to [`invoices::InvoiceLifecycleManager`] and the
//! Authorize -> Confirm protocol to
//! [`authorization::PaymentAuthorizationCoordinator`]. Concurrency is
//! handled with optimistic version checks in the stores rather than locks.

pub mod authorization;
pub mod invoices;
pub mod reconciler;
pub mod service;
