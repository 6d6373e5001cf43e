//! Domain model: invoices, payments and idempotency records, plus the
//! storage ports the application layer depends on.

pub mod idempotency;
pub mod invoice;
pub mod money;
pub mod payment;
pub mod ports;
