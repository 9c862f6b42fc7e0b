//! Dosirak Core - order lifecycle and split-payment cancellation engine.
//!
//! This crate holds the pure half of the order back-end:
//! - [`refund`] - refund rate by days until delivery
//! - [`ledger`] - queries over an order's payment groups
//! - [`lifecycle`] - the order state machine
//! - [`projection`] - buyer, seller and admin views
//!
//! # Architecture
//!
//! No I/O lives here: no database access, no HTTP clients, no clock. The
//! `dosirak-server` crate loads orders, calls the payment gateway, and
//! persists what these functions return. The optional `postgres` feature
//! only adds `sqlx` encoding for ids and enums.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod order;
pub mod projection;
pub mod refund;
pub mod types;

pub use error::OrderError;
pub use ledger::{CancelScope, Ledger, LedgerSummary, PlannedRefund, RefundPlan};
pub use order::{
    AdditionalOrder, CartLine, ChargeOutcome, Checkout, DeliveryDetails, Discount, Order,
    OrderItem, PaymentGroup, PaymentReceipt, TrackingInfo,
};
pub use refund::RefundRate;
pub use types::*;
