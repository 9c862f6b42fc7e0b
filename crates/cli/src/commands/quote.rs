//! Refund quotes for support staff.
//!
//! ```bash
//! # Policy arithmetic only, no database
//! dosirak-cli refund-quote amount --delivery-date 2026-10-05 --amount 50000
//!
//! # Whole-order quote for a stored order
//! dosirak-cli refund-quote order ORDER_ID --today 2026-10-03
//! ```

use std::fmt::Write as _;

use chrono::{FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;

use dosirak_core::refund::{days_until, local_date, refund_rate};
use dosirak_core::{CancelScope, Money, Order, OrderId, RefundPlan};
use dosirak_server::db::{OrderStore, PgOrderStore};

use super::{CommandError, database_url};

/// Business timezone from `BUSINESS_UTC_OFFSET` (default `+09:00`).
fn business_offset() -> Result<FixedOffset, CommandError> {
    let raw = std::env::var("BUSINESS_UTC_OFFSET").unwrap_or_else(|_| "+09:00".to_string());
    dosirak_server::config::parse_offset(&raw)
        .map_err(|e| CommandError::Invalid("BUSINESS_UTC_OFFSET", e))
}

fn resolve_today(today: Option<NaiveDate>) -> Result<NaiveDate, CommandError> {
    match today {
        Some(date) => Ok(date),
        None => Ok(local_date(Utc::now(), business_offset()?)),
    }
}

/// Quote a single charge against a delivery date.
///
/// # Errors
///
/// Returns an error for a negative amount or an invalid business offset.
pub fn amount(delivery_date: NaiveDate, amount: Decimal, today: Option<NaiveDate>) -> Result<String, CommandError> {
    if amount.is_sign_negative() {
        return Err(CommandError::Invalid("amount", amount.to_string()));
    }
    Ok(render_amount(delivery_date, Money::new(amount), resolve_today(today)?))
}

/// Quote cancelling every active payment group of a stored order.
///
/// # Errors
///
/// Returns an error if the order cannot be loaded or its ledger is invalid.
pub async fn order(order_id: &str, today: Option<NaiveDate>) -> Result<String, CommandError> {
    let today = resolve_today(today)?;
    let pool = dosirak_server::db::create_pool(&database_url()?).await?;
    let store = PgOrderStore::new(pool);

    let order = store
        .get(&OrderId::new(order_id))
        .await?
        .ok_or_else(|| CommandError::OrderNotFound(order_id.to_string()))?;

    let rate = refund_rate(order.delivery_date, today);
    let plan = order.ledger().plan_refund(&CancelScope::All, rate)?;
    Ok(render_order(&order, &plan, today))
}

fn render_amount(delivery_date: NaiveDate, charge: Money, today: NaiveDate) -> String {
    let rate = refund_rate(delivery_date, today);
    let days = days_until(delivery_date, today);
    let mut out = format!("delivery {delivery_date}, today {today} ({days} days)\n");
    let _ = writeln!(out, "rate     {rate}");
    let _ = writeln!(out, "charge   {charge}");
    let _ = write!(out, "refund   {}", rate.apply(charge));
    if !rate.allows_cancellation() {
        out.push_str("\ncancellation window closed");
    }
    out
}

fn render_order(order: &Order, plan: &RefundPlan, today: NaiveDate) -> String {
    let rate = refund_rate(order.delivery_date, today);
    let mut out = format!(
        "order {} ({}, {}), delivery {}, today {today}\n",
        order.id, order.order_status, order.payment_status, order.delivery_date
    );
    let _ = writeln!(out, "rate     {rate}");
    for refund in &plan.refunds {
        let fee = if refund.includes_delivery_fee { " incl. delivery fee" } else { "" };
        let _ = writeln!(
            out,
            "  {}  {} -> {}{fee}",
            refund.payment_id, refund.target, refund.refund
        );
    }
    let _ = write!(out, "total    {}", plan.total_refund());
    if plan.is_empty() {
        out.push_str("\nnothing left to refund");
    } else if !rate.allows_cancellation() {
        out.push_str("\ncancellation window closed");
    }
    out
}
