use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::OrderError;
use crate::{
    currency::{CurrencyRole, CurrencySnapshot, Price},
    db_types::{Invoice, Order, OrderPayment, OrderStatus, PaymentId, PaymentStatus, PaymentTransaction},
};

/// What a processor reported for a successful payment, already captured in the payment's currency roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub received: Price,
    pub received_snapshot: CurrencySnapshot,
    pub fees: Option<Price>,
    pub fees_snapshot: Option<CurrencySnapshot>,
    pub transactions: Vec<PaymentTransaction>,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaidTransition {
    pub order: Order,
    pub payment: OrderPayment,
    /// True if this payment completed the order.
    pub order_paid: bool,
}

/// Returns the order's own copy of the payment, failing if the payment is not part of the order.
pub fn ensure_payment_belongs<'a>(order: &'a Order, payment_id: &PaymentId) -> Result<&'a OrderPayment, OrderError> {
    order.payment(payment_id).ok_or_else(|| {
        OrderError::InvariantViolation(format!("Payment {payment_id} is not a payment of order {}", order.id))
    })
}

fn ensure_pending(order: &Order) -> Result<(), OrderError> {
    if order.status == OrderStatus::Pending {
        Ok(())
    } else {
        Err(OrderError::OrderNotPending { order: order.id.clone(), status: order.status })
    }
}

fn main_total(order: &Order) -> Result<Price, OrderError> {
    order
        .currency_snapshot
        .total_price
        .main()
        .copied()
        .ok_or_else(|| OrderError::MissingCurrencyView { order: order.id.clone(), role: CurrencyRole::Main })
}

/// The sum of payment amounts in `role`, counting paid payments and optionally pending ones.
pub fn amount_paid(order: &Order, role: CurrencyRole, include_pending: bool) -> Decimal {
    order
        .payments
        .iter()
        .filter(|p| p.status == PaymentStatus::Paid || (include_pending && p.status == PaymentStatus::Pending))
        .filter_map(|p| p.currency_snapshot.price.get(role))
        .map(|p| p.amount)
        .sum()
}

/// What is left to pay, in the order's main currency, once paid and pending payments are accounted for.
pub fn amount_owed(order: &Order) -> Result<Price, OrderError> {
    let total = main_total(order)?;
    let covered = amount_paid(order, CurrencyRole::Main, true);
    Ok(Price::new((total.amount - covered).max(Decimal::ZERO), total.currency))
}

/// An order is fully paid once its payments cover the total, less one display unit of the main currency to absorb
/// conversion rounding. An order with a positive total and no qualifying payment is never fully paid.
pub fn is_order_fully_paid(order: &Order, include_pending: bool) -> bool {
    let Some(total) = order.currency_snapshot.total_price.main() else {
        return false;
    };
    let qualifying = order
        .payments
        .iter()
        .filter(|p| p.status == PaymentStatus::Paid || (include_pending && p.status == PaymentStatus::Pending))
        .count();
    if qualifying == 0 {
        return total.amount <= Decimal::ZERO;
    }
    let paid = amount_paid(order, CurrencyRole::Main, include_pending);
    paid >= total.amount - total.currency.unit()
}

/// Appends a new payment to a pending order.
pub fn add_payment(order: &Order, payment: OrderPayment, now: DateTime<Utc>) -> Result<Order, OrderError> {
    ensure_pending(order)?;
    if order.payment(&payment.id).is_some() {
        return Err(OrderError::InvariantViolation(format!(
            "Payment {} is already part of order {}",
            payment.id, order.id
        )));
    }
    let mut result = order.clone();
    result.payments.push(payment);
    result.updated_at = now;
    Ok(result)
}

/// Marks a pending payment as paid and, if this covers the order, marks the order as paid.
///
/// For each currency role of the payment, records what had been paid before, what remains after this payment, and
/// what was actually received.
pub fn mark_payment_paid(
    order: &Order,
    payment_id: &PaymentId,
    receipt: PaymentReceipt,
    invoice: Invoice,
) -> Result<PaidTransition, OrderError> {
    let current = ensure_payment_belongs(order, payment_id)?;
    if current.status != PaymentStatus::Pending {
        return Err(OrderError::PaymentNotPending { payment: payment_id.clone(), status: current.status });
    }
    if !matches!(order.status, OrderStatus::Pending | OrderStatus::Paid) {
        return Err(OrderError::OrderNotPending { order: order.id.clone(), status: order.status });
    }
    let roles = current.currency_snapshot.price.roles();
    let previously_paid = CurrencySnapshot::from_views(roles.iter().map(|(role, currency)| {
        let paid = order
            .payments
            .iter()
            .filter(|p| &p.id != payment_id && p.status == PaymentStatus::Paid)
            .filter_map(|p| p.currency_snapshot.price.get(*role))
            .map(|p| p.amount)
            .sum::<Decimal>();
        (*role, Price::new(paid, *currency))
    }));
    let remaining_to_pay = CurrencySnapshot::from_views(roles.iter().map(|(role, currency)| {
        let total = order.currency_snapshot.total_price.get(*role).map(|p| p.amount).unwrap_or_default();
        let before = previously_paid.get(*role).map(|p| p.amount).unwrap_or_default();
        let this = current.currency_snapshot.price.get(*role).map(|p| p.amount).unwrap_or_default();
        (*role, Price::new((total - before - this).max(Decimal::ZERO), *currency))
    }));

    let mut payment = current.clone();
    payment.status = PaymentStatus::Paid;
    payment.paid_at = Some(receipt.paid_at);
    payment.invoice = Some(invoice);
    payment.received = Some(receipt.received);
    payment.fees = receipt.fees;
    payment.transactions.extend(receipt.transactions);
    payment.currency_snapshot.previously_paid = Some(previously_paid);
    payment.currency_snapshot.remaining_to_pay = Some(remaining_to_pay);
    payment.currency_snapshot.received = Some(receipt.received_snapshot);
    payment.currency_snapshot.fees = receipt.fees_snapshot;

    let mut result = order.clone();
    for p in result.payments.iter_mut() {
        if &p.id == payment_id {
            *p = payment.clone();
        }
    }
    result.updated_at = receipt.paid_at;
    let order_paid = result.status == OrderStatus::Pending && is_order_fully_paid(&result, false);
    if order_paid {
        result.status = OrderStatus::Paid;
    }
    Ok(PaidTransition { order: result, payment, order_paid })
}

/// Moves a pending payment to a terminal failure status.
///
/// When every payment of the order has failed, the order takes the same fate, unless the order is flagged to stay
/// pending so that a new payment can be attempted.
pub fn mark_payment_failed(
    order: &Order,
    payment_id: &PaymentId,
    status: PaymentStatus,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<Order, OrderError> {
    if !status.is_unsuccessful() {
        return Err(OrderError::InvalidFailureStatus(status));
    }
    let current = ensure_payment_belongs(order, payment_id)?;
    if current.status != PaymentStatus::Pending {
        return Err(OrderError::PaymentNotPending { payment: payment_id.clone(), status: current.status });
    }
    let mut result = order.clone();
    for p in result.payments.iter_mut() {
        if &p.id == payment_id {
            p.status = status;
            p.failure_reason = reason.clone();
        }
    }
    result.updated_at = now;
    let all_failed = result.payments.iter().all(|p| p.status.is_unsuccessful());
    if result.status == OrderStatus::Pending && all_failed && !result.keep_pending_on_payment_failure {
        result.status = OrderStatus::from_payment_failure(status);
    }
    Ok(result)
}

/// Cancels a pending order and all of its pending payments.
pub fn cancel_order(order: &Order, now: DateTime<Utc>) -> Result<Order, OrderError> {
    ensure_pending(order)?;
    let mut result = order.clone();
    for p in result.payments.iter_mut().filter(|p| p.status == PaymentStatus::Pending) {
        p.status = PaymentStatus::Canceled;
    }
    result.status = OrderStatus::Canceled;
    result.updated_at = now;
    Ok(result)
}
