//! Pure order state transitions.
//!
//! Nothing in this module touches storage. Each transition takes the order as read and returns the new order; the
//! caller persists it with a version check so that a concurrent write makes the transition a no-op rather than a lost
//! update.
mod fulfilment;
mod transitions;

pub use fulfilment::{
    apply_to_challenge,
    apply_to_leaderboard,
    extend_subscription,
    plan_fulfilment,
    FulfilmentContext,
    FulfilmentPlan,
    SaleContribution,
    SubscriptionGrant,
};
use thiserror::Error;
pub use transitions::{
    add_payment,
    amount_owed,
    amount_paid,
    cancel_order,
    ensure_payment_belongs,
    is_order_fully_paid,
    mark_payment_failed,
    mark_payment_paid,
    PaidTransition,
    PaymentReceipt,
};

use crate::{
    currency::CurrencyRole,
    db_types::{OrderId, OrderStatus, PaymentId, PaymentStatus},
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrderError {
    /// The caller's view of the order is inconsistent. This is a programming error, never a user error.
    #[error("Order invariant violated: {0}")]
    InvariantViolation(String),
    #[error("Order {order} is {status}, not pending")]
    OrderNotPending { order: OrderId, status: OrderStatus },
    #[error("Payment {payment} is {status}, not pending")]
    PaymentNotPending { payment: PaymentId, status: PaymentStatus },
    #[error("Order {0} is already fully covered by its payments")]
    OrderAlreadyCovered(OrderId),
    #[error("{0} is not a failure status")]
    InvalidFailureStatus(PaymentStatus),
    #[error("Order {order} has no {role} currency view")]
    MissingCurrencyView { order: OrderId, role: CurrencyRole },
}

impl OrderError {
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, OrderError::InvariantViolation(_))
    }
}
