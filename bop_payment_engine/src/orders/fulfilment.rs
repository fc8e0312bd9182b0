use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::{
    currency::CurrencyRole,
    db_types::{
        Challenge,
        ChallengeMode,
        EmailMessage,
        Leaderboard,
        LeaderboardEntry,
        Order,
        OrderPayment,
        PaidSubscription,
        ProductId,
        Ticket,
        UserIdentifier,
    },
};

#[derive(Debug, Clone, Default)]
pub struct FulfilmentContext {
    pub owner_email: Option<String>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionGrant {
    pub product_id: ProductId,
    pub days: i64,
}

/// The contribution of one order line to challenges and leaderboards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleContribution {
    pub product_id: ProductId,
    pub quantity: Decimal,
    /// The line's price with VAT, in the order's main currency.
    pub amount: Decimal,
}

/// Everything that must happen once an order is paid, or a payment is received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FulfilmentPlan {
    pub subscriptions: Vec<SubscriptionGrant>,
    pub tickets: Vec<Ticket>,
    /// Units sold per stock-owning product.
    pub stock_sold: BTreeMap<ProductId, i64>,
    pub contributions: Vec<SaleContribution>,
    pub emails: Vec<EmailMessage>,
}

impl FulfilmentPlan {
    pub fn is_empty(&self) -> bool {
        self == &FulfilmentPlan::default()
    }
}

/// Works out the side effects of `payment` being received on `order`.
///
/// Customer emails are sent for every payment. The remaining effects only apply when the payment completed the order.
pub fn plan_fulfilment(order: &Order, payment: &OrderPayment, order_paid: bool, ctx: &FulfilmentContext) -> FulfilmentPlan {
    let mut plan = FulfilmentPlan::default();
    if let Some(email) = order.notifications.email.as_ref() {
        let received = payment.received.unwrap_or(payment.price);
        plan.emails.push(
            EmailMessage::new(email.as_str(), "order.payment.paid")
                .with_var("orderNumber", order.number)
                .with_var("amount", received),
        );
        if order_paid {
            plan.emails.push(EmailMessage::new(email.as_str(), "order.paid").with_var("orderNumber", order.number));
        }
    }
    if !order_paid {
        return plan;
    }
    for item in &order.items {
        let product = &item.product;
        if let Some(subscription) = product.subscription.as_ref() {
            plan.subscriptions.push(SubscriptionGrant {
                product_id: product.id.clone(),
                days: i64::from(subscription.duration_days) * i64::from(item.quantity),
            });
        }
        if product.ticket {
            for _ in 0..item.quantity {
                plan.tickets.push(Ticket {
                    ticket_id: uuid::Uuid::new_v4().to_string(),
                    order_id: order.id.clone(),
                    product_id: product.id.clone(),
                    created_at: ctx.now,
                });
            }
        }
        if product.stock.is_some() || product.stock_reference.is_some() {
            *plan.stock_sold.entry(product.stock_owner().clone()).or_default() += i64::from(item.quantity);
        }
        let price = item.currency_snapshot.price.get(CurrencyRole::Main).map(|p| p.amount).unwrap_or_default();
        let vat = item.currency_snapshot.vat.get(CurrencyRole::Main).map(|p| p.amount).unwrap_or_default();
        plan.contributions.push(SaleContribution {
            product_id: product.id.clone(),
            quantity: Decimal::from(item.quantity),
            amount: price + vat,
        });
    }
    plan
}

/// Extends (or starts) a subscription by `grant.days`. Time left on an active subscription is kept.
pub fn extend_subscription(
    existing: Option<&PaidSubscription>,
    grant: &SubscriptionGrant,
    user: &UserIdentifier,
    number: i64,
    now: DateTime<Utc>,
) -> PaidSubscription {
    let days = Duration::days(grant.days);
    match existing {
        Some(sub) => {
            let mut sub = sub.clone();
            sub.paid_until = sub.paid_until.max(now) + days;
            sub.updated_at = now;
            sub
        },
        None => PaidSubscription {
            id: uuid::Uuid::new_v4().to_string(),
            number,
            user: user.clone(),
            product_id: grant.product_id.clone(),
            paid_until: now + days,
            created_at: now,
            updated_at: now,
        },
    }
}

fn contribution_value(mode: ChallengeMode, c: &SaleContribution) -> Decimal {
    match mode {
        ChallengeMode::TotalProducts => c.quantity,
        ChallengeMode::MoneyAmount => c.amount,
    }
}

/// Adds the matching contributions to a running challenge. Returns `None` if the challenge is unaffected.
pub fn apply_to_challenge(
    challenge: &Challenge,
    contributions: &[SaleContribution],
    now: DateTime<Utc>,
) -> Option<Challenge> {
    if now < challenge.begins_at || now >= challenge.ends_at {
        return None;
    }
    let added = contributions
        .iter()
        .filter(|c| challenge.product_ids.contains(&c.product_id))
        .map(|c| contribution_value(challenge.mode, c))
        .sum::<Decimal>();
    if added.is_zero() {
        return None;
    }
    let mut result = challenge.clone();
    result.progress += added;
    Some(result)
}

/// Adds the matching contributions to a running leaderboard, per product. Returns `None` if it is unaffected.
pub fn apply_to_leaderboard(
    leaderboard: &Leaderboard,
    contributions: &[SaleContribution],
    now: DateTime<Utc>,
) -> Option<Leaderboard> {
    if now < leaderboard.begins_at || now >= leaderboard.ends_at {
        return None;
    }
    let mut result = leaderboard.clone();
    let mut changed = false;
    for c in contributions.iter().filter(|c| leaderboard.product_ids.contains(&c.product_id)) {
        let value = contribution_value(leaderboard.mode, c);
        match result.progress.iter_mut().find(|e| e.product_id == c.product_id) {
            Some(entry) => entry.amount += value,
            None => result.progress.push(LeaderboardEntry { product_id: c.product_id.clone(), amount: value }),
        }
        changed = true;
    }
    if changed {
        result.progress.sort_by(|a, b| b.amount.cmp(&a.amount));
        Some(result)
    } else {
        None
    }
}
