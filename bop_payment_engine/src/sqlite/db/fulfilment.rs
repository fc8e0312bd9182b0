use chrono::{DateTime, Utc};
use log::{debug, info};
use sqlx::{types::Json, SqliteConnection};

use super::{counters, stock};
use crate::{
    db_types::{Challenge, EmailMessage, Leaderboard, Order, OrderId, PaidSubscription, ProductId, Ticket, UserIdentifier},
    orders::{apply_to_challenge, apply_to_leaderboard, extend_subscription, FulfilmentContext, FulfilmentPlan},
    traits::PaymentGatewayError,
};

//--------------------------------------    Subscriptions    ---------------------------------------------------------

fn subscriber_key(user: &UserIdentifier) -> Option<String> {
    user.cart_key()
}

pub async fn fetch_subscription(
    user_key: &str,
    product_id: &ProductId,
    conn: &mut SqliteConnection,
) -> Result<Option<PaidSubscription>, sqlx::Error> {
    let sub: Option<Json<PaidSubscription>> =
        sqlx::query_scalar("SELECT doc FROM paid_subscriptions WHERE user_key = $1 AND product_id = $2")
            .bind(user_key)
            .bind(product_id.as_str())
            .fetch_optional(conn)
            .await?;
    Ok(sub.map(|s| s.0))
}

pub async fn upsert_subscription(
    user_key: &str,
    sub: &PaidSubscription,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
            INSERT INTO paid_subscriptions (id, user_key, product_id, doc) VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_key, product_id) DO UPDATE SET doc = excluded.doc;
        "#,
    )
    .bind(sub.id.as_str())
    .bind(user_key)
    .bind(sub.product_id.as_str())
    .bind(Json(sub))
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn fetch_active_subscriptions(
    user: &UserIdentifier,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<PaidSubscription>, sqlx::Error> {
    let Some(key) = subscriber_key(user) else {
        return Ok(vec![]);
    };
    let subs: Vec<Json<PaidSubscription>> =
        sqlx::query_scalar("SELECT doc FROM paid_subscriptions WHERE user_key = $1").bind(key).fetch_all(conn).await?;
    Ok(subs.into_iter().map(|s| s.0).filter(|s| s.is_active_at(now)).collect())
}

//--------------------------------------       Tickets       ---------------------------------------------------------

pub async fn insert_ticket(ticket: &Ticket, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO tickets (ticket_id, order_id, product_id, doc) VALUES ($1, $2, $3, $4)")
        .bind(ticket.ticket_id.as_str())
        .bind(ticket.order_id.as_str())
        .bind(ticket.product_id.as_str())
        .bind(Json(ticket))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn fetch_tickets_for_order(order_id: &OrderId, conn: &mut SqliteConnection) -> Result<Vec<Ticket>, sqlx::Error> {
    let tickets: Vec<Json<Ticket>> = sqlx::query_scalar("SELECT doc FROM tickets WHERE order_id = $1 ORDER BY rowid")
        .bind(order_id.as_str())
        .fetch_all(conn)
        .await?;
    Ok(tickets.into_iter().map(|t| t.0).collect())
}

//--------------------------------------     Challenges      ---------------------------------------------------------

pub async fn fetch_challenge(id: &str, conn: &mut SqliteConnection) -> Result<Option<Challenge>, sqlx::Error> {
    let c: Option<Json<Challenge>> =
        sqlx::query_scalar("SELECT doc FROM challenges WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(c.map(|c| c.0))
}

pub async fn fetch_challenges(conn: &mut SqliteConnection) -> Result<Vec<Challenge>, sqlx::Error> {
    let c: Vec<Json<Challenge>> = sqlx::query_scalar("SELECT doc FROM challenges").fetch_all(conn).await?;
    Ok(c.into_iter().map(|c| c.0).collect())
}

pub async fn upsert_challenge(challenge: &Challenge, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO challenges (id, doc) VALUES ($1, $2) ON CONFLICT (id) DO UPDATE SET doc = excluded.doc")
        .bind(challenge.id.as_str())
        .bind(Json(challenge))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn fetch_leaderboard(id: &str, conn: &mut SqliteConnection) -> Result<Option<Leaderboard>, sqlx::Error> {
    let l: Option<Json<Leaderboard>> =
        sqlx::query_scalar("SELECT doc FROM leaderboards WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(l.map(|l| l.0))
}

pub async fn fetch_leaderboards(conn: &mut SqliteConnection) -> Result<Vec<Leaderboard>, sqlx::Error> {
    let l: Vec<Json<Leaderboard>> = sqlx::query_scalar("SELECT doc FROM leaderboards").fetch_all(conn).await?;
    Ok(l.into_iter().map(|l| l.0).collect())
}

pub async fn upsert_leaderboard(leaderboard: &Leaderboard, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO leaderboards (id, doc) VALUES ($1, $2) ON CONFLICT (id) DO UPDATE SET doc = excluded.doc")
        .bind(leaderboard.id.as_str())
        .bind(Json(leaderboard))
        .execute(conn)
        .await?;
    Ok(())
}

//--------------------------------------     Email queue     ---------------------------------------------------------

pub async fn queue_email(email: &EmailMessage, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO email_queue (doc) VALUES ($1)").bind(Json(email)).execute(conn).await?;
    debug!("📬️ Email '{}' queued for {}", email.template, email.to);
    Ok(())
}

pub async fn fetch_queued_emails(conn: &mut SqliteConnection) -> Result<Vec<EmailMessage>, sqlx::Error> {
    let emails: Vec<Json<EmailMessage>> =
        sqlx::query_scalar("SELECT doc FROM email_queue ORDER BY id ASC").fetch_all(conn).await?;
    Ok(emails.into_iter().map(|e| e.0).collect())
}

//--------------------------------------  Applying a plan    ---------------------------------------------------------

/// Applies the side effects of a payment on `order`. Must run in the same transaction as the payment write.
pub async fn apply_fulfilment(
    order: &Order,
    plan: &FulfilmentPlan,
    ctx: &FulfilmentContext,
    conn: &mut SqliteConnection,
) -> Result<(), PaymentGatewayError> {
    if !plan.subscriptions.is_empty() {
        let key = subscriber_key(&order.user).unwrap_or_else(|| format!("order:{}", order.id));
        for grant in &plan.subscriptions {
            let existing = fetch_subscription(&key, &grant.product_id, conn).await?;
            let number = match existing {
                Some(ref sub) => sub.number,
                None => counters::next_value(counters::SUBSCRIPTION_NUMBER, conn).await?,
            };
            let sub = extend_subscription(existing.as_ref(), grant, &order.user, number, ctx.now);
            upsert_subscription(&key, &sub, conn).await?;
            info!("🧾️ Subscription #{} to {} is paid until {}", sub.number, sub.product_id, sub.paid_until);
        }
    }
    for ticket in &plan.tickets {
        insert_ticket(ticket, conn).await?;
    }
    if !plan.tickets.is_empty() {
        debug!("🧾️ {} tickets minted for order {}", plan.tickets.len(), order.id);
    }
    if !plan.contributions.is_empty() {
        for challenge in fetch_challenges(conn).await? {
            if let Some(updated) = apply_to_challenge(&challenge, &plan.contributions, ctx.now) {
                upsert_challenge(&updated, conn).await?;
                if let Some(owner) = ctx.owner_email.as_ref() {
                    let email = EmailMessage::new(owner.as_str(), "challenge.progress")
                        .with_var("challenge", updated.name.as_str())
                        .with_var("progress", updated.progress)
                        .with_var("goal", updated.goal);
                    queue_email(&email, conn).await?;
                }
            }
        }
        for leaderboard in fetch_leaderboards(conn).await? {
            if let Some(updated) = apply_to_leaderboard(&leaderboard, &plan.contributions, ctx.now) {
                upsert_leaderboard(&updated, conn).await?;
            }
        }
    }
    for (owner, sold) in &plan.stock_sold {
        stock::decrement_stock(owner, *sold, conn).await?;
    }
    for email in &plan.emails {
        queue_email(email, conn).await?;
    }
    Ok(())
}
