use chrono::{DateTime, Utc};

use crate::{
    db_types::{Challenge, EmailMessage, Leaderboard, OrderId, PaidSubscription, Ticket, UserIdentifier},
    traits::PaymentGatewayError,
};

/// The collections that paid orders feed into.
#[allow(async_fn_in_trait)]
pub trait FulfilmentManagement {
    async fn fetch_active_subscriptions(
        &self,
        user: &UserIdentifier,
        now: DateTime<Utc>,
    ) -> Result<Vec<PaidSubscription>, PaymentGatewayError>;

    async fn fetch_tickets_for_order(&self, order_id: &OrderId) -> Result<Vec<Ticket>, PaymentGatewayError>;

    async fn fetch_challenge(&self, id: &str) -> Result<Option<Challenge>, PaymentGatewayError>;

    async fn save_challenge(&self, challenge: &Challenge) -> Result<(), PaymentGatewayError>;

    async fn fetch_leaderboard(&self, id: &str) -> Result<Option<Leaderboard>, PaymentGatewayError>;

    async fn save_leaderboard(&self, leaderboard: &Leaderboard) -> Result<(), PaymentGatewayError>;

    /// Emails waiting to be sent, oldest first.
    async fn fetch_queued_emails(&self) -> Result<Vec<EmailMessage>, PaymentGatewayError>;
}
