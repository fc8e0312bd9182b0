//! `SqliteDatabase` is a concrete implementation of a payment engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`traits`] module, as
//! well as [`LockStore`].
use std::{fmt::Debug, time::Duration};

use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqlitePool;

use super::db::{carts, counters, fulfilment, locks, new_pool, orders, products, runtime_config, stock};
use crate::{
    bpe_api::order_objects::{InsertedOrder, NewOrder, OrderQueryFilter, OrderUpdate},
    db_types::{
        Cart,
        CartId,
        Challenge,
        EmailMessage,
        Invoice,
        Leaderboard,
        Order,
        OrderId,
        OrderStatus,
        PaidSubscription,
        PaymentId,
        Product,
        ProductId,
        ProductStock,
        Ticket,
        UserIdentifier,
    },
    lock::{LockError, LockStore},
    orders::{mark_payment_paid, plan_fulfilment, FulfilmentContext, PaidTransition, PaymentReceipt},
    runtime_config::RuntimeConfig,
    stock::{validate_stock_reference, ReservationQuery},
    traits::{
        CartManagement,
        FulfilmentManagement,
        OrderManagement,
        PaymentGatewayDatabase,
        PaymentGatewayError,
        ProductManagement,
        RuntimeConfigStore,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl PaymentGatewayDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn reserve_order_number(&self) -> Result<i64, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let number = counters::next_value(counters::ORDER_NUMBER, &mut conn).await?;
        Ok(number)
    }

    async fn insert_order(&self, new_order: NewOrder) -> Result<InsertedOrder, PaymentGatewayError> {
        let NewOrder { mut order, auto_payment, ctx } = new_order;
        let mut tx = self.pool.begin().await?;
        if order.number <= 0 {
            order.number = counters::next_value(counters::ORDER_NUMBER, &mut tx).await?;
        }
        order.version = 0;
        let paid = match auto_payment {
            Some((payment_id, receipt)) => {
                let number = counters::next_value(counters::INVOICE_NUMBER, &mut tx).await?;
                let invoice = Invoice { number, created_at: receipt.paid_at };
                let transition = mark_payment_paid(&order, &payment_id, receipt, invoice)?;
                order = transition.order.clone();
                Some(transition)
            },
            None => None,
        };
        orders::insert_order(&order, &mut tx).await?;
        if let Some(transition) = paid.as_ref() {
            let plan = plan_fulfilment(&transition.order, &transition.payment, transition.order_paid, &ctx);
            fulfilment::apply_fulfilment(&transition.order, &plan, &ctx, &mut tx).await?;
        }
        if let Some(cart_id) = order.cart_id.as_ref() {
            carts::delete_cart(cart_id, &mut tx).await?;
            trace!("🗃️ Cart {cart_id} converted into order #{}", order.number);
        }
        stock::refresh_many(order.items.iter().map(|i| &i.product.id), ctx.now, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Order #{} ({}) has been saved with status {}", order.number, order.id, order.status);
        Ok(InsertedOrder { order, paid })
    }

    async fn update_order(&self, update: OrderUpdate) -> Result<Order, PaymentGatewayError> {
        let OrderUpdate { expected_version, mut order, emails } = update;
        order.version = expected_version + 1;
        let mut tx = self.pool.begin().await?;
        orders::compare_and_swap(expected_version, &order, &mut tx).await?;
        for email in &emails {
            fulfilment::queue_email(email, &mut tx).await?;
        }
        if order.status != OrderStatus::Pending {
            stock::refresh_many(order.items.iter().map(|i| &i.product.id), order.updated_at, &mut tx).await?;
        }
        tx.commit().await?;
        debug!("🗃️ Order #{} is now {} (version {})", order.number, order.status, order.version);
        Ok(order)
    }

    async fn pay_order_payment(
        &self,
        order: &Order,
        payment_id: &PaymentId,
        receipt: PaymentReceipt,
        ctx: FulfilmentContext,
    ) -> Result<PaidTransition, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        let number = counters::next_value(counters::INVOICE_NUMBER, &mut tx).await?;
        let invoice = Invoice { number, created_at: receipt.paid_at };
        let mut transition = mark_payment_paid(order, payment_id, receipt, invoice)?;
        transition.order.version = order.version + 1;
        orders::compare_and_swap(order.version, &transition.order, &mut tx).await?;
        let plan = plan_fulfilment(&transition.order, &transition.payment, transition.order_paid, &ctx);
        fulfilment::apply_fulfilment(&transition.order, &plan, &ctx, &mut tx).await?;
        if transition.order_paid {
            stock::refresh_many(transition.order.items.iter().map(|i| &i.product.id), ctx.now, &mut tx).await?;
        }
        tx.commit().await?;
        info!(
            "🗃️ Payment {payment_id} of order #{} recorded with invoice #{number}. Order is {}",
            transition.order.number, transition.order.status
        );
        Ok(transition)
    }

    async fn close(&mut self) -> Result<(), PaymentGatewayError> {
        self.pool.close().await;
        Ok(())
    }
}

impl OrderManagement for SqliteDatabase {
    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<Order>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order(order_id, &mut conn).await?;
        Ok(order)
    }

    async fn fetch_order_by_number(&self, number: i64) -> Result<Option<Order>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order_by_number(number, &mut conn).await?;
        Ok(order)
    }

    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let orders = orders::search_orders(query, &mut conn).await?;
        Ok(orders)
    }

    async fn fetch_orders_awaiting_payment(&self) -> Result<Vec<Order>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let orders = orders::fetch_orders_awaiting_payment(&mut conn).await?;
        Ok(orders)
    }
}

impl CartManagement for SqliteDatabase {
    async fn fetch_cart(&self, user: &UserIdentifier) -> Result<Option<Cart>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let cart = carts::fetch_cart_for_user(user, &mut conn).await?;
        Ok(cart)
    }

    async fn save_cart(&self, cart: &Cart, now: DateTime<Utc>) -> Result<Cart, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        let previous = carts::fetch_cart_for_user(&cart.user, &mut tx).await?;
        carts::upsert_cart(cart, &mut tx).await?;
        let touched = previous.iter().flat_map(|c| c.items.iter()).chain(cart.items.iter()).map(|i| &i.product_id);
        stock::refresh_many(touched, now, &mut tx).await?;
        tx.commit().await?;
        trace!("🗃️ Cart {} saved with {} lines", cart.id, cart.items.len());
        Ok(cart.clone())
    }

    async fn delete_cart(&self, cart_id: &CartId, now: DateTime<Utc>) -> Result<(), PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        if let Some(cart) = carts::delete_cart(cart_id, &mut tx).await? {
            stock::refresh_many(cart.items.iter().map(|i| &i.product_id), now, &mut tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

impl ProductManagement for SqliteDatabase {
    async fn fetch_product(&self, product_id: &ProductId) -> Result<Option<Product>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let product = products::fetch_product(product_id, &mut conn).await?;
        Ok(product)
    }

    async fn fetch_products(&self, product_ids: &[ProductId]) -> Result<Vec<Product>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let products = products::fetch_products(product_ids, &mut conn).await?;
        Ok(products)
    }

    async fn save_product(&self, product: &Product) -> Result<Product, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        let reference = match product.stock_reference.as_ref() {
            Some(id) => products::fetch_product(id, &mut tx).await?,
            None => None,
        };
        let referenced = products::is_referenced_by_others(&product.id, &mut tx).await?;
        validate_stock_reference(product, reference.as_ref(), referenced)?;
        products::upsert_product(product, &mut tx).await?;
        stock::refresh_available_stock(&product.id, Utc::now(), &mut tx).await?;
        let saved = products::fetch_product(&product.id, &mut tx)
            .await?
            .ok_or_else(|| PaymentGatewayError::ProductNotFound(product.id.clone()))?;
        tx.commit().await?;
        debug!("🗃️ Product {} saved", saved.id);
        Ok(saved)
    }

    async fn amount_of_stock_reserved(
        &self,
        product_id: &ProductId,
        query: &ReservationQuery,
        now: DateTime<Utc>,
    ) -> Result<i64, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        stock::amount_reserved(product_id, query, now, &mut conn).await
    }

    async fn refresh_available_stock(
        &self,
        product_id: &ProductId,
        now: DateTime<Utc>,
    ) -> Result<Option<ProductStock>, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        let stock = stock::refresh_available_stock(product_id, now, &mut tx).await?;
        tx.commit().await?;
        Ok(stock)
    }

    async fn products_with_expired_reservations(
        &self,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ProductId>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let carts = carts::fetch_all_carts(&mut conn).await?;
        let mut ids = carts
            .iter()
            .flat_map(|c| c.items.iter())
            .filter(|i| i.reserved_until.map_or(false, |t| t >= since && t < now))
            .map(|i| i.product_id.clone())
            .collect::<Vec<_>>();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

impl FulfilmentManagement for SqliteDatabase {
    async fn fetch_active_subscriptions(
        &self,
        user: &UserIdentifier,
        now: DateTime<Utc>,
    ) -> Result<Vec<PaidSubscription>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let subs = fulfilment::fetch_active_subscriptions(user, now, &mut conn).await?;
        Ok(subs)
    }

    async fn fetch_tickets_for_order(&self, order_id: &OrderId) -> Result<Vec<Ticket>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let tickets = fulfilment::fetch_tickets_for_order(order_id, &mut conn).await?;
        Ok(tickets)
    }

    async fn fetch_challenge(&self, id: &str) -> Result<Option<Challenge>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let challenge = fulfilment::fetch_challenge(id, &mut conn).await?;
        Ok(challenge)
    }

    async fn save_challenge(&self, challenge: &Challenge) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        fulfilment::upsert_challenge(challenge, &mut conn).await?;
        Ok(())
    }

    async fn fetch_leaderboard(&self, id: &str) -> Result<Option<Leaderboard>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let leaderboard = fulfilment::fetch_leaderboard(id, &mut conn).await?;
        Ok(leaderboard)
    }

    async fn save_leaderboard(&self, leaderboard: &Leaderboard) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        fulfilment::upsert_leaderboard(leaderboard, &mut conn).await?;
        Ok(())
    }

    async fn fetch_queued_emails(&self) -> Result<Vec<EmailMessage>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let emails = fulfilment::fetch_queued_emails(&mut conn).await?;
        Ok(emails)
    }
}

impl RuntimeConfigStore for SqliteDatabase {
    async fn fetch_runtime_config(&self) -> Result<RuntimeConfig, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let config = runtime_config::fetch_runtime_config(&mut conn).await?.unwrap_or_else(|| {
            debug!("🪛️ No runtime configuration has been saved. Using the defaults.");
            RuntimeConfig::default()
        });
        Ok(config)
    }

    async fn save_runtime_config(&self, config: &RuntimeConfig) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        runtime_config::save_runtime_config(config, &mut conn).await?;
        info!("🪛️ Runtime configuration saved");
        Ok(())
    }
}

impl LockStore for SqliteDatabase {
    async fn try_claim(&self, name: &str, owner: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut conn = self.pool.acquire().await?;
        let claimed = locks::try_claim(name, owner, ttl, &mut conn).await?;
        Ok(claimed)
    }

    async fn release(&self, name: &str, owner: &str) -> Result<(), LockError> {
        let mut conn = self.pool.acquire().await?;
        locks::release(name, owner, &mut conn).await?;
        Ok(())
    }
}

impl SqliteDatabase {
    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Brings the schema up to date with the embedded migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./src/sqlite/migrations").run(&self.pool).await?;
        info!("🗃️ Migrations complete");
        Ok(())
    }

    /// The instance currently holding the named lock, if any.
    pub async fn lock_holder(&self, name: &str) -> Result<Option<String>, LockError> {
        let mut conn = self.pool.acquire().await?;
        Ok(locks::holder(name, &mut conn).await?)
    }

    /// The last value handed out by the named counter.
    pub async fn counter_value(&self, name: &str) -> Result<i64, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        Ok(counters::current_value(name, &mut conn).await?)
    }
}
