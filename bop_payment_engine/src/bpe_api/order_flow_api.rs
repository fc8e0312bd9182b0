use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use log::*;
use rust_decimal::Decimal;

use crate::{
    bpe_api::{
        order_objects::{AddPaymentOptions, CreateOrderParams, NewOrder, OrderUpdate},
        stock_api::ensure_stock_available,
    },
    currency::{fix_currency_rounding, CurrencyConverter, CurrencyRole, CurrencySnapshot, Price},
    db_types::{
        CartId,
        CartItem,
        EmailMessage,
        Order,
        OrderCurrencySnapshot,
        OrderId,
        OrderItem,
        OrderItemCurrencySnapshot,
        OrderNotifications,
        OrderPayment,
        OrderStatus,
        PaymentCurrencySnapshot,
        PaymentHandle,
        PaymentId,
        PaymentMethod,
        PaymentStatus,
        PaymentTransaction,
        Product,
        ProductId,
        UserIdentifier,
    },
    events::{EventProducers, OrderAnnulledEvent, OrderPaidEvent, PaymentFailedEvent, PaymentReceivedEvent},
    helpers::Clock,
    orders::{
        add_payment,
        amount_owed,
        cancel_order,
        ensure_payment_belongs,
        is_order_fully_paid,
        mark_payment_failed,
        FulfilmentContext,
        OrderError,
        PaidTransition,
        PaymentReceipt,
    },
    pricing::{compute_price_info, PricingItem, PricingParams},
    processors::{PayableRequest, PaymentProcessors},
    runtime_config::RuntimeConfig,
    traits::{PaymentGatewayDatabase, PaymentGatewayError},
};

/// What a processor (or an operator) reports about money received for a payment.
#[derive(Debug, Clone)]
pub struct ReceivedPayment {
    pub amount: Price,
    pub fees: Option<Price>,
    pub transactions: Vec<PaymentTransaction>,
    pub paid_at: DateTime<Utc>,
}

impl ReceivedPayment {
    pub fn new(amount: Price, paid_at: DateTime<Utc>) -> Self {
        Self { amount, fees: None, transactions: vec![], paid_at }
    }

    pub fn with_fees(mut self, fees: Option<Price>) -> Self {
        self.fees = fees;
        self
    }

    pub fn with_transaction(mut self, transaction: PaymentTransaction) -> Self {
        self.transactions.push(transaction);
        self
    }
}

/// `OrderFlowApi` is the primary API for the order and payment flows: checkout, payment attempts, payments received
/// or failed, manual confirmation and cancellation.
///
/// Every write goes through the backend as a single transaction. Events are published after the transaction commits.
pub struct OrderFlowApi<B, P> {
    db: B,
    processors: Arc<P>,
    producers: EventProducers,
    clock: Clock,
}

impl<B: Clone, P> Clone for OrderFlowApi<B, P> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            processors: Arc::clone(&self.processors),
            producers: self.producers.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<B, P> Debug for OrderFlowApi<B, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderFlowApi")
    }
}

impl<B, P> OrderFlowApi<B, P> {
    pub fn new(db: B, processors: Arc<P>, producers: EventProducers) -> Self {
        Self { db, processors, producers, clock: Clock::system() }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn processors(&self) -> &P {
        self.processors.as_ref()
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }
}

impl<B, P> OrderFlowApi<B, P>
where
    B: PaymentGatewayDatabase,
    P: PaymentProcessors,
{
    pub async fn fetch_order(&self, order_id: &OrderId) -> Result<Order, PaymentGatewayError> {
        self.db.fetch_order(order_id).await?.ok_or_else(|| PaymentGatewayError::OrderNotFound(order_id.clone()))
    }

    /// Turns the user's cart into an order. See [`Self::create_order_from_items`].
    pub async fn create_order(
        &self,
        user: &UserIdentifier,
        params: CreateOrderParams,
    ) -> Result<Order, PaymentGatewayError> {
        let cart = self.db.fetch_cart(user).await?.ok_or(PaymentGatewayError::EmptyOrder)?;
        self.create_order_from_items(user, cart.items, Some(cart.id), params).await
    }

    /// Creates an order for `items`.
    ///
    /// The order is validated (availability, stock, payment method, addresses, discount), priced, and snapshotted in
    /// every configured currency role. If a payment method is given, the first payment is prepared with the payment
    /// processor, then the order, its payment, the deletion of the cart and the stock refresh are committed together.
    ///
    /// An order with a zero total is settled on creation with a free payment. A free payment for an order with a
    /// positive total is refused.
    pub async fn create_order_from_items(
        &self,
        user: &UserIdentifier,
        items: Vec<CartItem>,
        cart_id: Option<CartId>,
        params: CreateOrderParams,
    ) -> Result<Order, PaymentGatewayError> {
        if items.is_empty() {
            return Err(PaymentGatewayError::EmptyOrder);
        }
        let now = self.clock.now();
        let config = self.db.fetch_runtime_config().await?;
        let converter = config.converter();

        let ids = items.iter().map(|i| i.product_id.clone()).collect::<Vec<_>>();
        let products =
            self.db.fetch_products(&ids).await?.into_iter().map(|p| (p.id.clone(), p)).collect::<BTreeMap<_, _>>();
        let mut wanted = BTreeMap::<ProductId, i64>::new();
        for item in &items {
            let product =
                products.get(&item.product_id).ok_or_else(|| PaymentGatewayError::ProductNotFound(item.product_id.clone()))?;
            if !product.availability.is_available_at(now) {
                return Err(PaymentGatewayError::ProductUnavailable(product.id.clone()));
            }
            if item.custom_price.is_some() && !product.allow_custom_price {
                return Err(PaymentGatewayError::InvalidCustomPrice(product.id.clone()));
            }
            if product.stock.is_some() || product.stock_reference.is_some() {
                *wanted.entry(product.stock_owner().clone()).or_default() += i64::from(item.quantity);
            }
        }
        ensure_stock_available(&self.db, user, &wanted, now).await?;

        if products.values().any(|p| p.shipping) && params.shipping_address.is_none() {
            return Err(PaymentGatewayError::MissingShippingAddress);
        }
        if config.require_billing_address && params.billing_address.is_none() {
            return Err(PaymentGatewayError::MissingBillingAddress);
        }
        if let Some(discount) = params.discount.as_ref() {
            if !discount.is_valid() {
                return Err(PaymentGatewayError::InvalidDiscount(format!("{discount:?}")));
            }
        }

        let perks = self.subscription_perks(user, now).await?;
        let effective_discounts = items
            .iter()
            .map(|item| match (item.discount_percentage, perks.discount_for(&item.product_id)) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            })
            .collect::<Vec<_>>();
        let mut pricing_items = Vec::with_capacity(items.len());
        for (item, discount) in items.iter().zip(effective_discounts.iter()) {
            let product =
                products.get(&item.product_id).ok_or_else(|| PaymentGatewayError::ProductNotFound(item.product_id.clone()))?;
            let mut pricing_item = PricingItem::from_cart_item(product, item);
            pricing_item.discount_percentage = *discount;
            pricing_items.push(pricing_item);
        }
        let mut pricing = PricingParams::new(&config.vat);
        pricing.buyer_country = params.country().cloned();
        pricing.vat_exempted = params.vat_exempted;
        pricing.discount = params.discount;
        pricing.free_product_units = perks.free_units.clone();
        pricing.delivery = config.delivery_fees.as_ref();
        pricing.vat_currency = config.currencies.main;
        let info = compute_price_info(&pricing_items, &pricing, &converter)?;

        let method = match params.payment_method {
            _ if info.total_price_with_vat.is_zero() => Some(PaymentMethod::Free),
            Some(PaymentMethod::Free) => return Err(PaymentGatewayError::FreePaymentForNonZeroTotal),
            other => other,
        };
        if let Some(method) = method.filter(|m| *m != PaymentMethod::Free) {
            if let Some(p) = products.values().find(|p| !p.accepts_payment_method(method.kind())) {
                debug!("🧾️ Product {} does not accept {method}", p.id);
                return Err(PaymentGatewayError::UnsupportedPaymentMethod(method.kind()));
            }
        }

        let roles = config.currencies.roles();
        let capture = |sats: Decimal| CurrencySnapshot::capture_sats(&converter, roles.iter().copied(), sats);
        let exact = info.exact;
        let currency_snapshot = OrderCurrencySnapshot {
            total_price: capture(info.total_price_with_vat.into())?,
            total_vat: capture(info.total_vat.into())?,
            partial_price: capture(info.partial_price_with_vat.into())?,
            discount: if exact.discount.is_zero() { None } else { Some(capture(exact.discount)?) },
            delivery_fees: if exact.delivery_fees.is_zero() { None } else { Some(capture(exact.delivery_fees)?) },
        };
        let mut order_items = Vec::with_capacity(items.len());
        for ((item, priced), discount) in items.iter().zip(info.items.iter()).zip(effective_discounts) {
            let product =
                products.get(&item.product_id).ok_or_else(|| PaymentGatewayError::ProductNotFound(item.product_id.clone()))?;
            order_items.push(OrderItem {
                product: product.clone(),
                quantity: item.quantity,
                booking: item.booking,
                custom_price: item.custom_price,
                deposit_percentage: item.deposit_percentage,
                discount_percentage: discount,
                chosen_variations: item.chosen_variations.clone(),
                vat_rate: priced.vat_rate,
                free_quantity: priced.free_quantity,
                currency_snapshot: OrderItemCurrencySnapshot {
                    price: capture(priced.price_sats)?,
                    vat: capture(priced.vat_sats)?,
                },
            });
        }
        let vat = info
            .vat
            .iter()
            .cloned()
            .map(|mut line| {
                line.price = line.price.rounded();
                line
            })
            .collect();

        let number = self.db.reserve_order_number().await?;
        let mut order = Order {
            id: OrderId::random(),
            number,
            version: 0,
            status: OrderStatus::Pending,
            user: user.clone(),
            items: order_items,
            payments: vec![],
            currency_snapshot,
            vat,
            vat_exempted: params.vat_exempted,
            discount: params.discount,
            shipping_address: params.shipping_address.clone(),
            billing_address: params.billing_address.clone(),
            notifications: OrderNotifications {
                email: params.notification_email.clone().or_else(|| user.email.clone()),
                npub: params.notification_npub.clone().or_else(|| user.npub.clone()),
            },
            keep_pending_on_payment_failure: params.keep_pending_on_payment_failure,
            cart_id,
            created_at: now,
            updated_at: now,
        };
        let ctx = FulfilmentContext { owner_email: config.owner_email.clone(), now };
        let new_order = match method {
            Some(PaymentMethod::Free) => {
                let payment = self.prepare_payment(&order, PaymentMethod::Free, Decimal::ZERO, &config, &converter).await?;
                let payment_id = payment.id.clone();
                let receipt = receipt_for(&payment, ReceivedPayment::new(payment.price, now), &converter)?;
                order = add_payment(&order, payment, now)?;
                NewOrder::new(order, ctx).paid_on_creation(payment_id, receipt)
            },
            Some(method) => {
                let amount = requested_amount(&order, None)?;
                let payment = self.prepare_payment(&order, method, amount, &config, &converter).await?;
                order = add_payment(&order, payment, now)?;
                NewOrder::new(order, ctx)
            },
            None => NewOrder::new(order, ctx),
        };
        let inserted = self.db.insert_order(new_order).await?;
        info!(
            "🧾️ Order #{} created for {user} with {} lines, total {}",
            inserted.order.number,
            inserted.order.items.len(),
            inserted.order.currency_snapshot.total_price.main().map(|p| p.to_string()).unwrap_or_default()
        );
        if let Some(transition) = inserted.paid {
            self.publish_paid(&transition).await;
        }
        Ok(inserted.order)
    }

    /// Adds a new payment attempt to a pending order.
    ///
    /// The payment requests what is still owed (or the deposit, for a first payment on a deposit order), never more.
    /// The amount is settled in the processor's currency, and snapshotted in the order's own currency roles.
    pub async fn add_order_payment(
        &self,
        order_id: &OrderId,
        method: PaymentMethod,
        opts: AddPaymentOptions,
    ) -> Result<Order, PaymentGatewayError> {
        let order = self.fetch_order(order_id).await?;
        if order.status != OrderStatus::Pending {
            return Err(OrderError::OrderNotPending { order: order.id.clone(), status: order.status }.into());
        }
        if is_order_fully_paid(&order, true) {
            return Err(OrderError::OrderAlreadyCovered(order.id.clone()).into());
        }
        let amount = requested_amount(&order, opts.amount)?;
        if method == PaymentMethod::Free && !amount.is_zero() {
            return Err(PaymentGatewayError::FreePaymentForNonZeroTotal);
        }
        if let Some(item) = order.items.iter().find(|i| !i.product.accepts_payment_method(method.kind())) {
            debug!("🧾️ Product {} does not accept {method}", item.product.id);
            return Err(PaymentGatewayError::UnsupportedPaymentMethod(method.kind()));
        }
        let now = self.clock.now();
        let config = self.db.fetch_runtime_config().await?;
        let converter = config.converter();
        let payment = self.prepare_payment(&order, method, amount, &config, &converter).await?;
        let payment_id = payment.id.clone();
        let updated = add_payment(&order, payment, now)?;
        let saved = self.db.update_order(OrderUpdate::new(order.version, updated)).await?;
        info!("🧾️ Payment {payment_id} ({method}) added to order #{}", saved.number);
        Ok(saved)
    }

    /// Records money received for a payment. This is the only way a payment becomes paid.
    ///
    /// The payment must be part of the order; a foreign payment is an invariant violation and is returned as such.
    pub async fn on_order_payment(
        &self,
        order: &Order,
        payment_id: &PaymentId,
        received: ReceivedPayment,
    ) -> Result<PaidTransition, PaymentGatewayError> {
        let payment = ensure_payment_belongs(order, payment_id)?;
        let config = self.db.fetch_runtime_config().await?;
        let converter = config.converter();
        let receipt = receipt_for(payment, received, &converter)?;
        let ctx = FulfilmentContext { owner_email: config.owner_email.clone(), now: self.clock.now() };
        let transition = self.db.pay_order_payment(order, payment_id, receipt, ctx).await?;
        self.publish_paid(&transition).await;
        Ok(transition)
    }

    /// Moves a pending payment to `status` (expired, canceled or failed). The order follows when no payment is left
    /// that could still pay it.
    pub async fn on_order_payment_failed(
        &self,
        order: &Order,
        payment_id: &PaymentId,
        status: PaymentStatus,
        reason: Option<String>,
    ) -> Result<Order, PaymentGatewayError> {
        let now = self.clock.now();
        let updated = mark_payment_failed(order, payment_id, status, reason, now)?;
        let mut emails = vec![];
        if status == PaymentStatus::Expired {
            if let Some(email) = order.notifications.email.as_ref() {
                emails.push(EmailMessage::new(email.as_str(), "order.payment.expired").with_var("orderNumber", order.number));
            }
        }
        let saved = self.db.update_order(OrderUpdate::new(order.version, updated).with_emails(emails)).await?;
        info!("🧾️ Payment {payment_id} of order #{} is {status}. Order is {}", saved.number, saved.status);
        if let Some(payment) = saved.payment(payment_id).cloned() {
            for producer in &self.producers.payment_failed_producer {
                producer.publish_event(PaymentFailedEvent { order: saved.clone(), payment: payment.clone() }).await;
            }
        }
        self.publish_annulled(&saved).await;
        Ok(saved)
    }

    /// Confirms a bank transfer or point-of-sale payment on behalf of an operator. `received` defaults to the
    /// payment's price.
    pub async fn confirm_manual_payment(
        &self,
        order_id: &OrderId,
        payment_id: &PaymentId,
        received: Option<Price>,
    ) -> Result<PaidTransition, PaymentGatewayError> {
        let order = self.fetch_order(order_id).await?;
        let payment = ensure_payment_belongs(&order, payment_id)?;
        if !payment.method.is_manual() {
            return Err(PaymentGatewayError::NotManualPayment(payment_id.clone()));
        }
        let amount = received.unwrap_or(payment.price);
        info!("🧾️ Manual confirmation of payment {payment_id} of order #{} for {amount}", order.number);
        self.on_order_payment(&order, payment_id, ReceivedPayment::new(amount, self.clock.now())).await
    }

    /// Cancels a pending order and its pending payments. Reserved stock is released.
    pub async fn cancel_order(&self, order_id: &OrderId) -> Result<Order, PaymentGatewayError> {
        let order = self.fetch_order(order_id).await?;
        let canceled = cancel_order(&order, self.clock.now())?;
        let saved = self.db.update_order(OrderUpdate::new(order.version, canceled)).await?;
        info!("🧾️ Order #{} canceled", saved.number);
        self.publish_annulled(&saved).await;
        Ok(saved)
    }

    /// Builds a payment for `amount` (in the order's main currency), asking the processor for an address, invoice or
    /// checkout where the method needs one.
    async fn prepare_payment(
        &self,
        order: &Order,
        method: PaymentMethod,
        amount: Decimal,
        config: &RuntimeConfig,
        converter: &CurrencyConverter,
    ) -> Result<OrderPayment, PaymentGatewayError> {
        let now = self.clock.now();
        let snapshot = payment_snapshot(order, amount)?;
        let settlement = config.settlement_currency(&method);
        let price = match snapshot.views().find(|(_, p)| p.currency == settlement) {
            Some((_, p)) => *p,
            None => {
                let main = snapshot.main().copied().ok_or_else(|| OrderError::MissingCurrencyView {
                    order: order.id.clone(),
                    role: CurrencyRole::Main,
                })?;
                converter.to_price(settlement, &main)?
            },
        };
        let expires_at = match method {
            PaymentMethod::Free | PaymentMethod::BankTransfer | PaymentMethod::PointOfSale { tap_to_pay: None } => None,
            _ => Some(now + Duration::minutes(config.payment_timeout_minutes)),
        };
        let id = PaymentId::random();
        let handle = match method {
            PaymentMethod::Free | PaymentMethod::BankTransfer | PaymentMethod::PointOfSale { tap_to_pay: None } => None,
            PaymentMethod::PointOfSale { tap_to_pay: Some(_) } => Some(PaymentHandle::TapToPay { started_at: now }),
            _ => {
                let request = PayableRequest {
                    order_id: order.id.clone(),
                    order_number: order.number,
                    payment_id: id.clone(),
                    amount: price,
                    expires_at,
                    label: format!("Order #{}", order.number),
                };
                let handle = self.processors.create_payable(&method, &request).await?;
                debug!("🧾️ {method} payable created for order #{}: {handle:?}", order.number);
                Some(handle)
            },
        };
        Ok(OrderPayment {
            id,
            method,
            status: PaymentStatus::Pending,
            price,
            currency_snapshot: PaymentCurrencySnapshot { price: snapshot, ..Default::default() },
            created_at: now,
            expires_at,
            handle,
            transactions: vec![],
            paid_at: None,
            invoice: None,
            received: None,
            fees: None,
            failure_reason: None,
        })
    }

    async fn subscription_perks(
        &self,
        user: &UserIdentifier,
        now: DateTime<Utc>,
    ) -> Result<SubscriptionPerks, PaymentGatewayError> {
        let subs = self.db.fetch_active_subscriptions(user, now).await?;
        if subs.is_empty() {
            return Ok(SubscriptionPerks::default());
        }
        let ids = subs.iter().map(|s| s.product_id.clone()).collect::<Vec<_>>();
        let products = self.db.fetch_products(&ids).await?;
        Ok(SubscriptionPerks::from_products(&products))
    }

    async fn publish_paid(&self, transition: &PaidTransition) {
        for producer in &self.producers.payment_received_producer {
            let event = PaymentReceivedEvent { order: transition.order.clone(), payment: transition.payment.clone() };
            producer.publish_event(event).await;
        }
        if transition.order_paid {
            for producer in &self.producers.order_paid_producer {
                debug!("🧾️ Notifying order paid hook subscribers");
                producer.publish_event(OrderPaidEvent::new(transition.order.clone())).await;
            }
        }
    }

    async fn publish_annulled(&self, order: &Order) {
        if matches!(order.status, OrderStatus::Pending | OrderStatus::Paid) {
            return;
        }
        for producer in &self.producers.order_annulled_producer {
            producer.publish_event(OrderAnnulledEvent::new(order.clone())).await;
        }
    }
}

/// Discounts and free units granted by the buyer's active subscriptions.
#[derive(Debug, Clone, Default)]
struct SubscriptionPerks {
    whole_catalog: Option<Decimal>,
    per_product: BTreeMap<ProductId, Decimal>,
    free_units: BTreeMap<ProductId, Decimal>,
}

impl SubscriptionPerks {
    fn from_products(products: &[Product]) -> Self {
        let mut perks = Self::default();
        for plan in products.iter().filter_map(|p| p.subscription.as_ref()) {
            if let Some(d) = plan.whole_catalog_discount {
                perks.whole_catalog = Some(perks.whole_catalog.map_or(d, |c| c.max(d)));
            }
            for (id, d) in &plan.product_discounts {
                let entry = perks.per_product.entry(id.clone()).or_insert(*d);
                *entry = (*entry).max(*d);
            }
            for (id, units) in &plan.free_product_units {
                *perks.free_units.entry(id.clone()).or_default() += Decimal::from(*units);
            }
        }
        perks
    }

    /// The larger of the whole-catalog and the product discount.
    fn discount_for(&self, product_id: &ProductId) -> Option<Decimal> {
        match (self.whole_catalog, self.per_product.get(product_id).copied()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// The amount a new payment asks for, in the order's main currency.
///
/// Defaults to the deposit while nothing has been paid on a deposit order, and to everything owed otherwise.
fn requested_amount(order: &Order, requested: Option<Decimal>) -> Result<Decimal, OrderError> {
    let owed = amount_owed(order)?.amount;
    let nothing_paid = order.payments.iter().all(|p| p.status != PaymentStatus::Paid);
    let default = match order.currency_snapshot.partial_price.main() {
        Some(partial) if nothing_paid => partial.amount.min(owed),
        _ => owed,
    };
    Ok(requested.unwrap_or(default).clamp(Decimal::ZERO, owed))
}

/// The order's total snapshot scaled to `amount`, so that a payment of the full amount carries exactly the order's
/// figures in every role.
fn payment_snapshot(order: &Order, amount: Decimal) -> Result<CurrencySnapshot, OrderError> {
    let total = order
        .currency_snapshot
        .total_price
        .main()
        .copied()
        .ok_or_else(|| OrderError::MissingCurrencyView { order: order.id.clone(), role: CurrencyRole::Main })?;
    let ratio = if total.amount.is_zero() { Decimal::ZERO } else { amount / total.amount };
    Ok(CurrencySnapshot::from_views(order.currency_snapshot.total_price.views().map(|(role, p)| {
        let value = if *role == CurrencyRole::Main { amount } else { fix_currency_rounding(p.amount * ratio, p.currency) };
        (*role, Price::new(value, p.currency))
    })))
}

fn receipt_for(
    payment: &OrderPayment,
    received: ReceivedPayment,
    converter: &CurrencyConverter,
) -> Result<PaymentReceipt, PaymentGatewayError> {
    let roles = payment.currency_snapshot.price.roles();
    let received_snapshot = CurrencySnapshot::capture(converter, roles.iter().copied(), &received.amount)?;
    let fees_snapshot = match received.fees.as_ref() {
        Some(fees) => Some(CurrencySnapshot::capture(converter, roles.iter().copied(), fees)?),
        None => None,
    };
    Ok(PaymentReceipt {
        received: received.amount,
        received_snapshot,
        fees: received.fees,
        fees_snapshot,
        transactions: received.transactions,
        paid_at: received.paid_at,
    })
}
