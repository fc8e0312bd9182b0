use std::str::FromStr;

use bop_common::Sats;
use bop_payment_engine::{
    bpe_api::order_objects::CreateOrderParams,
    currency::{CurrencyRole, Price},
    db_types::{
        BitcoinProcessor,
        CardProcessor,
        LightningProcessor,
        OrderStatus,
        PaymentHandle,
        PaymentMethod,
        PaymentStatus,
        ProductId,
    },
    processors::{CardCheckoutState, LightningInvoiceStatus},
    test_utils::fixtures::{address, eur},
    CartLineOptions,
    FulfilmentManagement,
};
use chrono::Duration;
use cucumber::{then, when};
use rust_decimal::Decimal;

use crate::cucumber::{shop_world::customer, ShopWorld};

fn payment_method(name: &str) -> PaymentMethod {
    match name {
        "bank-transfer" => PaymentMethod::BankTransfer,
        "bitcoin" => PaymentMethod::Bitcoin(BitcoinProcessor::Bitcoind),
        "lightning" => PaymentMethod::Lightning(LightningProcessor::Lnd),
        "card" => PaymentMethod::Card(CardProcessor::Stripe),
        "paypal" => PaymentMethod::Paypal,
        "cash" => PaymentMethod::PointOfSale { tap_to_pay: None },
        _ => panic!("Unknown payment method {name}"),
    }
}

#[when(expr = "{word} adds {int} {word} to the cart")]
async fn add_to_cart(world: &mut ShopWorld, name: String, quantity: u32, product: String) {
    let result =
        world.system().carts.add_to_cart(&customer(&name), &ProductId::from(product), quantity, CartLineOptions::default()).await;
    world.last_error = result.err();
}

#[when(expr = "{word} checks out with {word} shipping to {word}")]
async fn checkout_shipped(world: &mut ShopWorld, name: String, method: String, country: String) {
    let params =
        CreateOrderParams::default().with_payment_method(payment_method(&method)).with_shipping_address(address(&country));
    checkout(world, name, params).await;
}

#[when(expr = "{word} checks out with {word}")]
async fn checkout_digital(world: &mut ShopWorld, name: String, method: String) {
    let params = CreateOrderParams::default().with_payment_method(payment_method(&method));
    checkout(world, name, params).await;
}

async fn checkout(world: &mut ShopWorld, name: String, params: CreateOrderParams) {
    match world.api().create_order(&customer(&name), params).await {
        Ok(order) => {
            world.orders.insert(name, order);
            world.last_error = None;
        },
        Err(e) => world.last_error = Some(e),
    }
}

#[when(expr = "the operator confirms the payment of {word}")]
async fn confirm_payment(world: &mut ShopWorld, name: String) {
    let order = world.refresh_order(&name).await;
    let payment = order.pending_payments().next().expect("No pending payment").id.clone();
    world.api().confirm_manual_payment(&order.id, &payment, None).await.expect("Error confirming payment");
}

#[when(expr = "{word} cancels the order")]
async fn cancel_order(world: &mut ShopWorld, name: String) {
    let id = world.order_of(&name).id.clone();
    world.api().cancel_order(&id).await.expect("Error canceling order");
}

#[when(expr = "the lightning invoice of {word} is paid")]
async fn pay_invoice(world: &mut ShopWorld, name: String) {
    let order = world.refresh_order(&name).await;
    let payment = order.pending_payments().next().expect("No pending payment");
    let Some(PaymentHandle::Invoice { invoice_id, .. }) = payment.handle.as_ref() else {
        panic!("The payment of {name} has no invoice");
    };
    let received = Sats::try_from(payment.price.amount).expect("Invoice amount is not a whole number of sats");
    let status = LightningInvoiceStatus {
        paid: true,
        expired: false,
        received,
        fees: None,
        paid_at: Some(world.system().clock.now()),
    };
    world.system().processors.set_invoice(invoice_id, status).await;
}

#[when(expr = "the card of {word} is declined")]
async fn decline_card(world: &mut ShopWorld, name: String) {
    let order = world.refresh_order(&name).await;
    let payment = order.pending_payments().next().expect("No pending payment");
    let Some(PaymentHandle::Checkout { checkout_id, .. }) = payment.handle.as_ref() else {
        panic!("The payment of {name} has no checkout");
    };
    let state = CardCheckoutState::Failed { reason: Some("declined".to_string()) };
    world.system().processors.set_checkout(checkout_id, state).await;
}

#[when("the reconciler runs")]
async fn run_reconciler(world: &mut ShopWorld) {
    let system = world.system();
    system.reconciler.tick(&system.lease).await.expect("Reconciliation failed");
}

#[when(expr = "{int} minutes pass")]
async fn minutes_pass(world: &mut ShopWorld, minutes: i64) {
    world.system().clock.advance(Duration::minutes(minutes));
}

#[when("lapsed cart reservations are released")]
async fn release_reservations(world: &mut ShopWorld) {
    let system = world.system();
    let now = system.clock.now();
    system.stock.refresh_expired_reservations(now - Duration::days(1), now).await.expect("Error refreshing stock");
}

#[then(expr = "the order of {word} is {word}")]
async fn order_status(world: &mut ShopWorld, name: String, status: String) {
    let order = world.refresh_order(&name).await;
    let expected = OrderStatus::from_str(&status).expect("Not an order status");
    assert_eq!(order.status, expected, "Order status is incorrect");
}

#[then(expr = "the payment of {word} is {word}")]
async fn payment_status(world: &mut ShopWorld, name: String, status: String) {
    let order = world.refresh_order(&name).await;
    let payment = order.payments.last().expect("The order has no payment");
    let expected = PaymentStatus::from_str(&status).expect("Not a payment status");
    assert_eq!(payment.status, expected, "Payment status is incorrect");
}

#[then(expr = "the order of {word} totals {int} EUR including {int} EUR of VAT")]
async fn order_total(world: &mut ShopWorld, name: String, total: i64, vat: i64) {
    let order = world.refresh_order(&name).await;
    let snapshot = &order.currency_snapshot;
    assert_eq!(snapshot.total_price.get(CurrencyRole::Main), Some(&eur(total)), "Total is incorrect");
    assert_eq!(snapshot.total_vat.get(CurrencyRole::Main), Some(&eur(vat)), "VAT is incorrect");
}

#[then(expr = "the order of {word} is worth {int} sats")]
async fn order_sats(world: &mut ShopWorld, name: String, sats: i64) {
    let order = world.refresh_order(&name).await;
    let accounting = order.currency_snapshot.total_price.get(CurrencyRole::Accounting).copied();
    assert_eq!(accounting, Some(Price::sats(Sats::from(sats))), "Accounting total is incorrect");
}

#[then(expr = "the payment of {word} has invoice number {int}")]
async fn invoice_number(world: &mut ShopWorld, name: String, number: i64) {
    let order = world.refresh_order(&name).await;
    let invoice = order.payments.last().and_then(|p| p.invoice).expect("The payment has no invoice");
    assert_eq!(invoice.number, number, "Invoice number is incorrect");
}

#[then(expr = "{word} has {int} units available out of {int}")]
async fn stock_available(world: &mut ShopWorld, product: String, available: i64, total: i64) {
    let product = world
        .system()
        .stock
        .fetch_product(&ProductId::from(product))
        .await
        .expect("Error fetching product")
        .expect("Product does not exist");
    let stock = product.stock.expect("The product has no stock");
    assert_eq!(stock.available, available, "Available stock is incorrect");
    assert_eq!(stock.total, total, "Total stock is incorrect");
}

#[then(expr = "the request fails with {string}")]
async fn request_failed(world: &mut ShopWorld, message: String) {
    let err = world.last_error.as_ref().expect("The last request succeeded");
    assert_eq!(err.to_string(), message);
}

#[then(expr = "an email {string} was queued for {word}")]
async fn email_queued(world: &mut ShopWorld, template: String, name: String) {
    let to = customer(&name).email.expect("Customers have an email");
    let emails = world.system().db.fetch_queued_emails().await.expect("Error fetching emails");
    assert!(
        emails.iter().any(|e| e.template == template && e.to == to),
        "No {template} email for {to} in {emails:?}"
    );
}

#[then(expr = "{word} owes {int} EUR")]
async fn amount_owed(world: &mut ShopWorld, name: String, owed: i64) {
    let order = world.refresh_order(&name).await;
    let owed_now = bop_payment_engine::orders::amount_owed(&order).expect("Order has no main currency");
    assert_eq!(owed_now.amount, Decimal::from(owed), "Amount owed is incorrect");
}
