use std::time::Duration as StdDuration;

use bop_common::Sats;
use bop_payment_engine::{
    bpe_api::order_objects::CreateOrderParams,
    currency::Currency,
    db_types::{
        BitcoinProcessor,
        CardProcessor,
        CartItem,
        LightningProcessor,
        Order,
        OrderStatus,
        PaymentHandle,
        PaymentMethod,
        PaymentStatus,
    },
    events::{EventHandlers, EventHooks, OrderAnnulledEvent, OrderPaidEvent},
    lock::{DistributedLock, Lease},
    processors::{CardCharge, CardCheckoutState, LightningInvoiceStatus, PaypalOrderState},
    test_utils::{fixtures::eur, scripted_processors::ScriptedProcessors},
    FulfilmentManagement,
    PaymentReconciler,
    SqliteDatabase,
    TickSummary,
};
use chrono::Duration;
use rust_decimal::Decimal;
use support::{alice, bob, Shop};
use tokio::sync::mpsc;

mod support;

type Reconciler = PaymentReconciler<SqliteDatabase, ScriptedProcessors>;

async fn reconciler(shop: &Shop) -> (Reconciler, Lease) {
    let lock = DistributedLock::new(shop.db.clone(), "reconciler", "test-node", StdDuration::from_secs(60));
    let lease = lock.acquire().await.unwrap().expect("The lock should be free");
    (PaymentReconciler::new(shop.orders.clone()), lease)
}

/// Orders one e-book (12 EUR with VAT, 40 000 sats) paid with `method`.
async fn ebook_order(shop: &Shop, method: PaymentMethod) -> Order {
    let items = vec![CartItem::new("ebook".into(), 1)];
    let params = CreateOrderParams::default().with_payment_method(method);
    shop.orders.create_order_from_items(&alice(), items, None, params).await.unwrap()
}

fn checkout_id(order: &Order) -> String {
    match order.payments[0].handle.as_ref() {
        Some(PaymentHandle::Checkout { checkout_id, .. }) => checkout_id.clone(),
        other => panic!("Expected a checkout, got {other:?}"),
    }
}

#[tokio::test]
async fn bitcoin_needs_enough_confirmed_sats() {
    let shop = Shop::open().await;
    let (reconciler, lease) = reconciler(&shop).await;
    let order = ebook_order(&shop, PaymentMethod::Bitcoin(BitcoinProcessor::Bitcoind)).await;
    let Some(PaymentHandle::Address { address }) = order.payments[0].handle.clone() else {
        panic!("Bitcoin payments get an address");
    };
    assert_eq!(order.payments[0].price.amount, Decimal::from(40_000));

    shop.clock.advance(Duration::minutes(5));
    let mined = Some(shop.clock.now());
    shop.processors.add_transfer(&address, "tx-unconfirmed", Sats::from(40_000), 0, None).await;
    shop.processors.add_transfer(&address, "tx-1", Sats::from(25_000), 1, mined).await;
    let summary = reconciler.tick(&lease).await.unwrap();
    assert_eq!(summary, TickSummary { orders_checked: 1, ..Default::default() });
    assert_eq!(shop.orders.fetch_order(&order.id).await.unwrap().status, OrderStatus::Pending);

    shop.processors.add_transfer(&address, "tx-2", Sats::from(15_000), 3, mined).await;
    let summary = reconciler.tick(&lease).await.unwrap();
    assert_eq!(summary.payments_paid, 1);
    let paid = shop.orders.fetch_order(&order.id).await.unwrap();
    assert_eq!(paid.status, OrderStatus::Paid);
    let payment = &paid.payments[0];
    assert_eq!(payment.status, PaymentStatus::Paid);
    assert_eq!(payment.received.unwrap().amount, Decimal::from(40_000));
    let txids = payment.transactions.iter().map(|t| t.id.as_str()).collect::<Vec<_>>();
    assert_eq!(txids, vec!["tx-1", "tx-2"]);

    let summary = reconciler.tick(&lease).await.unwrap();
    assert_eq!(summary.orders_checked, 0, "Paid orders are no longer reconciled");
    shop.close().await;
}

#[tokio::test]
async fn transfers_mined_before_the_order_do_not_count() {
    let shop = Shop::open().await;
    let (reconciler, lease) = reconciler(&shop).await;
    let order = ebook_order(&shop, PaymentMethod::Bitcoin(BitcoinProcessor::Bitcoind)).await;
    let Some(PaymentHandle::Address { address }) = order.payments[0].handle.clone() else {
        panic!("Bitcoin payments get an address");
    };
    let earlier = Some(order.created_at - Duration::hours(1));
    shop.processors.add_transfer(&address, "tx-old", Sats::from(40_000), 10, earlier).await;
    let summary = reconciler.tick(&lease).await.unwrap();
    assert_eq!(summary.payments_paid, 0);
    shop.close().await;
}

#[tokio::test]
async fn lightning_invoices() {
    let shop = Shop::open().await;
    let (reconciler, lease) = reconciler(&shop).await;
    let paid = ebook_order(&shop, PaymentMethod::Lightning(LightningProcessor::Lnd)).await;
    let expired = ebook_order(&shop, PaymentMethod::Lightning(LightningProcessor::Phoenixd)).await;
    let invoice = |o: &Order| match o.payments[0].handle.as_ref() {
        Some(PaymentHandle::Invoice { invoice_id, .. }) => invoice_id.clone(),
        other => panic!("Expected an invoice, got {other:?}"),
    };
    let status = LightningInvoiceStatus {
        paid: true,
        expired: false,
        received: Sats::from(40_000),
        fees: Some(Sats::from(12)),
        paid_at: Some(shop.clock.now()),
    };
    shop.processors.set_invoice(&invoice(&paid), status).await;
    let status =
        LightningInvoiceStatus { paid: false, expired: true, received: Sats::from(0), fees: None, paid_at: None };
    shop.processors.set_invoice(&invoice(&expired), status).await;

    let summary = reconciler.tick(&lease).await.unwrap();
    assert_eq!((summary.orders_checked, summary.payments_paid, summary.payments_failed), (2, 1, 1));

    let paid = shop.orders.fetch_order(&paid.id).await.unwrap();
    assert_eq!(paid.status, OrderStatus::Paid);
    assert_eq!(paid.payments[0].fees.unwrap().amount, Decimal::from(12));
    let expired = shop.orders.fetch_order(&expired.id).await.unwrap();
    assert_eq!(expired.status, OrderStatus::Expired);
    assert_eq!(expired.payments[0].status, PaymentStatus::Expired);
    shop.close().await;
}

#[tokio::test]
async fn short_payments_do_not_pay_the_order() {
    let shop = Shop::open().await;
    let (reconciler, lease) = reconciler(&shop).await;
    let lightning = ebook_order(&shop, PaymentMethod::Lightning(LightningProcessor::Lnd)).await;
    let card = ebook_order(&shop, PaymentMethod::Card(CardProcessor::Stripe)).await;
    let Some(PaymentHandle::Invoice { invoice_id, .. }) = lightning.payments[0].handle.clone() else {
        panic!("Lightning payments get an invoice");
    };
    let status = LightningInvoiceStatus {
        paid: true,
        expired: false,
        received: Sats::from(1),
        fees: None,
        paid_at: Some(shop.clock.now()),
    };
    shop.processors.set_invoice(&invoice_id, status).await;
    let state = CardCheckoutState::Succeeded { received: eur(5), fees: None, transaction_id: "ch_short".to_string() };
    shop.processors.set_checkout(&checkout_id(&card), state).await;

    let summary = reconciler.tick(&lease).await.unwrap();
    assert_eq!(summary, TickSummary { orders_checked: 2, ..Default::default() });
    for order in [&lightning, &card] {
        let order = shop.orders.fetch_order(&order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payments[0].status, PaymentStatus::Pending);
        assert!(order.payments[0].received.is_none());
    }

    shop.clock.advance(Duration::minutes(61));
    let summary = reconciler.tick(&lease).await.unwrap();
    assert_eq!(summary.payments_failed, 2);
    assert_eq!(shop.orders.fetch_order(&lightning.id).await.unwrap().status, OrderStatus::Expired);
    shop.close().await;
}

#[tokio::test]
async fn declined_cards_fail_the_order() {
    let shop = Shop::open().await;
    let (reconciler, lease) = reconciler(&shop).await;
    let order = ebook_order(&shop, PaymentMethod::Card(CardProcessor::Stripe)).await;
    assert_eq!(order.payments[0].price, eur(12));
    let state = CardCheckoutState::Failed { reason: Some("card declined".to_string()) };
    shop.processors.set_checkout(&checkout_id(&order), state).await;

    let summary = reconciler.tick(&lease).await.unwrap();
    assert_eq!(summary.payments_failed, 1);
    let failed = shop.orders.fetch_order(&order.id).await.unwrap();
    assert_eq!(failed.status, OrderStatus::Failed);
    assert_eq!(failed.payments[0].status, PaymentStatus::Failed);
    assert_eq!(failed.payments[0].failure_reason.as_deref(), Some("card declined"));
    shop.close().await;
}

#[tokio::test]
async fn card_payments_succeed() {
    let shop = Shop::open().await;
    let (reconciler, lease) = reconciler(&shop).await;
    let order = ebook_order(&shop, PaymentMethod::Card(CardProcessor::Sumup)).await;
    let state = CardCheckoutState::Succeeded { received: eur(12), fees: None, transaction_id: "ch_1".to_string() };
    shop.processors.set_checkout(&checkout_id(&order), state).await;

    let summary = reconciler.tick(&lease).await.unwrap();
    assert_eq!(summary.payments_paid, 1);
    let paid = shop.orders.fetch_order(&order.id).await.unwrap();
    assert_eq!(paid.status, OrderStatus::Paid);
    assert_eq!(paid.payments[0].invoice.unwrap().number, 1);
    shop.close().await;
}

#[tokio::test]
async fn pending_checkouts_are_canceled_once_expired() {
    let shop = Shop::open().await;
    let (reconciler, lease) = reconciler(&shop).await;
    let order = ebook_order(&shop, PaymentMethod::Card(CardProcessor::Stripe)).await;
    let checkout = checkout_id(&order);

    let summary = reconciler.tick(&lease).await.unwrap();
    assert_eq!(summary.payments_failed, 0);

    shop.clock.advance(Duration::minutes(61));
    let summary = reconciler.tick(&lease).await.unwrap();
    assert_eq!(summary.payments_failed, 1);
    assert_eq!(shop.processors.canceled_checkouts().await, vec![checkout]);
    let expired = shop.orders.fetch_order(&order.id).await.unwrap();
    assert_eq!(expired.status, OrderStatus::Expired);
    assert_eq!(expired.payments[0].status, PaymentStatus::Expired);

    let emails = shop.db.fetch_queued_emails().await.unwrap();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].template, "order.payment.expired");
    assert_eq!(emails[0].to, "alice@example.com");
    shop.close().await;
}

#[tokio::test]
async fn processor_errors_skip_the_payment_without_stopping_the_tick() {
    let shop = Shop::open().await;
    let (reconciler, lease) = reconciler(&shop).await;
    let first = ebook_order(&shop, PaymentMethod::Lightning(LightningProcessor::Lnd)).await;
    let second = ebook_order(&shop, PaymentMethod::Lightning(LightningProcessor::Lnd)).await;

    shop.processors.set_failing(true).await;
    let summary = reconciler.tick(&lease).await.unwrap();
    assert_eq!(summary, TickSummary { orders_checked: 2, errors: 2, ..Default::default() });
    assert_eq!(shop.processors.lookups().await, 2);

    // Still unreachable once the payments are past their expiry: they expire anyway
    shop.clock.advance(Duration::minutes(61));
    let summary = reconciler.tick(&lease).await.unwrap();
    assert_eq!(summary, TickSummary { orders_checked: 2, payments_failed: 2, errors: 2, ..Default::default() });
    for order in [first, second] {
        assert_eq!(shop.orders.fetch_order(&order.id).await.unwrap().status, OrderStatus::Expired);
    }
    shop.close().await;
}

#[tokio::test]
async fn tap_to_pay_matches_each_charge_once() {
    let shop = Shop::open().await;
    let (reconciler, lease) = reconciler(&shop).await;
    let method = PaymentMethod::PointOfSale { tap_to_pay: Some(CardProcessor::Sumup) };
    let first = ebook_order(&shop, method).await;
    let second = ebook_order(&shop, method).await;
    assert!(matches!(first.payments[0].handle, Some(PaymentHandle::TapToPay { .. })));
    assert_eq!(shop.processors.payables().await.len(), 0, "Terminal sessions need no payable");

    let at = shop.clock.now() + Duration::minutes(1);
    shop.processors.add_card_charge(CardProcessor::Sumup, CardCharge { id: "ch-wrong".into(), amount: eur(11), created_at: at }).await;
    shop.processors.add_card_charge(CardProcessor::Sumup, CardCharge { id: "ch-1".into(), amount: eur(12), created_at: at }).await;
    shop.clock.advance(Duration::minutes(2));

    let summary = reconciler.tick(&lease).await.unwrap();
    assert_eq!(summary.payments_paid, 1);
    let summary = reconciler.tick(&lease).await.unwrap();
    assert_eq!(summary.payments_paid, 0, "A charge pays one session only");

    let first = shop.orders.fetch_order(&first.id).await.unwrap();
    let second = shop.orders.fetch_order(&second.id).await.unwrap();
    let paid = [&first, &second].iter().filter(|o| o.status == OrderStatus::Paid).count();
    assert_eq!(paid, 1);
    let paid = if first.status == OrderStatus::Paid { &first } else { &second };
    assert_eq!(paid.payments[0].transactions[0].id, "ch-1");
    shop.close().await;
}

#[tokio::test]
async fn tap_to_pay_charge_survives_a_failed_write() {
    let shop = Shop::open().await;
    let (reconciler, lease) = reconciler(&shop).await;
    let order = ebook_order(&shop, PaymentMethod::PointOfSale { tap_to_pay: Some(CardProcessor::Sumup) }).await;
    let at = shop.clock.now() + Duration::minutes(1);
    shop.processors.add_card_charge(CardProcessor::Sumup, CardCharge { id: "ch-1".into(), amount: eur(12), created_at: at }).await;
    shop.clock.advance(Duration::minutes(2));

    sqlx::query("CREATE TRIGGER orders_read_only BEFORE UPDATE ON orders BEGIN SELECT RAISE(ABORT, 'disk full'); END")
        .execute(shop.db.pool())
        .await
        .unwrap();
    let summary = reconciler.tick(&lease).await.unwrap();
    assert_eq!(summary, TickSummary { orders_checked: 1, errors: 1, ..Default::default() });
    assert_eq!(shop.orders.fetch_order(&order.id).await.unwrap().status, OrderStatus::Pending);

    sqlx::query("DROP TRIGGER orders_read_only").execute(shop.db.pool()).await.unwrap();
    let summary = reconciler.tick(&lease).await.unwrap();
    assert_eq!(summary.payments_paid, 1);
    let paid = shop.orders.fetch_order(&order.id).await.unwrap();
    assert_eq!(paid.status, OrderStatus::Paid);
    assert_eq!(paid.payments[0].transactions[0].id, "ch-1");
    shop.close().await;
}

#[tokio::test]
async fn paypal_orders_are_captured_once_approved() {
    let shop = Shop::open().await;
    let (reconciler, lease) = reconciler(&shop).await;
    let approved = ebook_order(&shop, PaymentMethod::Paypal).await;
    let voided = ebook_order(&shop, PaymentMethod::Paypal).await;
    assert_eq!(approved.payments[0].price.currency, Currency::Eur);
    shop.processors.set_paypal_order(&checkout_id(&approved), PaypalOrderState::Approved).await;
    shop.processors.set_paypal_order(&checkout_id(&voided), PaypalOrderState::Voided).await;

    let summary = reconciler.tick(&lease).await.unwrap();
    assert_eq!((summary.payments_paid, summary.payments_failed), (1, 1));
    let approved = shop.orders.fetch_order(&approved.id).await.unwrap();
    assert_eq!(approved.status, OrderStatus::Paid);
    assert_eq!(approved.payments[0].received, Some(eur(12)));
    let voided = shop.orders.fetch_order(&voided.id).await.unwrap();
    assert_eq!(voided.status, OrderStatus::Canceled);
    assert_eq!(voided.payments[0].status, PaymentStatus::Canceled);
    shop.close().await;
}

#[tokio::test]
async fn manual_payments_are_left_to_the_operator() {
    let shop = Shop::open().await;
    let (reconciler, lease) = reconciler(&shop).await;
    let order = ebook_order(&shop, PaymentMethod::BankTransfer).await;
    shop.clock.advance(Duration::days(30));
    let summary = reconciler.tick(&lease).await.unwrap();
    assert_eq!(summary, TickSummary { orders_checked: 1, ..Default::default() });
    assert_eq!(shop.processors.lookups().await, 0);
    assert_eq!(shop.orders.fetch_order(&order.id).await.unwrap().status, OrderStatus::Pending);
    shop.close().await;
}

#[tokio::test]
async fn hooks_hear_about_paid_and_annulled_orders() {
    let (paid_tx, mut paid_rx) = mpsc::channel::<OrderPaidEvent>(8);
    let (annulled_tx, mut annulled_rx) = mpsc::channel::<OrderAnnulledEvent>(8);
    let mut hooks = EventHooks::default();
    hooks.on_order_paid(move |ev| {
        let tx = paid_tx.clone();
        Box::pin(async move {
            let _ = tx.send(ev).await;
        })
    });
    hooks.on_order_annulled(move |ev| {
        let tx = annulled_tx.clone();
        Box::pin(async move {
            let _ = tx.send(ev).await;
        })
    });
    let handlers = EventHandlers::new(8, hooks);
    let shop = Shop::open_with_producers(handlers.producers()).await;
    handlers.start_handlers().await;

    let (reconciler, lease) = reconciler(&shop).await;
    let paid = ebook_order(&shop, PaymentMethod::Card(CardProcessor::Stripe)).await;
    let state = CardCheckoutState::Succeeded { received: eur(12), fees: None, transaction_id: "ch_9".to_string() };
    shop.processors.set_checkout(&checkout_id(&paid), state).await;
    let items = vec![CartItem::new("ebook".into(), 1)];
    let canceled = shop.orders.create_order_from_items(&bob(), items, None, CreateOrderParams::default()).await.unwrap();
    shop.orders.cancel_order(&canceled.id).await.unwrap();
    reconciler.tick(&lease).await.unwrap();

    let wait = StdDuration::from_secs(5);
    let ev = tokio::time::timeout(wait, paid_rx.recv()).await.expect("No order paid event").unwrap();
    assert_eq!(ev.order.id, paid.id);
    let ev = tokio::time::timeout(wait, annulled_rx.recv()).await.expect("No order annulled event").unwrap();
    assert_eq!(ev.order.id, canceled.id);
    assert_eq!(ev.status, OrderStatus::Canceled);
    shop.close().await;
}
