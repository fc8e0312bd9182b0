use std::str::FromStr;

use bop_payment_engine::{
    bpe_api::order_objects::{AddPaymentOptions, CreateOrderParams, OrderUpdate},
    currency::{Currency, CurrencyRole},
    db_types::{CartItem, OrderStatus, PaymentMethod, PaymentStatus, ProductId},
    orders::OrderError,
    test_utils::fixtures::{address, eur},
    CartLineOptions,
    FulfilmentManagement,
    OrderManagement,
    PaymentGatewayDatabase,
    PaymentGatewayError,
};
use rust_decimal::Decimal;
use support::{alice, bob, Shop};

mod support;

fn shipped_to_france() -> CreateOrderParams {
    CreateOrderParams::default().with_shipping_address(address("FR")).with_payment_method(PaymentMethod::BankTransfer)
}

#[tokio::test]
async fn checkout_snapshots_the_order_in_every_role() {
    let shop = Shop::open().await;
    shop.carts.add_to_cart(&alice(), &"tshirt".into(), 1, CartLineOptions::default()).await.unwrap();
    let order = shop.orders.create_order(&alice(), shipped_to_france()).await.unwrap();

    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.number, 1);
    let total = &order.currency_snapshot.total_price;
    assert_eq!(total.get(CurrencyRole::Main).unwrap(), &eur(120));
    assert_eq!(total.get(CurrencyRole::Accounting).unwrap().amount, Decimal::from(400_000));
    assert_eq!(total.get(CurrencyRole::Accounting).unwrap().currency, Currency::Sat);
    assert_eq!(order.currency_snapshot.total_vat.main().unwrap(), &eur(20));
    assert_eq!(order.vat.len(), 1);
    assert_eq!(order.vat[0].rate, Decimal::from(20));
    assert_eq!(order.items[0].currency_snapshot.price.main().unwrap(), &eur(100));

    assert_eq!(order.payments.len(), 1);
    let payment = &order.payments[0];
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.price, eur(120));
    assert!(payment.expires_at.is_none());
    assert!(payment.handle.is_none());

    assert!(shop.carts.fetch_cart(&alice()).await.unwrap().is_none(), "The cart is consumed by the order");
    let stock = shop.product("tshirt").await.stock.unwrap();
    assert_eq!((stock.total, stock.reserved, stock.available), (10, 1, 9));
    shop.close().await;
}

#[tokio::test]
async fn manual_confirmation_pays_the_order() {
    let shop = Shop::open().await;
    shop.carts.add_to_cart(&alice(), &"tshirt".into(), 2, CartLineOptions::default()).await.unwrap();
    let order = shop.orders.create_order(&alice(), shipped_to_france()).await.unwrap();
    let payment_id = order.payments[0].id.clone();

    let paid = shop.orders.confirm_manual_payment(&order.id, &payment_id, None).await.unwrap();
    assert!(paid.order_paid);
    assert_eq!(paid.order.status, OrderStatus::Paid);
    assert_eq!(paid.payment.status, PaymentStatus::Paid);
    assert_eq!(paid.payment.invoice.unwrap().number, 1);
    let remaining = paid.payment.currency_snapshot.remaining_to_pay.as_ref().unwrap();
    assert!(remaining.main().unwrap().is_zero());

    let stored = shop.orders.fetch_order(&order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Paid);
    assert_eq!(stored.version, order.version + 1);

    let stock = shop.product("tshirt").await.stock.unwrap();
    assert_eq!((stock.total, stock.reserved, stock.available), (8, 0, 8));

    let emails = shop.db.fetch_queued_emails().await.unwrap();
    let templates = emails.iter().map(|e| e.template.as_str()).collect::<Vec<_>>();
    assert_eq!(templates, vec!["order.payment.paid", "order.paid"]);
    assert!(emails.iter().all(|e| e.to == "alice@example.com"));
    shop.close().await;
}

#[tokio::test]
async fn deposit_is_requested_first_then_the_rest() {
    let shop = Shop::open().await;
    let options = CartLineOptions { deposit_percentage: Some(Decimal::from(50)), ..Default::default() };
    shop.carts.add_to_cart(&alice(), &"tshirt".into(), 1, options).await.unwrap();
    let order = shop.orders.create_order(&alice(), shipped_to_france()).await.unwrap();
    assert_eq!(order.currency_snapshot.partial_price.main().unwrap(), &eur(60));
    assert_eq!(order.payments[0].price, eur(60));

    let first = shop.orders.confirm_manual_payment(&order.id, &order.payments[0].id, None).await.unwrap();
    assert!(!first.order_paid);
    assert_eq!(first.order.status, OrderStatus::Pending);

    let err = shop
        .orders
        .add_order_payment(&order.id, PaymentMethod::Free, AddPaymentOptions::default())
        .await
        .expect_err("A free payment cannot settle the rest");
    assert!(matches!(err, PaymentGatewayError::FreePaymentForNonZeroTotal));

    let order = shop.orders.add_order_payment(&order.id, PaymentMethod::BankTransfer, AddPaymentOptions::default()).await.unwrap();
    assert_eq!(order.payments.len(), 2);
    assert_eq!(order.payments[1].price, eur(60));

    let err = shop
        .orders
        .add_order_payment(&order.id, PaymentMethod::BankTransfer, AddPaymentOptions::default())
        .await
        .expect_err("The pending payment already covers the order");
    assert!(matches!(err, PaymentGatewayError::OrderError(OrderError::OrderAlreadyCovered(_))));

    let second = shop.orders.confirm_manual_payment(&order.id, &order.payments[1].id, None).await.unwrap();
    assert!(second.order_paid);
    assert_eq!(second.payment.invoice.unwrap().number, 2);
    let previously = second.payment.currency_snapshot.previously_paid.as_ref().unwrap();
    assert_eq!(previously.main().unwrap(), &eur(60));
    shop.close().await;
}

#[tokio::test]
async fn zero_total_orders_are_paid_on_creation() {
    let shop = Shop::open().await;
    let items = vec![CartItem::new("sticker".into(), 3)];
    let order = shop.orders.create_order_from_items(&bob(), items, None, CreateOrderParams::default()).await.unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.payments.len(), 1);
    assert_eq!(order.payments[0].method, PaymentMethod::Free);
    assert_eq!(order.payments[0].status, PaymentStatus::Paid);
    assert!(order.payments[0].invoice.is_some());
    let stored = shop.db.fetch_order_by_number(order.number).await.unwrap().unwrap();
    assert_eq!(stored.id, order.id);
    assert_eq!(stored.status, OrderStatus::Paid);
    assert_eq!(stored.payments[0].invoice, order.payments[0].invoice);
    shop.close().await;
}

#[tokio::test]
async fn free_payment_is_refused_for_a_positive_total() {
    let shop = Shop::open().await;
    let items = vec![CartItem::new("ebook".into(), 1)];
    let params = CreateOrderParams::default().with_payment_method(PaymentMethod::Free);
    let err = shop.orders.create_order_from_items(&bob(), items, None, params).await.unwrap_err();
    assert!(matches!(err, PaymentGatewayError::FreePaymentForNonZeroTotal));
    shop.close().await;
}

#[tokio::test]
async fn checkout_validation_errors() {
    let shop = Shop::open().await;
    let tshirts = |n| vec![CartItem::new(ProductId::from("tshirt"), n)];

    let err = shop.orders.create_order_from_items(&bob(), vec![], None, shipped_to_france()).await.unwrap_err();
    assert!(matches!(err, PaymentGatewayError::EmptyOrder));

    let params = CreateOrderParams::default().with_payment_method(PaymentMethod::BankTransfer);
    let err = shop.orders.create_order_from_items(&bob(), tshirts(1), None, params).await.unwrap_err();
    assert!(matches!(err, PaymentGatewayError::MissingShippingAddress));

    let err = shop.orders.create_order_from_items(&bob(), tshirts(11), None, shipped_to_france()).await.unwrap_err();
    assert!(matches!(err, PaymentGatewayError::OutOfStock { available: 10, .. }));

    let items = vec![CartItem::new("nope".into(), 1)];
    let err = shop.orders.create_order_from_items(&bob(), items, None, shipped_to_france()).await.unwrap_err();
    assert!(matches!(err, PaymentGatewayError::ProductNotFound(_)));

    let params = shipped_to_france().with_discount(bop_payment_engine::pricing::CartDiscount::Percentage(Decimal::from(150)));
    let err = shop.orders.create_order_from_items(&bob(), tshirts(1), None, params).await.unwrap_err();
    assert!(matches!(err, PaymentGatewayError::InvalidDiscount(_)));

    let mut items = tshirts(1);
    items[0].custom_price = Some(eur(1));
    let err = shop.orders.create_order_from_items(&bob(), items, None, shipped_to_france()).await.unwrap_err();
    assert!(matches!(err, PaymentGatewayError::InvalidCustomPrice(_)));
    shop.close().await;
}

#[tokio::test]
async fn cart_discount_reduces_every_figure() {
    let shop = Shop::open().await;
    let items = vec![CartItem::new("tshirt".into(), 1)];
    let params = shipped_to_france()
        .with_discount(bop_payment_engine::pricing::CartDiscount::Percentage(Decimal::from_str("25").unwrap()));
    let order = shop.orders.create_order_from_items(&bob(), items, None, params).await.unwrap();
    assert_eq!(order.currency_snapshot.total_price.main().unwrap(), &eur(90));
    assert_eq!(order.currency_snapshot.discount.as_ref().unwrap().main().unwrap(), &eur(30));
    assert_eq!(order.currency_snapshot.total_vat.main().unwrap(), &eur(15));
    shop.close().await;
}

#[tokio::test]
async fn a_payment_from_another_order_is_an_invariant_violation() {
    let shop = Shop::open().await;
    let ebook = || vec![CartItem::new(ProductId::from("ebook"), 1)];
    let params = || CreateOrderParams::default().with_payment_method(PaymentMethod::BankTransfer);
    let first = shop.orders.create_order_from_items(&alice(), ebook(), None, params()).await.unwrap();
    let second = shop.orders.create_order_from_items(&bob(), ebook(), None, params()).await.unwrap();
    assert_eq!(second.number, first.number + 1);

    let foreign = second.payments[0].id.clone();
    let received = bop_payment_engine::ReceivedPayment::new(eur(12), shop.clock.now());
    let err = shop.orders.on_order_payment(&first, &foreign, received).await.unwrap_err();
    assert!(err.is_invariant_violation());
    let unchanged = shop.orders.fetch_order(&first.id).await.unwrap();
    assert_eq!(unchanged.version, first.version);
    assert_eq!(unchanged.status, OrderStatus::Pending);
    assert!(unchanged.payments.iter().all(|p| p.status == PaymentStatus::Pending));
    shop.close().await;
}

#[tokio::test]
async fn invoice_numbers_follow_payment_order() {
    let shop = Shop::open().await;
    let ebook = || vec![CartItem::new(ProductId::from("ebook"), 1)];
    let params = || CreateOrderParams::default().with_payment_method(PaymentMethod::BankTransfer);
    let first = shop.orders.create_order_from_items(&alice(), ebook(), None, params()).await.unwrap();
    let second = shop.orders.create_order_from_items(&bob(), ebook(), None, params()).await.unwrap();

    let paid_second = shop.orders.confirm_manual_payment(&second.id, &second.payments[0].id, None).await.unwrap();
    let paid_first = shop.orders.confirm_manual_payment(&first.id, &first.payments[0].id, None).await.unwrap();
    assert_eq!(paid_second.payment.invoice.unwrap().number, 1);
    assert_eq!(paid_first.payment.invoice.unwrap().number, 2);
    shop.close().await;
}

#[tokio::test]
async fn cancel_releases_reserved_stock() {
    let shop = Shop::open().await;
    let items = vec![CartItem::new("tshirt".into(), 4)];
    let order = shop.orders.create_order_from_items(&alice(), items, None, shipped_to_france()).await.unwrap();
    assert_eq!(shop.product("tshirt").await.stock.unwrap().available, 6);

    let canceled = shop.orders.cancel_order(&order.id).await.unwrap();
    assert_eq!(canceled.status, OrderStatus::Canceled);
    assert!(canceled.payments.iter().all(|p| p.status == PaymentStatus::Canceled));
    let stock = shop.product("tshirt").await.stock.unwrap();
    assert_eq!((stock.total, stock.reserved, stock.available), (10, 0, 10));

    let err = shop.orders.cancel_order(&order.id).await.unwrap_err();
    assert!(matches!(err, PaymentGatewayError::OrderError(OrderError::OrderNotPending { .. })));
    shop.close().await;
}

#[tokio::test]
async fn stale_writes_are_rejected() {
    let shop = Shop::open().await;
    let items = vec![CartItem::new("ebook".into(), 1)];
    let order = shop.orders.create_order_from_items(&alice(), items, None, CreateOrderParams::default()).await.unwrap();
    assert!(order.payments.is_empty());
    let updated = shop.orders.add_order_payment(&order.id, PaymentMethod::BankTransfer, AddPaymentOptions::default()).await.unwrap();
    assert_eq!(updated.version, 1);

    let err = shop.db.update_order(OrderUpdate::new(order.version, order.clone())).await.unwrap_err();
    assert!(matches!(err, PaymentGatewayError::StaleOrder(_)));
    let stored = shop.orders.fetch_order(&order.id).await.unwrap();
    assert_eq!(stored.payments.len(), 1);
    shop.close().await;
}

#[tokio::test]
async fn failed_payments_end_the_order_unless_it_stays_pending() {
    let shop = Shop::open().await;
    let ebook = || vec![CartItem::new(ProductId::from("ebook"), 1)];
    let order = shop
        .orders
        .create_order_from_items(&alice(), ebook(), None, CreateOrderParams::default().with_payment_method(PaymentMethod::BankTransfer))
        .await
        .unwrap();
    let failed = shop
        .orders
        .on_order_payment_failed(&order, &order.payments[0].id, PaymentStatus::Expired, None)
        .await
        .unwrap();
    assert_eq!(failed.status, OrderStatus::Expired);
    let emails = shop.db.fetch_queued_emails().await.unwrap();
    assert_eq!(emails.last().unwrap().template, "order.payment.expired");

    let params = CreateOrderParams {
        keep_pending_on_payment_failure: true,
        ..CreateOrderParams::default().with_payment_method(PaymentMethod::BankTransfer)
    };
    let order = shop.orders.create_order_from_items(&bob(), ebook(), None, params).await.unwrap();
    let failed = shop
        .orders
        .on_order_payment_failed(&order, &order.payments[0].id, PaymentStatus::Failed, Some("declined".into()))
        .await
        .unwrap();
    assert_eq!(failed.status, OrderStatus::Pending);
    assert_eq!(failed.payments[0].failure_reason.as_deref(), Some("declined"));
    let retried = shop.orders.add_order_payment(&order.id, PaymentMethod::BankTransfer, AddPaymentOptions::default()).await.unwrap();
    assert_eq!(retried.payments.len(), 2);
    shop.close().await;
}

#[tokio::test]
async fn only_manual_payments_can_be_confirmed_by_hand() {
    let shop = Shop::open().await;
    let items = vec![CartItem::new("ebook".into(), 1)];
    let params = CreateOrderParams::default()
        .with_payment_method(PaymentMethod::Lightning(bop_payment_engine::db_types::LightningProcessor::Lnd));
    let order = shop.orders.create_order_from_items(&alice(), items, None, params).await.unwrap();
    assert!(order.payments[0].expires_at.is_some());
    assert_eq!(order.payments[0].price.currency, Currency::Sat);
    assert_eq!(order.payments[0].price.amount, Decimal::from(40_000));
    let err = shop.orders.confirm_manual_payment(&order.id, &order.payments[0].id, None).await.unwrap_err();
    assert!(matches!(err, PaymentGatewayError::NotManualPayment(_)));
    shop.close().await;
}
