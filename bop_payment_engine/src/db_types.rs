//! Persisted document types.
//!
//! Products, carts and orders are stored as JSON documents. Field names are camelCase so that SQL JSON functions can
//! address them (e.g. `$.stockReference`, `$.items[*].productId`).
use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    currency::{Currency, CurrencySnapshot, Price},
    pricing::{CartDiscount, DeliveryFeeTable, VatLine},
};

#[derive(Debug, Clone, Error)]
#[error("Could not parse value: {0}")]
pub struct ConversionError(String);

//--------------------------------------     Identifiers     ---------------------------------------------------------
macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new<S: Into<String>>(id: S) -> Self {
                Self(id.into())
            }

            pub fn random() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(ProductId);
string_id!(OrderId);
string_id!(PaymentId);
string_id!(CartId);

//--------------------------------------     CountryCode     ---------------------------------------------------------
/// ISO 3166-1 alpha-2 country code, always stored upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CountryCode(String);

impl CountryCode {
    pub fn new(code: &str) -> Self {
        Self(code.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for CountryCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CountryCode {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

//--------------------------------------   UserIdentifier    ---------------------------------------------------------
/// Identifies the owner of a cart or order. A logged-in user is matched by user id, an anonymous visitor by session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentifier {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub npub: Option<String>,
}

impl UserIdentifier {
    pub fn for_session<S: Into<String>>(session_id: S) -> Self {
        Self { session_id: Some(session_id.into()), ..Default::default() }
    }

    pub fn for_user<S: Into<String>>(user_id: S) -> Self {
        Self { user_id: Some(user_id.into()), ..Default::default() }
    }

    /// Two identifiers refer to the same owner if they share a user id, or if they share a session id.
    pub fn matches(&self, other: &UserIdentifier) -> bool {
        match (&self.user_id, &other.user_id) {
            (Some(a), Some(b)) => a == b,
            _ => matches!((&self.session_id, &other.session_id), (Some(a), Some(b)) if a == b),
        }
    }

    /// A stable key used to find the identifier's cart.
    pub fn cart_key(&self) -> Option<String> {
        self.user_id
            .as_ref()
            .map(|u| format!("user:{u}"))
            .or_else(|| self.session_id.as_ref().map(|s| format!("session:{s}")))
    }
}

impl Display for UserIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.cart_key() {
            Some(k) => write!(f, "{k}"),
            None => write!(f, "anonymous"),
        }
    }
}

//--------------------------------------       Address       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub city: String,
    pub zip: String,
    pub country: CountryCode,
    #[serde(default)]
    pub state: Option<String>,
}

//--------------------------------------       Product       ---------------------------------------------------------
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductStock {
    pub total: i64,
    pub reserved: i64,
    pub available: i64,
}

impl ProductStock {
    pub fn new(total: i64) -> Self {
        Self { total, reserved: 0, available: total }
    }

    pub fn with_reserved(&self, reserved: i64) -> Self {
        Self { total: self.total, reserved, available: (self.total - reserved).max(0) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingSpec {
    /// The length of a billable slot, in minutes.
    pub slot_minutes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Booking {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSpec {
    pub duration_days: u32,
    /// Discount applied to every product while the subscription is active.
    #[serde(default)]
    pub whole_catalog_discount: Option<Decimal>,
    /// Discounts for specific products while the subscription is active.
    #[serde(default)]
    pub product_discounts: BTreeMap<ProductId, Decimal>,
    /// Units of a product the subscriber may order for free.
    #[serde(default)]
    pub free_product_units: BTreeMap<ProductId, u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductAvailability {
    #[serde(default)]
    pub available_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub available_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub hidden: bool,
}

impl ProductAvailability {
    pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        !self.hidden &&
            self.available_from.map_or(true, |from| now >= from) &&
            self.available_until.map_or(true, |until| now < until)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Price,
    #[serde(default)]
    pub stock: Option<ProductStock>,
    /// Another product whose stock this product consumes.
    #[serde(default)]
    pub stock_reference: Option<ProductId>,
    #[serde(default)]
    pub shipping: bool,
    #[serde(default)]
    pub vat_profile_id: Option<String>,
    #[serde(default)]
    pub booking: Option<BookingSpec>,
    #[serde(default)]
    pub ticket: bool,
    #[serde(default)]
    pub subscription: Option<SubscriptionSpec>,
    #[serde(default)]
    pub availability: ProductAvailability,
    /// Restricts the payment methods allowed for orders containing this product.
    #[serde(default)]
    pub payment_methods: Option<Vec<PaymentMethodKind>>,
    /// Product specific delivery fees, used in per-item delivery mode.
    #[serde(default)]
    pub delivery_fees: Option<DeliveryFeeTable>,
    #[serde(default)]
    pub allow_custom_price: bool,
}

impl Product {
    pub fn new<S: Into<String>>(id: S, name: S, price: Price) -> Self {
        Self {
            id: ProductId::new(id),
            name: name.into(),
            price,
            stock: None,
            stock_reference: None,
            shipping: false,
            vat_profile_id: None,
            booking: None,
            ticket: false,
            subscription: None,
            availability: ProductAvailability::default(),
            payment_methods: None,
            delivery_fees: None,
            allow_custom_price: false,
        }
    }

    pub fn with_stock(mut self, total: i64) -> Self {
        self.stock = Some(ProductStock::new(total));
        self
    }

    pub fn with_stock_reference(mut self, reference: ProductId) -> Self {
        self.stock_reference = Some(reference);
        self
    }

    pub fn with_shipping(mut self) -> Self {
        self.shipping = true;
        self
    }

    /// The product that owns the stock for this product.
    pub fn stock_owner(&self) -> &ProductId {
        self.stock_reference.as_ref().unwrap_or(&self.id)
    }

    pub fn accepts_payment_method(&self, kind: PaymentMethodKind) -> bool {
        self.payment_methods.as_ref().map_or(true, |allowed| allowed.contains(&kind))
    }
}

//--------------------------------------        Cart         ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub id: String,
    pub product_id: ProductId,
    pub quantity: u32,
    #[serde(default)]
    pub booking: Option<Booking>,
    #[serde(default)]
    pub custom_price: Option<Price>,
    /// The line holds stock until this time.
    #[serde(default)]
    pub reserved_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deposit_percentage: Option<Decimal>,
    #[serde(default)]
    pub discount_percentage: Option<Decimal>,
    #[serde(default)]
    pub chosen_variations: BTreeMap<String, String>,
}

impl CartItem {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            product_id,
            quantity,
            booking: None,
            custom_price: None,
            reserved_until: None,
            deposit_percentage: None,
            discount_percentage: None,
            chosen_variations: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub id: CartId,
    pub user: UserIdentifier,
    pub items: Vec<CartItem>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn new(user: UserIdentifier, now: DateTime<Utc>) -> Self {
        Self { id: CartId::random(), user, items: Vec::new(), updated_at: now }
    }
}

//--------------------------------------    PaymentMethod    ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BitcoinProcessor {
    Bitcoind,
    Nodeless,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LightningProcessor {
    Lnd,
    Phoenixd,
    SwissBitcoinPay,
    BtcpayServer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CardProcessor {
    Stripe,
    Sumup,
}

/// How a payment is made, together with the processor that handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "processor", rename_all = "kebab-case")]
pub enum PaymentMethod {
    Bitcoin(BitcoinProcessor),
    Lightning(LightningProcessor),
    Card(CardProcessor),
    Paypal,
    BankTransfer,
    PointOfSale {
        #[serde(default, rename = "tapToPay")]
        tap_to_pay: Option<CardProcessor>,
    },
    Free,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentMethodKind {
    Bitcoin,
    Lightning,
    Card,
    Paypal,
    BankTransfer,
    PointOfSale,
    Free,
}

impl PaymentMethod {
    pub fn kind(&self) -> PaymentMethodKind {
        match self {
            PaymentMethod::Bitcoin(_) => PaymentMethodKind::Bitcoin,
            PaymentMethod::Lightning(_) => PaymentMethodKind::Lightning,
            PaymentMethod::Card(_) => PaymentMethodKind::Card,
            PaymentMethod::Paypal => PaymentMethodKind::Paypal,
            PaymentMethod::BankTransfer => PaymentMethodKind::BankTransfer,
            PaymentMethod::PointOfSale { .. } => PaymentMethodKind::PointOfSale,
            PaymentMethod::Free => PaymentMethodKind::Free,
        }
    }

    /// Payments that are only ever confirmed by an operator.
    pub fn is_manual(&self) -> bool {
        matches!(self, PaymentMethod::BankTransfer | PaymentMethod::PointOfSale { tap_to_pay: None })
    }
}

impl Display for PaymentMethodKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentMethodKind::Bitcoin => "bitcoin",
            PaymentMethodKind::Lightning => "lightning",
            PaymentMethodKind::Card => "card",
            PaymentMethodKind::Paypal => "paypal",
            PaymentMethodKind::BankTransfer => "bank-transfer",
            PaymentMethodKind::PointOfSale => "point-of-sale",
            PaymentMethodKind::Free => "free",
        };
        write!(f, "{s}")
    }
}

impl Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentMethod::Bitcoin(p) => write!(f, "bitcoin ({p:?})"),
            PaymentMethod::Lightning(p) => write!(f, "lightning ({p:?})"),
            PaymentMethod::Card(p) => write!(f, "card ({p:?})"),
            PaymentMethod::PointOfSale { tap_to_pay: Some(p) } => write!(f, "point-of-sale (tap-to-pay {p:?})"),
            other => write!(f, "{}", other.kind()),
        }
    }
}

//--------------------------------------    PaymentStatus    ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Expired,
    Canceled,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// Terminal, and not paid.
    pub fn is_unsuccessful(&self) -> bool {
        matches!(self, PaymentStatus::Expired | PaymentStatus::Canceled | PaymentStatus::Failed)
    }
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Expired => "expired",
            PaymentStatus::Canceled => "canceled",
            PaymentStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for PaymentStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "expired" => Ok(Self::Expired),
            "canceled" => Ok(Self::Canceled),
            "failed" => Ok(Self::Failed),
            s => Err(ConversionError(format!("Invalid payment status: {s}"))),
        }
    }
}

//--------------------------------------     OrderStatus     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Canceled,
    Expired,
    Failed,
}

impl OrderStatus {
    /// The order status that results from its last open payment ending with `status`.
    pub fn from_payment_failure(status: PaymentStatus) -> Self {
        match status {
            PaymentStatus::Expired => OrderStatus::Expired,
            PaymentStatus::Canceled => OrderStatus::Canceled,
            _ => OrderStatus::Failed,
        }
    }
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Expired => "expired",
            OrderStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for OrderStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "canceled" => Ok(Self::Canceled),
            "expired" => Ok(Self::Expired),
            "failed" => Ok(Self::Failed),
            s => Err(ConversionError(format!("Invalid order status: {s}"))),
        }
    }
}

//--------------------------------------    OrderPayment     ---------------------------------------------------------
/// What the customer uses to pay: an on-chain address, an invoice, a hosted checkout page or a card terminal session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PaymentHandle {
    Address { address: String },
    #[serde(rename_all = "camelCase")]
    Invoice { invoice_id: String, payment_request: String },
    #[serde(rename_all = "camelCase")]
    Checkout { checkout_id: String, url: Option<String> },
    #[serde(rename_all = "camelCase")]
    TapToPay { started_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTransaction {
    pub id: String,
    pub amount: Price,
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub number: i64,
    pub created_at: DateTime<Utc>,
}

/// The amounts of a payment, each captured in the same currency roles as its order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCurrencySnapshot {
    pub price: CurrencySnapshot,
    #[serde(default)]
    pub previously_paid: Option<CurrencySnapshot>,
    #[serde(default)]
    pub remaining_to_pay: Option<CurrencySnapshot>,
    #[serde(default)]
    pub received: Option<CurrencySnapshot>,
    #[serde(default)]
    pub fees: Option<CurrencySnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayment {
    pub id: PaymentId,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    /// The amount requested, in the settlement currency of the method.
    pub price: Price,
    pub currency_snapshot: PaymentCurrencySnapshot,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub handle: Option<PaymentHandle>,
    #[serde(default)]
    pub transactions: Vec<PaymentTransaction>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub invoice: Option<Invoice>,
    #[serde(default)]
    pub received: Option<Price>,
    #[serde(default)]
    pub fees: Option<Price>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl OrderPayment {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |t| t < now)
    }
}

//--------------------------------------        Order        ---------------------------------------------------------
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemCurrencySnapshot {
    pub price: CurrencySnapshot,
    pub vat: CurrencySnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    /// The product as it was when the order was placed.
    pub product: Product,
    pub quantity: u32,
    #[serde(default)]
    pub booking: Option<Booking>,
    #[serde(default)]
    pub custom_price: Option<Price>,
    #[serde(default)]
    pub deposit_percentage: Option<Decimal>,
    #[serde(default)]
    pub discount_percentage: Option<Decimal>,
    #[serde(default)]
    pub chosen_variations: BTreeMap<String, String>,
    pub vat_rate: Decimal,
    #[serde(default)]
    pub free_quantity: Decimal,
    pub currency_snapshot: OrderItemCurrencySnapshot,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCurrencySnapshot {
    /// The full amount owed, VAT included.
    pub total_price: CurrencySnapshot,
    pub total_vat: CurrencySnapshot,
    /// The amount owed up front when items take a deposit.
    pub partial_price: CurrencySnapshot,
    #[serde(default)]
    pub discount: Option<CurrencySnapshot>,
    #[serde(default)]
    pub delivery_fees: Option<CurrencySnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderNotifications {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub npub: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub number: i64,
    /// Incremented on every write. Writes are conditional on the version read.
    pub version: i64,
    pub status: OrderStatus,
    pub user: UserIdentifier,
    pub items: Vec<OrderItem>,
    pub payments: Vec<OrderPayment>,
    pub currency_snapshot: OrderCurrencySnapshot,
    pub vat: Vec<VatLine>,
    #[serde(default)]
    pub vat_exempted: bool,
    #[serde(default)]
    pub discount: Option<CartDiscount>,
    #[serde(default)]
    pub shipping_address: Option<Address>,
    #[serde(default)]
    pub billing_address: Option<Address>,
    #[serde(default)]
    pub notifications: OrderNotifications,
    /// When set, the order stays pending after every payment attempt fails, so that a new payment can be added.
    #[serde(default)]
    pub keep_pending_on_payment_failure: bool,
    #[serde(default)]
    pub cart_id: Option<CartId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn payment(&self, id: &PaymentId) -> Option<&OrderPayment> {
        self.payments.iter().find(|p| &p.id == id)
    }

    pub fn main_currency(&self) -> Option<Currency> {
        self.currency_snapshot.total_price.main().map(|p| p.currency)
    }

    pub fn pending_payments(&self) -> impl Iterator<Item = &OrderPayment> {
        self.payments.iter().filter(|p| p.status == PaymentStatus::Pending)
    }
}

//--------------------------------------   Fulfilment data   ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaidSubscription {
    pub id: String,
    pub number: i64,
    pub user: UserIdentifier,
    pub product_id: ProductId,
    pub paid_until: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaidSubscription {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.paid_until > now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChallengeMode {
    /// Progress counts units sold.
    TotalProducts,
    /// Progress counts money raised, in the order's main currency.
    MoneyAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: String,
    pub name: String,
    pub mode: ChallengeMode,
    pub goal: Decimal,
    pub progress: Decimal,
    pub product_ids: Vec<ProductId>,
    pub begins_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub product_id: ProductId,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leaderboard {
    pub id: String,
    pub name: String,
    pub mode: ChallengeMode,
    pub product_ids: Vec<ProductId>,
    pub progress: Vec<LeaderboardEntry>,
    pub begins_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub ticket_id: String,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
    pub to: String,
    pub template: String,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

impl EmailMessage {
    pub fn new<S: Into<String>>(to: S, template: S) -> Self {
        Self { to: to.into(), template: template.into(), vars: BTreeMap::new() }
    }

    pub fn with_var<K: Into<String>, V: Display>(mut self, key: K, value: V) -> Self {
        self.vars.insert(key.into(), value.to_string());
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn payment_method_serialization() {
        let m = PaymentMethod::Lightning(LightningProcessor::SwissBitcoinPay);
        let json = serde_json::to_value(m).unwrap();
        assert_eq!(json["method"], "lightning");
        assert_eq!(json["processor"], "swiss-bitcoin-pay");
        let m = PaymentMethod::PointOfSale { tap_to_pay: Some(CardProcessor::Sumup) };
        let json = serde_json::to_string(&m).unwrap();
        let back: PaymentMethod = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
        let m: PaymentMethod = serde_json::from_str(r#"{"method":"bank-transfer"}"#).unwrap();
        assert_eq!(m, PaymentMethod::BankTransfer);
    }

    #[test]
    fn manual_methods() {
        assert!(PaymentMethod::BankTransfer.is_manual());
        assert!(PaymentMethod::PointOfSale { tap_to_pay: None }.is_manual());
        assert!(!PaymentMethod::PointOfSale { tap_to_pay: Some(CardProcessor::Stripe) }.is_manual());
        assert!(!PaymentMethod::Card(CardProcessor::Stripe).is_manual());
    }

    #[test]
    fn user_identifier_matching() {
        let a = UserIdentifier::for_session("s1");
        let b = UserIdentifier::for_session("s1");
        let c = UserIdentifier::for_session("s2");
        assert!(a.matches(&b));
        assert!(!a.matches(&c));
        let u1 = UserIdentifier { user_id: Some("u".into()), session_id: Some("s1".into()), ..Default::default() };
        let u2 = UserIdentifier { user_id: Some("v".into()), session_id: Some("s1".into()), ..Default::default() };
        assert!(!u1.matches(&u2));
        assert!(u1.matches(&a));
        assert_eq!(UserIdentifier::default().cart_key(), None);
    }

    #[test]
    fn statuses_round_trip_through_strings() {
        for s in ["pending", "paid", "expired", "canceled", "failed"] {
            assert_eq!(s.parse::<PaymentStatus>().unwrap().to_string(), s);
            assert_eq!(s.parse::<OrderStatus>().unwrap().to_string(), s);
        }
        assert!("cancelled".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn availability_window() {
        let now = Utc::now();
        let a = ProductAvailability { available_from: Some(now - Duration::hours(1)), ..Default::default() };
        assert!(a.is_available_at(now));
        let a = ProductAvailability { available_until: Some(now), ..Default::default() };
        assert!(!a.is_available_at(now));
        let a = ProductAvailability { hidden: true, ..Default::default() };
        assert!(!a.is_available_at(now));
    }

    #[test]
    fn stock_with_reserved_never_goes_negative() {
        let s = ProductStock::new(3).with_reserved(5);
        assert_eq!(s.available, 0);
        assert_eq!(s.reserved, 5);
    }
}
