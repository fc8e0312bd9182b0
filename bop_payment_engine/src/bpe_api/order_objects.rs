use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{Address, CountryCode, EmailMessage, Order, OrderId, OrderStatus, PaymentId, PaymentMethod, UserIdentifier},
    orders::{FulfilmentContext, PaidTransition, PaymentReceipt},
    pricing::CartDiscount,
    traits::PaymentGatewayError,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderQueryFilter {
    pub order_id: Option<OrderId>,
    pub number: Option<i64>,
    /// Matches orders whose user matches this identifier
    pub user: Option<UserIdentifier>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub status: Option<Vec<OrderStatus>>,
}

impl OrderQueryFilter {
    pub fn since<T>(mut self, since: T) -> Result<Self, PaymentGatewayError>
    where
        T: TryInto<DateTime<Utc>>,
        T::Error: Display,
    {
        let dt = since.try_into().map_err(|e| PaymentGatewayError::QueryError(e.to_string()))?;
        self.since = Some(dt);
        Ok(self)
    }

    pub fn until<T>(mut self, until: T) -> Result<Self, PaymentGatewayError>
    where
        T: TryInto<DateTime<Utc>>,
        T::Error: Display,
    {
        let dt = until.try_into().map_err(|e| PaymentGatewayError::QueryError(e.to_string()))?;
        self.until = Some(dt);
        Ok(self)
    }

    pub fn with_order_id(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn with_number(mut self, number: i64) -> Self {
        self.number = Some(number);
        self
    }

    pub fn with_user(mut self, user: UserIdentifier) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status.get_or_insert_with(Vec::new).push(status);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.order_id.is_none() &&
            self.number.is_none() &&
            self.user.is_none() &&
            self.status.is_none() &&
            self.since.is_none() &&
            self.until.is_none()
    }
}

impl Display for OrderQueryFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            write!(f, "No filters.")?;
            return Ok(());
        }
        if let Some(order_id) = &self.order_id {
            write!(f, "order_id: {order_id}. ")?;
        }
        if let Some(number) = &self.number {
            write!(f, "number: {number}. ")?;
        }
        if let Some(user) = &self.user {
            write!(f, "user: {}. ", user.cart_key().unwrap_or_default())?;
        }
        if let Some(since) = &self.since {
            write!(f, "since {since}. ")?;
        }
        if let Some(until) = &self.until {
            write!(f, "until {until}. ")?;
        }
        if let Some(statuses) = &self.status {
            let statuses = statuses.iter().map(|s| s.to_string()).collect::<Vec<String>>().join(",");
            write!(f, "statuses: [{statuses}]. ")?;
        }
        Ok(())
    }
}

/// An order ready to be stored. The order number is assigned by the backend.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order: Order,
    /// Set for orders that are settled on creation (free orders). The payment must be part of the order.
    pub auto_payment: Option<(PaymentId, PaymentReceipt)>,
    pub ctx: FulfilmentContext,
}

impl NewOrder {
    pub fn new(order: Order, ctx: FulfilmentContext) -> Self {
        Self { order, auto_payment: None, ctx }
    }

    pub fn paid_on_creation(mut self, payment_id: PaymentId, receipt: PaymentReceipt) -> Self {
        self.auto_payment = Some((payment_id, receipt));
        self
    }
}

#[derive(Debug, Clone)]
pub struct InsertedOrder {
    pub order: Order,
    /// The paid transition, for orders settled on creation.
    pub paid: Option<PaidTransition>,
}

/// A compare-and-swap write of an order.
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    /// The version the caller read. The write fails if the stored order has moved on.
    pub expected_version: i64,
    pub order: Order,
    /// Emails queued in the same transaction as the write.
    pub emails: Vec<EmailMessage>,
}

impl OrderUpdate {
    pub fn new(expected_version: i64, order: Order) -> Self {
        Self { expected_version, order, emails: vec![] }
    }

    pub fn with_emails(mut self, emails: Vec<EmailMessage>) -> Self {
        self.emails = emails;
        self
    }
}

/// Everything the buyer chose at checkout, apart from the cart lines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateOrderParams {
    pub payment_method: Option<PaymentMethod>,
    pub shipping_address: Option<Address>,
    pub billing_address: Option<Address>,
    /// Used for VAT and delivery fees when there is no shipping address.
    pub buyer_country: Option<CountryCode>,
    pub vat_exempted: bool,
    pub discount: Option<CartDiscount>,
    pub notification_email: Option<String>,
    pub notification_npub: Option<String>,
    /// Keep the order pending when every payment fails, so that the buyer can try again.
    pub keep_pending_on_payment_failure: bool,
}

impl CreateOrderParams {
    pub fn with_payment_method(mut self, method: PaymentMethod) -> Self {
        self.payment_method = Some(method);
        self
    }

    pub fn with_shipping_address(mut self, address: Address) -> Self {
        self.shipping_address = Some(address);
        self
    }

    pub fn with_billing_address(mut self, address: Address) -> Self {
        self.billing_address = Some(address);
        self
    }

    pub fn with_discount(mut self, discount: CartDiscount) -> Self {
        self.discount = Some(discount);
        self
    }

    pub fn with_notification_email<S: Into<String>>(mut self, email: S) -> Self {
        self.notification_email = Some(email.into());
        self
    }

    /// The country used for VAT and delivery: the shipping address's country, else the declared buyer country.
    pub fn country(&self) -> Option<&CountryCode> {
        self.shipping_address.as_ref().map(|a| &a.country).or(self.buyer_country.as_ref())
    }
}

/// Options for a new payment attempt on an existing order.
#[derive(Debug, Clone, Default)]
pub struct AddPaymentOptions {
    /// The amount to request, in the order's main currency. Defaults to the first payment's deposit amount, or to
    /// everything still owed. Never more than what is owed.
    pub amount: Option<rust_decimal::Decimal>,
}
