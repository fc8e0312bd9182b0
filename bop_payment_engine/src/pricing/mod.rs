//! # Pricing
//!
//! Turns a list of cart lines into the amounts an order owes: net price, VAT broken down by rate and country, the
//! deposit ("partial") amounts, delivery fees and the cart discount.
//!
//! All arithmetic is done on exact satoshi [`Decimal`]s. The totals in [`PriceInfo`] are rounded to whole satoshis
//! once, at the end.
mod delivery;
mod vat;

use std::collections::BTreeMap;

use bop_common::Sats;
pub use delivery::{compute_delivery_fees, DeliveryFee, DeliveryFeeConfig, DeliveryFeeMode, DeliveryFeeTable};
use log::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
pub use vat::{reduce_vat_lines, VatConfig, VatLine, VatProfile};

use crate::{
    currency::{fix_storage_rounding, Currency, CurrencyConverter, CurrencyError, Price},
    db_types::{Booking, CartItem, CountryCode, Product, ProductId},
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("{0}")]
    Currency(#[from] CurrencyError),
    #[error("No delivery fee is configured for destination {0}")]
    NoDeliveryFee(CountryCode),
    #[error("Booked product {0} must be ordered with a quantity of exactly one")]
    BookingQuantity(ProductId),
    #[error("Invalid booking for product {0}")]
    InvalidBooking(ProductId),
    #[error("Amount cannot be represented in sats: {0}")]
    SatsOverflow(String),
}

/// A discount on the whole cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum CartDiscount {
    /// Percentage of the VAT-inclusive total.
    Percentage(Decimal),
    /// Fixed amount off the VAT-inclusive total.
    Amount(Price),
}

impl CartDiscount {
    pub fn is_valid(&self) -> bool {
        match self {
            CartDiscount::Percentage(p) => *p >= Decimal::ZERO && *p <= Decimal::ONE_HUNDRED,
            CartDiscount::Amount(p) => p.amount >= Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PricingItem<'a> {
    pub product: &'a Product,
    pub quantity: u32,
    pub booking: Option<Booking>,
    pub custom_price: Option<Price>,
    pub deposit_percentage: Option<Decimal>,
    pub discount_percentage: Option<Decimal>,
}

impl<'a> PricingItem<'a> {
    pub fn new(product: &'a Product, quantity: u32) -> Self {
        Self { product, quantity, booking: None, custom_price: None, deposit_percentage: None, discount_percentage: None }
    }

    pub fn from_cart_item(product: &'a Product, item: &CartItem) -> Self {
        Self {
            product,
            quantity: item.quantity,
            booking: item.booking,
            custom_price: item.custom_price,
            deposit_percentage: item.deposit_percentage,
            discount_percentage: item.discount_percentage,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PricingParams<'a> {
    pub vat: &'a VatConfig,
    /// The buyer's country, usually taken from the shipping address.
    pub buyer_country: Option<CountryCode>,
    pub vat_exempted: bool,
    pub discount: Option<CartDiscount>,
    /// Units the buyer may take for free, per product. Consumed in line order.
    pub free_product_units: BTreeMap<ProductId, Decimal>,
    pub delivery: Option<&'a DeliveryFeeConfig>,
    /// The currency VAT lines are merged into when their currencies differ.
    pub vat_currency: Currency,
}

impl<'a> PricingParams<'a> {
    pub fn new(vat: &'a VatConfig) -> Self {
        Self {
            vat,
            buyer_country: None,
            vat_exempted: false,
            discount: None,
            free_product_units: BTreeMap::new(),
            delivery: None,
            vat_currency: Currency::Sat,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemPrice {
    pub product_id: ProductId,
    /// Quantity being billed before free units. For bookings this is the number of slots and may be fractional.
    pub billable_quantity: Decimal,
    pub free_quantity: Decimal,
    pub vat_rate: Decimal,
    /// Net price of the line in the product's currency, at storage precision.
    pub price: Price,
    /// VAT of the line in the product's currency, at storage precision.
    pub vat: Price,
    pub price_sats: Decimal,
    pub vat_sats: Decimal,
}

/// Exact satoshi totals behind the rounded figures of a [`PriceInfo`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExactTotals {
    pub price: Decimal,
    pub vat: Decimal,
    pub partial_price: Decimal,
    pub partial_vat: Decimal,
    pub discount: Decimal,
    pub delivery_fees: Decimal,
}

impl ExactTotals {
    pub fn price_with_vat(&self) -> Decimal {
        self.price + self.vat
    }

    pub fn partial_price_with_vat(&self) -> Decimal {
        self.partial_price + self.partial_vat
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceInfo {
    pub total_price: Sats,
    pub total_vat: Sats,
    pub total_price_with_vat: Sats,
    pub partial_price: Sats,
    pub partial_vat: Sats,
    pub partial_price_with_vat: Sats,
    pub discount: Sats,
    pub delivery_fees: Sats,
    pub vat: Vec<VatLine>,
    pub vat_rates: Vec<Decimal>,
    pub items: Vec<ItemPrice>,
    pub exact: ExactTotals,
}

fn to_sats(value: Decimal) -> Result<Sats, PricingError> {
    Sats::try_from(value).map_err(|e| PricingError::SatsOverflow(e.to_string()))
}

fn clamp_percentage(p: Option<Decimal>, default: Decimal) -> Decimal {
    p.unwrap_or(default).clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
}

fn billable_quantity(item: &PricingItem<'_>) -> Result<Decimal, PricingError> {
    let product_id = &item.product.id;
    match (item.booking, item.product.booking) {
        (None, None) => Ok(Decimal::from(item.quantity)),
        (Some(booking), Some(slots)) => {
            if item.quantity != 1 {
                return Err(PricingError::BookingQuantity(product_id.clone()));
            }
            let minutes = booking.duration().num_minutes();
            if minutes <= 0 || slots.slot_minutes == 0 {
                return Err(PricingError::InvalidBooking(product_id.clone()));
            }
            Ok(Decimal::from(minutes) / Decimal::from(slots.slot_minutes))
        },
        _ => Err(PricingError::InvalidBooking(product_id.clone())),
    }
}

/// Computes the totals and VAT breakdown for `items`.
pub fn compute_price_info(
    items: &[PricingItem<'_>],
    params: &PricingParams<'_>,
    converter: &CurrencyConverter,
) -> Result<PriceInfo, PricingError> {
    let hundred = Decimal::ONE_HUNDRED;
    let country = params.vat.vat_country(params.buyer_country.as_ref());
    let mut free_units = params.free_product_units.clone();
    let mut exact = ExactTotals::default();
    let mut vat_lines = Vec::with_capacity(items.len() + 1);
    let mut item_prices = Vec::with_capacity(items.len());

    for item in items {
        let product = item.product;
        let billable = billable_quantity(item)?;
        let free = match free_units.get_mut(&product.id) {
            Some(pool) => {
                let used = (*pool).min(billable).max(Decimal::ZERO);
                *pool -= used;
                used
            },
            None => Decimal::ZERO,
        };
        let unit_price = item.custom_price.unwrap_or(product.price);
        let discount = clamp_percentage(item.discount_percentage, Decimal::ZERO);
        let deposit = clamp_percentage(item.deposit_percentage, hundred);
        let line = unit_price.amount * (billable - free) * (hundred - discount) / hundred;
        let rate = params.vat.rate_for(product, &country, params.buyer_country.as_ref(), params.vat_exempted);
        let line_vat = line * rate / hundred;

        let price_sats = converter.to_sats_exact(line, unit_price.currency)?;
        let vat_sats = converter.to_sats_exact(line_vat, unit_price.currency)?;
        exact.price += price_sats;
        exact.vat += vat_sats;
        exact.partial_price += price_sats * deposit / hundred;
        exact.partial_vat += vat_sats * deposit / hundred;

        let vat_price = Price::new(fix_storage_rounding(line_vat, unit_price.currency), unit_price.currency);
        if !vat_price.amount.is_zero() {
            vat_lines.push(VatLine { price: vat_price, rate, country: country.clone() });
        }
        item_prices.push(ItemPrice {
            product_id: product.id.clone(),
            billable_quantity: billable,
            free_quantity: free,
            vat_rate: rate,
            price: Price::new(fix_storage_rounding(line, unit_price.currency), unit_price.currency),
            vat: vat_price,
            price_sats,
            vat_sats,
        });
    }

    if let Some(delivery) = params.delivery {
        let shipped = items.iter().map(|i| (i.product, i.quantity)).collect::<Vec<_>>();
        let fees = compute_delivery_fees(&shipped, &country, delivery, converter)?;
        if !fees.is_zero() {
            let rate =
                params.vat.rate(None, true, &country, params.buyer_country.as_ref(), params.vat_exempted);
            let fees_vat = fees * rate / hundred;
            exact.delivery_fees = fees;
            exact.price += fees;
            exact.vat += fees_vat;
            exact.partial_price += fees;
            exact.partial_vat += fees_vat;
            let price = Price::new(fix_storage_rounding(fees_vat, Currency::Sat), Currency::Sat);
            if !price.amount.is_zero() {
                vat_lines.push(VatLine { price, rate, country: country.clone() });
            }
            trace!("🧾️ Delivery fees to {country}: {fees} sats at {rate}% VAT");
        }
    }

    let mut vat = reduce_vat_lines(vat_lines, converter, params.vat_currency)?;

    let gross = exact.price_with_vat();
    exact.discount = match params.discount {
        None => Decimal::ZERO,
        Some(CartDiscount::Percentage(p)) => gross * p.clamp(Decimal::ZERO, hundred) / hundred,
        Some(CartDiscount::Amount(price)) => {
            converter.to_sats_exact(price.amount, price.currency)?.clamp(Decimal::ZERO, gross)
        },
    };
    if !exact.discount.is_zero() && !gross.is_zero() {
        let ratio = (gross - exact.discount) / gross;
        exact.price *= ratio;
        exact.vat *= ratio;
        exact.partial_price *= ratio;
        exact.partial_vat *= ratio;
        for line in vat.iter_mut() {
            line.price.amount = fix_storage_rounding(line.price.amount * ratio, line.price.currency);
        }
        vat.retain(|line| !line.price.amount.is_zero());
        debug!("🧾️ Cart discount of {} sats applied (ratio {ratio})", exact.discount);
    }

    let mut vat_rates = item_prices.iter().map(|i| i.vat_rate).collect::<Vec<_>>();
    vat_rates.sort();
    vat_rates.dedup();

    // The with-VAT totals are the sum of the rounded parts, never rounded on their own.
    let total_price = to_sats(exact.price)?;
    let total_vat = to_sats(exact.vat)?;
    let partial_price = to_sats(exact.partial_price)?;
    let partial_vat = to_sats(exact.partial_vat)?;

    Ok(PriceInfo {
        total_price,
        total_vat,
        total_price_with_vat: total_price + total_vat,
        partial_price,
        partial_vat,
        partial_price_with_vat: partial_price + partial_vat,
        discount: to_sats(exact.discount)?,
        delivery_fees: to_sats(exact.delivery_fees)?,
        vat,
        vat_rates,
        items: item_prices,
        exact,
    })
}
