use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    currency::{CurrencyConverter, Price},
    db_types::{CountryCode, Product},
    pricing::PricingError,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryFee {
    pub amount: Price,
    /// Charge the fee once per shipped unit instead of once.
    #[serde(default)]
    pub apply_per_item: bool,
}

/// Delivery fees by destination country, with an optional fallback for unlisted countries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryFeeTable {
    #[serde(default)]
    pub default: Option<DeliveryFee>,
    #[serde(default)]
    pub countries: BTreeMap<CountryCode, DeliveryFee>,
}

impl DeliveryFeeTable {
    pub fn lookup(&self, country: &CountryCode) -> Option<&DeliveryFee> {
        self.countries.get(country).or(self.default.as_ref())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryFeeMode {
    /// One fee table for the whole order.
    #[default]
    Flat,
    /// Each product carries its own fee table, falling back to the shop's table.
    PerItem,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryFeeConfig {
    #[serde(default)]
    pub mode: DeliveryFeeMode,
    #[serde(default)]
    pub fees: DeliveryFeeTable,
    /// In per-item mode, only charge the most expensive product fee.
    #[serde(default)]
    pub only_pay_highest: bool,
}

/// Computes the delivery fees for the shipped items in `items`, as an exact amount of satoshis.
///
/// Items that do not ship cost nothing to deliver. If a shipped item has no fee configured for `country`, and there is
/// no fallback, the destination cannot be served and [`PricingError::NoDeliveryFee`] is returned.
pub fn compute_delivery_fees(
    items: &[(&Product, u32)],
    country: &CountryCode,
    config: &DeliveryFeeConfig,
    converter: &CurrencyConverter,
) -> Result<Decimal, PricingError> {
    let shipped = items.iter().filter(|(p, q)| p.shipping && *q > 0).collect::<Vec<_>>();
    if shipped.is_empty() {
        return Ok(Decimal::ZERO);
    }
    let missing = || PricingError::NoDeliveryFee(country.clone());
    match config.mode {
        DeliveryFeeMode::Flat => {
            let fee = config.fees.lookup(country).ok_or_else(missing)?;
            let units = shipped.iter().map(|(_, q)| *q).sum::<u32>();
            let sats = converter.to_sats_exact(fee.amount.amount, fee.amount.currency)?;
            Ok(if fee.apply_per_item { sats * Decimal::from(units) } else { sats })
        },
        DeliveryFeeMode::PerItem => {
            let mut fees = Vec::with_capacity(shipped.len());
            for (product, quantity) in shipped {
                let table = product.delivery_fees.as_ref().unwrap_or(&config.fees);
                let fee = table.lookup(country).or_else(|| config.fees.lookup(country)).ok_or_else(missing)?;
                let sats = converter.to_sats_exact(fee.amount.amount, fee.amount.currency)?;
                let units = if fee.apply_per_item { *quantity } else { 1 };
                fees.push(sats * Decimal::from(units));
            }
            let total = if config.only_pay_highest {
                fees.into_iter().max().unwrap_or(Decimal::ZERO)
            } else {
                fees.into_iter().sum()
            };
            Ok(total)
        },
    }
}
