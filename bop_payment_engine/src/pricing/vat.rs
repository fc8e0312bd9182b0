use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    currency::{fix_storage_rounding, Currency, CurrencyConverter, CurrencyError, Price},
    db_types::{CountryCode, Product},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VatProfile {
    pub name: String,
    pub rates: BTreeMap<CountryCode, Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VatConfig {
    pub seller_country: CountryCode,
    /// The seller does not charge VAT at all.
    #[serde(default)]
    pub exempted: bool,
    /// Shipped goods leaving the seller's country are not charged VAT.
    #[serde(default)]
    pub null_outside_seller_country: bool,
    /// Always charge the seller's country rate, whatever the buyer's country.
    #[serde(default)]
    pub single_country: bool,
    /// Default rate per country, in percent.
    #[serde(default)]
    pub rates: BTreeMap<CountryCode, Decimal>,
    #[serde(default)]
    pub profiles: BTreeMap<String, VatProfile>,
}

impl Default for VatConfig {
    fn default() -> Self {
        Self {
            seller_country: CountryCode::new("FR"),
            exempted: false,
            null_outside_seller_country: false,
            single_country: false,
            rates: BTreeMap::new(),
            profiles: BTreeMap::new(),
        }
    }
}

impl VatConfig {
    /// The country whose VAT applies to a buyer in `buyer_country`.
    pub fn vat_country(&self, buyer_country: Option<&CountryCode>) -> CountryCode {
        match buyer_country {
            Some(c) if !self.single_country => c.clone(),
            _ => self.seller_country.clone(),
        }
    }

    /// The rate applying to `product` when sold to a buyer in `buyer_country`, with `country` the VAT country
    /// returned by [`VatConfig::vat_country`].
    ///
    /// The product's VAT profile takes precedence over the country default. Shipped goods sold to a buyer outside the
    /// seller's country are zero-rated when `null_outside_seller_country` is set, in single-country mode too.
    pub fn rate_for(
        &self,
        product: &Product,
        country: &CountryCode,
        buyer_country: Option<&CountryCode>,
        vat_exempted: bool,
    ) -> Decimal {
        self.rate(product.vat_profile_id.as_deref(), product.shipping, country, buyer_country, vat_exempted)
    }

    pub fn rate(
        &self,
        profile: Option<&str>,
        shipping: bool,
        country: &CountryCode,
        buyer_country: Option<&CountryCode>,
        vat_exempted: bool,
    ) -> Decimal {
        if self.exempted || vat_exempted {
            return Decimal::ZERO;
        }
        if shipping && self.null_outside_seller_country && self.is_cross_border(buyer_country) {
            return Decimal::ZERO;
        }
        profile
            .and_then(|id| self.profiles.get(id))
            .and_then(|p| p.rates.get(country))
            .or_else(|| self.rates.get(country))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// A buyer with no known country is treated as local.
    fn is_cross_border(&self, buyer_country: Option<&CountryCode>) -> bool {
        buyer_country.is_some_and(|c| c != &self.seller_country)
    }
}

/// One line of the VAT breakdown: the VAT owed at `rate` for `country`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VatLine {
    pub price: Price,
    pub rate: Decimal,
    pub country: CountryCode,
}

/// Merges VAT lines sharing the same rate and country, sorted by ascending rate.
///
/// Lines in the same currency are added directly. When the currencies differ, the merged amount is expressed in
/// `target`, converted through satoshis. Amounts are kept at storage precision.
pub fn reduce_vat_lines(
    lines: Vec<VatLine>,
    converter: &CurrencyConverter,
    target: Currency,
) -> Result<Vec<VatLine>, CurrencyError> {
    let mut merged: Vec<VatLine> = Vec::new();
    for line in lines {
        match merged.iter_mut().find(|m| m.rate == line.rate && m.country == line.country) {
            Some(existing) if existing.price.currency == line.price.currency => {
                existing.price.amount += line.price.amount;
            },
            Some(existing) => {
                let sats = converter.sum_sats_exact([&existing.price, &line.price])?;
                let amount = converter.from_sats_exact(sats, target)?;
                existing.price = Price::new(fix_storage_rounding(amount, target), target);
            },
            None => merged.push(line),
        }
    }
    merged.sort_by(|a, b| a.rate.cmp(&b.rate).then_with(|| a.country.cmp(&b.country)));
    Ok(merged)
}
