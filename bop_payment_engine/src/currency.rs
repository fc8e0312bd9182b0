//! Currencies, prices and exchange-rate conversion.
//!
//! Every conversion goes through satoshis. Exchange rates are expressed as the price of one bitcoin in a given
//! currency, so converting into SAT multiplies before dividing, and converting out of SAT multiplies by the rate and
//! then divides by the number of satoshis in a bitcoin. All intermediate values are exact [`Decimal`]s; rounding
//! happens once, at the target currency's precision, and only when a caller asks for a rounded value.
use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use bop_common::{Sats, SATS_PER_BTC};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CurrencyError {
    #[error("There is no exchange rate available for {0}")]
    MissingRate(Currency),
    #[error("The exchange rate for {0} must be strictly positive")]
    InvalidRate(Currency),
    #[error("Arithmetic overflow while converting {amount} {from} to {to}")]
    Overflow { amount: Decimal, from: Currency, to: Currency },
    #[error("Could not convert {0} into a satoshi amount")]
    SatsConversion(String),
    #[error("Unknown currency code: {0}")]
    UnknownCurrency(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Btc,
    Sat,
    Eur,
    Usd,
    Chf,
    Gbp,
    Cad,
    Zar,
    Kes,
    Jpy,
    Xof,
    Xaf,
    Ugx,
}

impl Currency {
    pub const ALL: [Currency; 13] = [
        Currency::Btc,
        Currency::Sat,
        Currency::Eur,
        Currency::Usd,
        Currency::Chf,
        Currency::Gbp,
        Currency::Cad,
        Currency::Zar,
        Currency::Kes,
        Currency::Jpy,
        Currency::Xof,
        Currency::Xaf,
        Currency::Ugx,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Currency::Btc => "BTC",
            Currency::Sat => "SAT",
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
            Currency::Chf => "CHF",
            Currency::Gbp => "GBP",
            Currency::Cad => "CAD",
            Currency::Zar => "ZAR",
            Currency::Kes => "KES",
            Currency::Jpy => "JPY",
            Currency::Xof => "XOF",
            Currency::Xaf => "XAF",
            Currency::Ugx => "UGX",
        }
    }

    /// The number of decimal places shown to customers and used for payable amounts.
    pub fn display_digits(&self) -> u32 {
        match self {
            Currency::Btc => 8,
            Currency::Sat | Currency::Jpy | Currency::Xof | Currency::Xaf | Currency::Ugx => 0,
            _ => 2,
        }
    }

    /// Fiat amounts are stored with two extra digits so that sums of many small lines do not drift.
    pub fn storage_digits(&self) -> u32 {
        if self.is_fiat() {
            self.display_digits() + 2
        } else {
            self.display_digits()
        }
    }

    pub fn is_fiat(&self) -> bool {
        !matches!(self, Currency::Btc | Currency::Sat)
    }

    /// The smallest displayable amount in this currency, e.g. 0.01 for EUR or 1 for SAT.
    pub fn unit(&self) -> Decimal {
        Decimal::new(1, self.display_digits())
    }
}

impl Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Currency {
    type Err = CurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_uppercase();
        Currency::ALL.iter().copied().find(|c| c.code() == code).ok_or(CurrencyError::UnknownCurrency(s.to_string()))
    }
}

/// Rounds the amount to the currency's display precision, half away from zero.
pub fn fix_currency_rounding(amount: Decimal, currency: Currency) -> Decimal {
    amount.round_dp_with_strategy(currency.display_digits(), RoundingStrategy::MidpointAwayFromZero)
}

/// Rounds the amount to the currency's storage precision, half away from zero.
pub fn fix_storage_rounding(amount: Decimal, currency: Currency) -> Decimal {
    amount.round_dp_with_strategy(currency.storage_digits(), RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub amount: Decimal,
    pub currency: Currency,
}

impl Price {
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self { amount: Decimal::ZERO, currency }
    }

    pub fn sats(sats: Sats) -> Self {
        Self { amount: Decimal::from(sats), currency: Currency::Sat }
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    pub fn rounded(&self) -> Self {
        Self { amount: fix_currency_rounding(self.amount, self.currency), currency: self.currency }
    }
}

impl Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

/// The price of one bitcoin in each supported currency.
pub type ExchangeRates = BTreeMap<Currency, Decimal>;

#[derive(Debug, Clone, Default)]
pub struct CurrencyConverter {
    rates: ExchangeRates,
}

impl CurrencyConverter {
    pub fn new(rates: ExchangeRates) -> Self {
        Self { rates }
    }

    pub fn rates(&self) -> &ExchangeRates {
        &self.rates
    }

    /// The price of one BTC in `currency`. BTC and SAT are fixed.
    pub fn btc_rate(&self, currency: Currency) -> Result<Decimal, CurrencyError> {
        match currency {
            Currency::Btc => Ok(Decimal::ONE),
            Currency::Sat => Ok(Decimal::from(SATS_PER_BTC)),
            c => {
                let rate = self.rates.get(&c).copied().ok_or(CurrencyError::MissingRate(c))?;
                if rate <= Decimal::ZERO {
                    return Err(CurrencyError::InvalidRate(c));
                }
                Ok(rate)
            },
        }
    }

    /// Converts `amount` of `source` into an exact (unrounded) number of satoshis.
    pub fn to_sats_exact(&self, amount: Decimal, source: Currency) -> Result<Decimal, CurrencyError> {
        if source == Currency::Sat {
            return Ok(amount);
        }
        let rate = self.btc_rate(source)?;
        amount
            .checked_mul(Decimal::from(SATS_PER_BTC))
            .and_then(|v| v.checked_div(rate))
            .ok_or(CurrencyError::Overflow { amount, from: source, to: Currency::Sat })
    }

    /// Converts an exact number of satoshis into `target`, without rounding.
    pub fn from_sats_exact(&self, sats: Decimal, target: Currency) -> Result<Decimal, CurrencyError> {
        if target == Currency::Sat {
            return Ok(sats);
        }
        let rate = self.btc_rate(target)?;
        sats.checked_mul(rate)
            .and_then(|v| v.checked_div(Decimal::from(SATS_PER_BTC)))
            .ok_or(CurrencyError::Overflow { amount: sats, from: Currency::Sat, to: target })
    }

    pub fn convert_exact(&self, target: Currency, amount: Decimal, source: Currency) -> Result<Decimal, CurrencyError> {
        if target == source {
            return Ok(amount);
        }
        let sats = self.to_sats_exact(amount, source)?;
        self.from_sats_exact(sats, target)
    }

    /// Converts `amount` from `source` to `target`, rounded to the target's display precision.
    pub fn to_currency(&self, target: Currency, amount: Decimal, source: Currency) -> Result<Decimal, CurrencyError> {
        let exact = self.convert_exact(target, amount, source)?;
        Ok(fix_currency_rounding(exact, target))
    }

    pub fn to_price(&self, target: Currency, price: &Price) -> Result<Price, CurrencyError> {
        let amount = self.to_currency(target, price.amount, price.currency)?;
        Ok(Price::new(amount, target))
    }

    /// Converts a price into a whole number of satoshis.
    pub fn to_sats(&self, price: &Price) -> Result<Sats, CurrencyError> {
        let exact = self.to_sats_exact(price.amount, price.currency)?;
        Sats::try_from(exact).map_err(|e| CurrencyError::SatsConversion(e.to_string()))
    }

    /// Sums prices expressed in any mix of currencies.
    ///
    /// When every price is already in `target` the amounts are added directly. Otherwise each amount is converted
    /// into exact satoshis, summed, and the total is converted once into `target`. The result is rounded to the
    /// target's display precision.
    pub fn sum_currency<'a, I>(&self, target: Currency, prices: I) -> Result<Decimal, CurrencyError>
    where I: IntoIterator<Item = &'a Price> {
        let prices = prices.into_iter().collect::<Vec<_>>();
        if prices.iter().all(|p| p.currency == target) {
            let total = prices.iter().map(|p| p.amount).sum::<Decimal>();
            return Ok(fix_currency_rounding(total, target));
        }
        let sats = self.sum_sats_exact(prices)?;
        self.to_currency(target, sats, Currency::Sat)
    }

    pub fn sum_sats_exact<'a, I>(&self, prices: I) -> Result<Decimal, CurrencyError>
    where I: IntoIterator<Item = &'a Price> {
        prices.into_iter().try_fold(Decimal::ZERO, |acc, p| Ok(acc + self.to_sats_exact(p.amount, p.currency)?))
    }
}

/// The roles a currency can play for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CurrencyRole {
    Main,
    Secondary,
    PriceReference,
    Accounting,
}

impl Display for CurrencyRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CurrencyRole::Main => write!(f, "main"),
            CurrencyRole::Secondary => write!(f, "secondary"),
            CurrencyRole::PriceReference => write!(f, "priceReference"),
            CurrencyRole::Accounting => write!(f, "accounting"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyConfig {
    pub main: Currency,
    #[serde(default)]
    pub secondary: Option<Currency>,
    pub price_reference: Currency,
    #[serde(default)]
    pub accounting: Option<Currency>,
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self { main: Currency::Sat, secondary: None, price_reference: Currency::Sat, accounting: None }
    }
}

impl CurrencyConfig {
    /// The configured roles, in a stable order. Optional roles only appear when configured.
    pub fn roles(&self) -> Vec<(CurrencyRole, Currency)> {
        let mut roles = vec![(CurrencyRole::Main, self.main)];
        if let Some(c) = self.secondary {
            roles.push((CurrencyRole::Secondary, c));
        }
        roles.push((CurrencyRole::PriceReference, self.price_reference));
        if let Some(c) = self.accounting {
            roles.push((CurrencyRole::Accounting, c));
        }
        roles
    }
}

/// A single amount frozen in every configured currency role at the moment it was captured.
///
/// Later changes to exchange rates never alter a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CurrencySnapshot(BTreeMap<CurrencyRole, Price>);

impl CurrencySnapshot {
    /// Captures `price` in each of the given roles. Each view is rounded to its currency's display precision.
    pub fn capture<I>(converter: &CurrencyConverter, roles: I, price: &Price) -> Result<Self, CurrencyError>
    where I: IntoIterator<Item = (CurrencyRole, Currency)> {
        let views = roles
            .into_iter()
            .map(|(role, currency)| Ok((role, converter.to_price(currency, price)?)))
            .collect::<Result<BTreeMap<_, _>, CurrencyError>>()?;
        Ok(Self(views))
    }

    /// Captures an exact satoshi amount in each role.
    pub fn capture_sats<I>(converter: &CurrencyConverter, roles: I, sats: Decimal) -> Result<Self, CurrencyError>
    where I: IntoIterator<Item = (CurrencyRole, Currency)> {
        Self::capture(converter, roles, &Price::new(sats, Currency::Sat))
    }

    pub fn from_views<I>(views: I) -> Self
    where I: IntoIterator<Item = (CurrencyRole, Price)> {
        Self(views.into_iter().collect())
    }

    pub fn get(&self, role: CurrencyRole) -> Option<&Price> {
        self.0.get(&role)
    }

    pub fn main(&self) -> Option<&Price> {
        self.get(CurrencyRole::Main)
    }

    /// The roles present in this snapshot along with the currency of each view.
    pub fn roles(&self) -> Vec<(CurrencyRole, Currency)> {
        self.0.iter().map(|(role, p)| (*role, p.currency)).collect()
    }

    pub fn views(&self) -> impl Iterator<Item = (&CurrencyRole, &Price)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Applies `f` to each view, keeping the role and currency.
    pub fn map_amounts<F>(&self, f: F) -> Self
    where F: Fn(CurrencyRole, Decimal) -> Decimal {
        Self(self.0.iter().map(|(role, p)| (*role, Price::new(f(*role, p.amount), p.currency))).collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn converter() -> CurrencyConverter {
        let mut rates = ExchangeRates::new();
        rates.insert(Currency::Eur, Decimal::from(30_000));
        rates.insert(Currency::Usd, Decimal::from(32_000));
        rates.insert(Currency::Chf, Decimal::from(28_000));
        CurrencyConverter::new(rates)
    }

    #[test]
    fn identity_conversion() {
        let c = converter();
        let amount = Decimal::from_str("12.3456").unwrap();
        assert_eq!(c.convert_exact(Currency::Eur, amount, Currency::Eur).unwrap(), amount);
        assert_eq!(c.to_currency(Currency::Eur, amount, Currency::Eur).unwrap(), Decimal::from_str("12.35").unwrap());
    }

    #[test]
    fn fiat_to_sats() {
        let c = converter();
        let sats = c.to_sats(&Price::new(Decimal::from(100), Currency::Eur)).unwrap();
        assert_eq!(sats.value(), 333_333);
        let sats = c.to_sats(&Price::new(Decimal::from(120), Currency::Eur)).unwrap();
        assert_eq!(sats.value(), 400_000);
        assert_eq!(c.to_sats(&Price::new(Decimal::ONE, Currency::Btc)).unwrap().value(), 100_000_000);
    }

    #[test]
    fn sats_to_fiat() {
        let c = converter();
        let eur = c.to_currency(Currency::Eur, Decimal::from(400_000), Currency::Sat).unwrap();
        assert_eq!(eur, Decimal::from(120));
        let usd = c.to_currency(Currency::Usd, Decimal::from(100_000_000), Currency::Sat).unwrap();
        assert_eq!(usd, Decimal::from(32_000));
    }

    #[test]
    fn round_trip_stays_within_one_unit() {
        let c = converter();
        for cents in [1i64, 99, 1234, 99_999, 1_000_001] {
            let eur = Decimal::new(cents, 2);
            let sats = c.to_currency(Currency::Sat, eur, Currency::Eur).unwrap();
            let back = c.to_currency(Currency::Eur, sats, Currency::Sat).unwrap();
            assert!((back - eur).abs() <= Currency::Eur.unit(), "{eur} -> {sats} -> {back}");
        }
    }

    #[test]
    fn cross_fiat_conversion_goes_through_sats() {
        let c = converter();
        let usd = c.to_currency(Currency::Usd, Decimal::from(30), Currency::Eur).unwrap();
        assert_eq!(usd, Decimal::from(32));
    }

    #[test]
    fn missing_and_invalid_rates() {
        let mut rates = ExchangeRates::new();
        rates.insert(Currency::Gbp, Decimal::ZERO);
        let c = CurrencyConverter::new(rates);
        assert_eq!(c.to_sats_exact(Decimal::ONE, Currency::Eur), Err(CurrencyError::MissingRate(Currency::Eur)));
        assert_eq!(c.to_sats_exact(Decimal::ONE, Currency::Gbp), Err(CurrencyError::InvalidRate(Currency::Gbp)));
    }

    #[test]
    fn sum_same_currency_is_direct() {
        let c = CurrencyConverter::default();
        let prices = [Price::new(Decimal::new(1005, 3), Currency::Eur), Price::new(Decimal::new(2005, 3), Currency::Eur)];
        assert_eq!(c.sum_currency(Currency::Eur, &prices).unwrap(), Decimal::new(301, 2));
    }

    #[test]
    fn sum_mixed_currencies() {
        let c = converter();
        let prices = [Price::new(Decimal::from(30), Currency::Eur), Price::new(Decimal::from(100_000), Currency::Sat)];
        assert_eq!(c.sum_currency(Currency::Sat, &prices).unwrap(), Decimal::from(200_000));
        assert_eq!(c.sum_currency(Currency::Eur, &prices).unwrap(), Decimal::from(60));
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(fix_currency_rounding(Decimal::new(12345, 3), Currency::Eur), Decimal::new(1235, 2));
        assert_eq!(fix_currency_rounding(Decimal::new(-12345, 3), Currency::Eur), Decimal::new(-1235, 2));
        assert_eq!(fix_currency_rounding(Decimal::new(5, 1), Currency::Sat), Decimal::ONE);
        assert_eq!(fix_storage_rounding(Decimal::new(1234567, 5), Currency::Eur), Decimal::new(123457, 4));
    }

    #[test]
    fn parse_currency_codes() {
        assert_eq!("eur".parse::<Currency>().unwrap(), Currency::Eur);
        assert_eq!(" SAT ".parse::<Currency>().unwrap(), Currency::Sat);
        assert!("XYZ".parse::<Currency>().is_err());
        assert_eq!(serde_json::to_string(&Currency::Chf).unwrap(), "\"CHF\"");
    }

    #[test]
    fn snapshot_captures_each_role() {
        let c = converter();
        let config = CurrencyConfig {
            main: Currency::Eur,
            secondary: Some(Currency::Usd),
            price_reference: Currency::Eur,
            accounting: Some(Currency::Sat),
        };
        let snapshot = CurrencySnapshot::capture(&c, config.roles(), &Price::new(Decimal::from(120), Currency::Eur))
            .unwrap();
        assert_eq!(snapshot.main().unwrap().amount, Decimal::from(120));
        assert_eq!(snapshot.get(CurrencyRole::Secondary).unwrap().amount, Decimal::from(128));
        assert_eq!(snapshot.get(CurrencyRole::Accounting).unwrap(), &Price::new(Decimal::from(400_000), Currency::Sat));
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["priceReference"]["currency"], "EUR");
    }

    #[test]
    fn snapshot_without_optional_roles() {
        let config = CurrencyConfig { main: Currency::Sat, secondary: None, price_reference: Currency::Sat, accounting: None };
        let snapshot = CurrencySnapshot::capture(&converter(), config.roles(), &Price::new(Decimal::TEN, Currency::Sat))
            .unwrap();
        assert!(snapshot.get(CurrencyRole::Secondary).is_none());
        assert!(snapshot.get(CurrencyRole::Accounting).is_none());
        assert_eq!(snapshot.roles().len(), 2);
    }
}
