//! Shop-level settings that change while the engine runs.
//!
//! The document is stored in the `runtime_config` table and re-read at the start of every operation, so a changed
//! exchange rate or VAT setting takes effect without a restart. Orders never depend on it after creation: everything
//! an order needs is snapshotted into it.
use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    currency::{Currency, CurrencyConfig, CurrencyConverter, ExchangeRates},
    db_types::{CardProcessor, PaymentMethod},
    pricing::{DeliveryFeeConfig, VatConfig},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationThreshold {
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub confirmations: u32,
}

/// How many block confirmations an on-chain payment needs, depending on its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationThresholds {
    /// The currency `min_amount` and `max_amount` are expressed in.
    pub currency: Currency,
    pub default_confirmations: u32,
    #[serde(default)]
    pub thresholds: Vec<ConfirmationThreshold>,
}

impl Default for ConfirmationThresholds {
    fn default() -> Self {
        Self { currency: Currency::Sat, default_confirmations: 1, thresholds: Vec::new() }
    }
}

impl ConfirmationThresholds {
    /// The confirmations required for a payment worth `amount` (in `self.currency`).
    /// Bands are `[min, max)`; the first matching band wins.
    pub fn required_for(&self, amount: Decimal) -> u32 {
        self.thresholds
            .iter()
            .find(|t| amount >= t.min_amount && amount < t.max_amount)
            .map(|t| t.confirmations)
            .unwrap_or(self.default_confirmations)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    pub currencies: CurrencyConfig,
    /// Price of one BTC in each currency.
    pub exchange_rates: ExchangeRates,
    pub vat: VatConfig,
    pub delivery_fees: Option<DeliveryFeeConfig>,
    pub confirmation_thresholds: ConfirmationThresholds,
    /// How long a new payment stays open before it expires.
    pub payment_timeout_minutes: i64,
    /// How long a cart line holds stock.
    pub reserve_stock_minutes: i64,
    /// How far after a terminal session started a matching card charge may arrive.
    pub tap_to_pay_window_minutes: i64,
    /// Settlement currency of each card processor.
    pub card_currencies: BTreeMap<CardProcessor, Currency>,
    pub paypal_currency: Currency,
    /// Currency bank transfers and point-of-sale payments are requested in. Defaults to the main currency.
    pub manual_payment_currency: Option<Currency>,
    pub require_billing_address: bool,
    /// Receives notifications about challenge progress and other shop events.
    pub owner_email: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            currencies: CurrencyConfig::default(),
            exchange_rates: ExchangeRates::new(),
            vat: VatConfig::default(),
            delivery_fees: None,
            confirmation_thresholds: ConfirmationThresholds::default(),
            payment_timeout_minutes: 60,
            reserve_stock_minutes: 20,
            tap_to_pay_window_minutes: 5,
            card_currencies: BTreeMap::new(),
            paypal_currency: Currency::Eur,
            manual_payment_currency: None,
            require_billing_address: false,
            owner_email: None,
        }
    }
}

impl RuntimeConfig {
    pub fn converter(&self) -> CurrencyConverter {
        CurrencyConverter::new(self.exchange_rates.clone())
    }

    /// The currency a processor settles payments in. Bitcoin and Lightning always settle in satoshis.
    pub fn settlement_currency(&self, method: &PaymentMethod) -> Currency {
        match method {
            PaymentMethod::Bitcoin(_) | PaymentMethod::Lightning(_) => Currency::Sat,
            PaymentMethod::Card(p) | PaymentMethod::PointOfSale { tap_to_pay: Some(p) } => {
                self.card_currencies.get(p).copied().unwrap_or(self.currencies.main)
            },
            PaymentMethod::Paypal => self.paypal_currency,
            PaymentMethod::BankTransfer | PaymentMethod::PointOfSale { tap_to_pay: None } | PaymentMethod::Free => {
                self.manual_payment_currency.unwrap_or(self.currencies.main)
            },
        }
    }
}
