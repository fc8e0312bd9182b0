//! A small shop used across the tests: prices in euros, VAT at the French rates, 1 BTC = 30 000 EUR.
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::{
    currency::{Currency, CurrencyConfig, ExchangeRates, Price},
    db_types::{Address, CountryCode, Product},
    helpers::Clock,
    pricing::VatConfig,
    runtime_config::RuntimeConfig,
};

/// A clock the test moves by hand. Every [`Clock`] handed out follows it.
#[derive(Debug, Clone)]
pub struct TestClock {
    time: Arc<Mutex<DateTime<Utc>>>,
}

impl TestClock {
    pub fn starting_at(at: DateTime<Utc>) -> Self {
        Self { time: Arc::new(Mutex::new(at)) }
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.time.lock().expect("Test clock poisoned")
    }

    pub fn advance(&self, by: Duration) {
        *self.time.lock().expect("Test clock poisoned") += by;
    }

    pub fn clock(&self) -> Clock {
        let time = Arc::clone(&self.time);
        Clock::from_fn(move || *time.lock().expect("Test clock poisoned"))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::starting_at(Utc::now())
    }
}

pub fn eur(amount: i64) -> Price {
    Price::new(Decimal::from(amount), Currency::Eur)
}

pub fn exchange_rates() -> ExchangeRates {
    let mut rates = ExchangeRates::new();
    rates.insert(Currency::Eur, Decimal::from(30_000));
    rates.insert(Currency::Usd, Decimal::from(32_000));
    rates.insert(Currency::Chf, Decimal::from(28_000));
    rates
}

/// Euro shop with satoshis as accounting currency and a 20% VAT rate in France.
pub fn shop_config() -> RuntimeConfig {
    let mut vat = VatConfig::default();
    vat.rates.insert(CountryCode::new("FR"), Decimal::from(20));
    vat.rates.insert(CountryCode::new("DE"), Decimal::from(19));
    RuntimeConfig {
        currencies: CurrencyConfig {
            main: Currency::Eur,
            secondary: None,
            price_reference: Currency::Eur,
            accounting: Some(Currency::Sat),
        },
        exchange_rates: exchange_rates(),
        vat,
        paypal_currency: Currency::Eur,
        ..Default::default()
    }
}

pub fn address(country: &str) -> Address {
    Address {
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        address: "12 rue des Lilas".to_string(),
        city: "Lyon".to_string(),
        zip: "69001".to_string(),
        country: CountryCode::new(country),
        state: None,
    }
}

pub fn tshirt() -> Product {
    Product::new("tshirt", "T-shirt", eur(100)).with_stock(10).with_shipping()
}

pub fn ebook() -> Product {
    Product::new("ebook", "E-book", eur(10))
}

pub fn free_sticker() -> Product {
    Product::new("sticker", "Sticker", eur(0))
}
