use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign},
};

use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

pub const SAT_CURRENCY_CODE: &str = "SAT";
pub const SATS_PER_BTC: i64 = 100_000_000;

//--------------------------------------        Sats          ---------------------------------------------------------
/// A whole number of satoshis. This is the underlying unit that every cross-currency aggregation is funnelled through.
#[derive(Debug, Clone, Copy, Default, Type, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct Sats(i64);

op!(binary Sats, Add, add);
op!(binary Sats, Sub, sub);
op!(inplace Sats, AddAssign, add_assign);
op!(inplace Sats, SubAssign, sub_assign);
op!(unary Sats, Neg, neg);
op!(scale Sats, Mul, mul, i64);

impl Sum for Sats {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented in sats: {0}")]
pub struct SatsConversionError(String);

impl From<i64> for Sats {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl PartialEq for Sats {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Sats {}

impl TryFrom<u64> for Sats {
    type Error = SatsConversionError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > i64::MAX as u64 {
            Err(SatsConversionError(format!("Value {value} is too large to convert to sats")))
        } else {
            #[allow(clippy::cast_possible_wrap)]
            Ok(Self(value as i64))
        }
    }
}

impl TryFrom<Decimal> for Sats {
    type Error = SatsConversionError;

    /// Rounds half away from zero to a whole satoshi.
    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        value
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .map(Self)
            .ok_or_else(|| SatsConversionError(value.to_string()))
    }
}

impl From<Sats> for Decimal {
    fn from(value: Sats) -> Self {
        Decimal::from(value.0)
    }
}

impl Display for Sats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.abs() < 1_000_000 {
            write!(f, "{} sats", self.0)
        } else {
            let btc = self.0 as f64 / SATS_PER_BTC as f64;
            write!(f, "{btc:0.8}₿")
        }
    }
}

impl Sats {
    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn from_btc(btc: i64) -> Self {
        Self(btc * SATS_PER_BTC)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rounding_from_decimal() {
        let v = Decimal::new(3_333_333_333, 4);
        assert_eq!(Sats::try_from(v).unwrap(), Sats::from(333_333));
        let v = Decimal::new(15, 1);
        assert_eq!(Sats::try_from(v).unwrap(), Sats::from(2));
        let v = Decimal::new(-15, 1);
        assert_eq!(Sats::try_from(v).unwrap(), Sats::from(-2));
    }

    #[test]
    fn display() {
        assert_eq!(Sats::from(21).to_string(), "21 sats");
        assert_eq!(Sats::from_btc(2).to_string(), "2.00000000₿");
        let total: Sats = [Sats::from(1), Sats::from(2), Sats::from(3)].into_iter().sum();
        assert_eq!(total, Sats::from(6));
    }
}
