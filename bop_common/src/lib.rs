mod sats;

pub mod helpers;
pub mod op;
mod secret;

pub use sats::{Sats, SatsConversionError, SATS_PER_BTC, SAT_CURRENCY_CODE};
pub use secret::Secret;
