//! Process configuration.
//!
//! Everything is read from environment variables (a `.env` file is loaded first, if present). Missing or invalid
//! values are logged and replaced by their defaults, so the server always starts.
//!
//! | Variable                          | Default                     |
//! |-----------------------------------|-----------------------------|
//! | `BOP_DATABASE_URL`                | `sqlite://data/bop_store.db` |
//! | `BOP_INSTANCE_ID`                 | random, per process         |
//! | `BOP_RECONCILE_INTERVAL_SECS`     | 5                           |
//! | `BOP_LOCK_TTL_SECS`               | 60                          |
//! | `BOP_STOCK_REFRESH_INTERVAL_SECS` | 60                          |
//! | `BOP_DB_MAX_CONNECTIONS`          | 25                          |
//!
//! Business settings (currencies, VAT, timeouts) are not process configuration. They live in the database and are
//! managed through the engine's runtime configuration store.
use std::{env, fmt::Display, str::FromStr, time::Duration};

use bop_common::{helpers::parse_positive, Secret};
use log::*;

const DEFAULT_DATABASE_URL: &str = "sqlite://data/bop_store.db";
const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 5;
const DEFAULT_LOCK_TTL_SECS: u64 = 60;
const DEFAULT_STOCK_REFRESH_INTERVAL_SECS: u64 = 60;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 25;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// May carry credentials, so it is kept out of the logs.
    pub database_url: Secret<String>,
    /// Identifies this process in the lock table. Must be unique among the instances sharing a database.
    pub instance_id: String,
    /// The pause between two reconciliation ticks.
    pub reconcile_interval: Duration,
    /// How long a lock is kept without a heartbeat before another instance may take it over.
    pub lock_ttl: Duration,
    /// The pause between two sweeps for lapsed cart reservations.
    pub stock_refresh_interval: Duration,
    pub db_max_connections: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_url: Secret::new(DEFAULT_DATABASE_URL.to_string()),
            instance_id: random_instance_id(),
            reconcile_interval: Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_SECS),
            lock_ttl: Duration::from_secs(DEFAULT_LOCK_TTL_SECS),
            stock_refresh_interval: Duration::from_secs(DEFAULT_STOCK_REFRESH_INTERVAL_SECS),
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
        }
    }
}

impl ServerConfig {
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Self
    where F: Fn(&str) -> Option<String> {
        let database_url = lookup("BOP_DATABASE_URL").filter(|s| !s.trim().is_empty()).unwrap_or_else(|| {
            info!("🪛️ BOP_DATABASE_URL is not set. Using the default, {DEFAULT_DATABASE_URL}");
            DEFAULT_DATABASE_URL.to_string()
        });
        let instance_id = lookup("BOP_INSTANCE_ID").map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        let instance_id = instance_id.unwrap_or_else(|| {
            let id = random_instance_id();
            info!("🪛️ BOP_INSTANCE_ID is not set. This instance will be known as {id}");
            id
        });
        let reconcile_interval =
            positive_or_default(&lookup, "BOP_RECONCILE_INTERVAL_SECS", DEFAULT_RECONCILE_INTERVAL_SECS);
        let lock_ttl = positive_or_default(&lookup, "BOP_LOCK_TTL_SECS", DEFAULT_LOCK_TTL_SECS);
        let stock_refresh_interval =
            positive_or_default(&lookup, "BOP_STOCK_REFRESH_INTERVAL_SECS", DEFAULT_STOCK_REFRESH_INTERVAL_SECS);
        let db_max_connections = positive_or_default(&lookup, "BOP_DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS);
        if lock_ttl <= reconcile_interval {
            warn!(
                "🪛️ BOP_LOCK_TTL_SECS ({lock_ttl}s) is not longer than BOP_RECONCILE_INTERVAL_SECS \
                 ({reconcile_interval}s). Another instance may take the lock over between two ticks."
            );
        }
        Self {
            database_url: Secret::new(database_url),
            instance_id,
            reconcile_interval: Duration::from_secs(reconcile_interval),
            lock_ttl: Duration::from_secs(lock_ttl),
            stock_refresh_interval: Duration::from_secs(stock_refresh_interval),
            db_max_connections,
        }
    }
}

fn positive_or_default<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + Default + Display,
    T::Err: Display,
{
    let value = lookup(name);
    let is_set = value.is_some();
    parse_positive(value).unwrap_or_else(|reason| {
        if is_set {
            warn!("🪛️ Invalid configuration value for {name}: {reason}. Using the default, {default}");
        } else {
            info!("🪛️ {name} is not set. Using the default, {default}");
        }
        default
    })
}

fn random_instance_id() -> String {
    format!("bop-{:08x}", rand::random::<u32>())
}
