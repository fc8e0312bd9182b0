//! # SQLite Database methods
//!
//! This module contains "low-level" SQLite database interactions.
//!
//! All these interaction are maintained by simple functions (rather than stateful structs) that accept a
//! `&mut SqliteConnection` argument. Callers can obtain a connection from a pool,
//! or create an atomic transaction as the need arises and call through to the functions without any other changes.
//!
//! Documents are read and written through [`sqlx::types::Json`]. Timestamps inside documents are compared in Rust,
//! never in SQL.
use std::str::FromStr;

use log::debug;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Error as SqlxError,
    SqlitePool,
};

pub mod carts;
pub mod counters;
pub mod fulfilment;
pub mod locks;
pub mod orders;
pub mod products;
pub mod runtime_config;
pub mod stock;

/// Opens a pool on `url`, creating the database file on first use.
pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, SqlxError> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
    debug!("🗃️ Opened a pool of up to {max_connections} connections");
    Ok(pool)
}
