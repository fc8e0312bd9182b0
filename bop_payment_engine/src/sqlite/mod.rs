//! SQLite backend for the payment engine.
//!
//! Migrations live in `migrations/` and are embedded with `sqlx::migrate!`.
mod sqlite_impl;

pub mod db;
pub use sqlite_impl::SqliteDatabase;
