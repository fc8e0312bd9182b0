//! # be-BOP payment server
//! This crate hosts the payment engine as a long-running process. It is responsible for:
//! * Reading the process configuration from the environment.
//! * Bringing the database schema up to date.
//! * Running the background workers: the payment reconciler, and the release of lapsed cart reservations.
//!
//! Every worker runs under its own [`DistributedLock`](bop_payment_engine::lock::DistributedLock), so several
//! instances can share one database while only one of them does each job at a time.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.

pub mod cli;
pub mod config;
pub mod errors;
pub mod hooks;
pub mod workers;
