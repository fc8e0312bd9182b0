//! # Storage backend contracts
//!
//! This module defines the behaviour a storage backend must provide to support the payment engine.
//!
//! * [`PaymentGatewayDatabase`] defines the highest level of behaviour: the atomic write paths of the order and payment
//!   flows.
//! * [`OrderManagement`] provides read access to orders.
//! * [`CartManagement`] stores carts and keeps stock reservations in step with them.
//! * [`ProductManagement`] stores products and maintains their stock counters.
//! * [`FulfilmentManagement`] covers subscriptions, tickets, challenges, leaderboards and the email queue.
//! * [`RuntimeConfigStore`] loads and saves the shop settings.
//!
//! The distributed lock has its own storage contract, [`crate::lock::LockStore`].
mod cart_management;
mod fulfilment_management;
mod order_management;
mod payment_gateway_database;
mod product_management;
mod runtime_config_store;

pub use cart_management::CartManagement;
pub use fulfilment_management::FulfilmentManagement;
pub use order_management::OrderManagement;
pub use payment_gateway_database::{PaymentGatewayDatabase, PaymentGatewayError};
pub use product_management::ProductManagement;
pub use runtime_config_store::RuntimeConfigStore;
