//! be-BOP payment engine
//!
//! The payment engine turns carts into orders, prices them in several currencies at once, and follows their payments
//! until they are paid or fail. This library contains the core logic; it never talks to the network itself. Payment
//! processors are reached through the [`processors::PaymentProcessors`] trait, and storage through the backend traits
//! in [`traits`].
//!
//! The library is divided into three main sections:
//! 1. The pure core: [`currency`] conversion and snapshots, [`pricing`] and VAT, the [`stock`] ledger, and the order
//!    state transitions in [`orders`]. None of these touch storage.
//! 2. Storage ([`traits`] and the SQLite backend, [`SqliteDatabase`]). Every write path is one transaction, and every
//!    order write is conditional on the order's version.
//! 3. The public API ([`mod@bpe_api`]): order flows, carts, stock maintenance and the payment reconciler, plus the
//!    [`lock`] that makes sure only one instance runs a background task at a time.
//!
//! The engine also emits events when orders are paid or annulled and when payments are received or fail. Hooks can be
//! registered through [`events::EventHooks`].
pub mod bpe_api;
pub mod currency;
pub mod db_types;
pub mod events;
pub mod helpers;
pub mod lock;
pub mod orders;
pub mod pricing;
pub mod processors;
pub mod runtime_config;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod stock;
pub mod traits;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use bpe_api::{
    cart_api::{CartApi, CartLineOptions},
    order_flow_api::{OrderFlowApi, ReceivedPayment},
    order_objects,
    reconciler::{PaymentReconciler, ReconcileError, TickSummary},
    stock_api::StockApi,
};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use traits::{
    CartManagement,
    FulfilmentManagement,
    OrderManagement,
    PaymentGatewayDatabase,
    PaymentGatewayError,
    ProductManagement,
    RuntimeConfigStore,
};
