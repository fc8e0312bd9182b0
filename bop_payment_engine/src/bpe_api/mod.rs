//! # Payment engine public API
//!
//! The `bpe_api` module exposes the programmatic API of the payment engine. Each API is created by supplying a storage
//! backend that implements the backend traits it needs, so that clients only pull in what they use.
//!
//! * [`order_flow_api`] is the primary API for the order and payment flows: checkout, payment attempts, payments
//!   received or failed, manual confirmation and cancellation.
//! * [`cart_api`] manages carts and the stock they hold.
//! * [`stock_api`] queries and maintains stock counters.
//! * [`reconciler`] runs the reconciliation tick that checks pending payments against the payment processors.
//!
//! [`order_objects`] holds the request and query types shared by the APIs and the backends.
//!
//! # API usage
//!
//! ```rust,ignore
//! use bop_payment_engine::{events::EventProducers, processors::UnconfiguredProcessors, OrderFlowApi, SqliteDatabase};
//! let db = SqliteDatabase::new_with_url(...).await?;
//! let api = OrderFlowApi::new(db, Arc::new(UnconfiguredProcessors), EventProducers::default());
//! let order = api.create_order(&user, CreateOrderParams::default()).await?;
//! ```
pub mod cart_api;
pub mod order_flow_api;
pub mod order_objects;
pub mod reconciler;
pub mod stock_api;
