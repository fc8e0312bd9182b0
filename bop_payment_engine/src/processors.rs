//! The boundary between the engine and the outside payment processors.
//!
//! Each method reports a processor's view in a processor-agnostic shape. The reconciler turns these answers into
//! "paid", "failed" or "undecided" for a payment. Implementations talk to bitcoind, Lightning nodes, card processors
//! and PayPal; the engine itself never does network I/O.
use std::future::Future;

use bop_common::Sats;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    currency::Price,
    db_types::{
        BitcoinProcessor,
        CardProcessor,
        LightningProcessor,
        OrderId,
        PaymentHandle,
        PaymentId,
        PaymentMethod,
    },
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("Payment processor {0} is not configured")]
    NotConfigured(String),
    #[error("Could not reach the payment processor: {0}")]
    Network(String),
    #[error("The payment processor returned a response that could not be understood: {0}")]
    MalformedResponse(String),
    #[error("The payment processor rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("{0} does not support this operation")]
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayableRequest {
    pub order_id: OrderId,
    pub order_number: i64,
    pub payment_id: PaymentId,
    pub amount: Price,
    pub expires_at: Option<DateTime<Utc>>,
    pub label: String,
}

/// A transfer seen on chain for an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransfer {
    pub txid: String,
    pub amount: Sats,
    pub confirmations: u32,
    /// When the block containing the transfer was mined. `None` while unconfirmed.
    pub block_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightningInvoiceStatus {
    pub paid: bool,
    pub expired: bool,
    pub received: Sats,
    pub fees: Option<Sats>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardCheckoutState {
    Pending,
    Succeeded { received: Price, fees: Option<Price>, transaction_id: String },
    Failed { reason: Option<String> },
    Expired,
}

/// A card charge made on a payment terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardCharge {
    pub id: String,
    pub amount: Price,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaypalOrderState {
    Created,
    /// The buyer approved the payment; it must be captured to receive the money.
    Approved,
    Completed { received: Price, fees: Option<Price>, capture_id: String },
    Voided,
}

/// Calls out to the payment processors. All methods must be safe to call concurrently.
pub trait PaymentProcessors: Send + Sync {
    /// Creates whatever the customer pays against: an address, an invoice or a hosted checkout.
    fn create_payable(
        &self,
        method: &PaymentMethod,
        request: &PayableRequest,
    ) -> impl Future<Output = Result<PaymentHandle, ProcessorError>> + Send;

    fn bitcoin_transfers(
        &self,
        processor: BitcoinProcessor,
        address: &str,
    ) -> impl Future<Output = Result<Vec<ChainTransfer>, ProcessorError>> + Send;

    fn lightning_invoice(
        &self,
        processor: LightningProcessor,
        invoice_id: &str,
    ) -> impl Future<Output = Result<LightningInvoiceStatus, ProcessorError>> + Send;

    fn card_checkout(
        &self,
        processor: CardProcessor,
        checkout_id: &str,
    ) -> impl Future<Output = Result<CardCheckoutState, ProcessorError>> + Send;

    fn cancel_card_checkout(
        &self,
        processor: CardProcessor,
        checkout_id: &str,
    ) -> impl Future<Output = Result<(), ProcessorError>> + Send;

    /// Card charges made on the shop's terminals since `since`.
    fn recent_card_charges(
        &self,
        processor: CardProcessor,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<CardCharge>, ProcessorError>> + Send;

    fn paypal_order(&self, order_id: &str) -> impl Future<Output = Result<PaypalOrderState, ProcessorError>> + Send;

    fn capture_paypal_order(
        &self,
        order_id: &str,
    ) -> impl Future<Output = Result<PaypalOrderState, ProcessorError>> + Send;
}

/// A processor set for shops that only take manual payments. Every call fails with
/// [`ProcessorError::NotConfigured`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredProcessors;

impl PaymentProcessors for UnconfiguredProcessors {
    async fn create_payable(
        &self,
        method: &PaymentMethod,
        _request: &PayableRequest,
    ) -> Result<PaymentHandle, ProcessorError> {
        Err(ProcessorError::NotConfigured(method.to_string()))
    }

    async fn bitcoin_transfers(
        &self,
        processor: BitcoinProcessor,
        _address: &str,
    ) -> Result<Vec<ChainTransfer>, ProcessorError> {
        Err(ProcessorError::NotConfigured(format!("{processor:?}")))
    }

    async fn lightning_invoice(
        &self,
        processor: LightningProcessor,
        _invoice_id: &str,
    ) -> Result<LightningInvoiceStatus, ProcessorError> {
        Err(ProcessorError::NotConfigured(format!("{processor:?}")))
    }

    async fn card_checkout(
        &self,
        processor: CardProcessor,
        _checkout_id: &str,
    ) -> Result<CardCheckoutState, ProcessorError> {
        Err(ProcessorError::NotConfigured(format!("{processor:?}")))
    }

    async fn cancel_card_checkout(&self, processor: CardProcessor, _checkout_id: &str) -> Result<(), ProcessorError> {
        Err(ProcessorError::NotConfigured(format!("{processor:?}")))
    }

    async fn recent_card_charges(
        &self,
        processor: CardProcessor,
        _since: DateTime<Utc>,
    ) -> Result<Vec<CardCharge>, ProcessorError> {
        Err(ProcessorError::NotConfigured(format!("{processor:?}")))
    }

    async fn paypal_order(&self, _order_id: &str) -> Result<PaypalOrderState, ProcessorError> {
        Err(ProcessorError::NotConfigured("paypal".into()))
    }

    async fn capture_paypal_order(&self, _order_id: &str) -> Result<PaypalOrderState, ProcessorError> {
        Err(ProcessorError::NotConfigured("paypal".into()))
    }
}
