//! An in-memory [`PaymentProcessors`] whose answers are set by the test.
//!
//! Lookups for anything the test has not scripted return the "nothing happened yet" answer: no transfers, an unpaid
//! invoice, a pending checkout, a created PayPal order.
use std::{collections::HashMap, sync::Arc};

use bop_common::Sats;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{
    db_types::{BitcoinProcessor, CardProcessor, LightningProcessor, PaymentHandle, PaymentMethod},
    processors::{
        CardCharge,
        CardCheckoutState,
        ChainTransfer,
        LightningInvoiceStatus,
        PayableRequest,
        PaymentProcessors,
        PaypalOrderState,
        ProcessorError,
    },
};

#[derive(Debug, Default)]
struct Script {
    next_id: u64,
    payables: Vec<(PaymentMethod, PayableRequest, PaymentHandle)>,
    transfers: HashMap<String, Vec<ChainTransfer>>,
    invoices: HashMap<String, LightningInvoiceStatus>,
    checkouts: HashMap<String, CardCheckoutState>,
    canceled_checkouts: Vec<String>,
    charges: Vec<(CardProcessor, CardCharge)>,
    paypal: HashMap<String, PaypalOrderState>,
    failing: bool,
    lookups: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedProcessors {
    script: Arc<Mutex<Script>>,
}

impl ScriptedProcessors {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails with a network error.
    pub async fn set_failing(&self, failing: bool) {
        self.script.lock().await.failing = failing;
    }

    /// The payables created so far, oldest first.
    pub async fn payables(&self) -> Vec<(PaymentMethod, PayableRequest, PaymentHandle)> {
        self.script.lock().await.payables.clone()
    }

    pub async fn last_handle(&self) -> Option<PaymentHandle> {
        self.script.lock().await.payables.last().map(|(_, _, h)| h.clone())
    }

    /// How many status lookups have been made.
    pub async fn lookups(&self) -> usize {
        self.script.lock().await.lookups
    }

    pub async fn add_transfer(&self, address: &str, txid: &str, amount: Sats, confirmations: u32, block_time: Option<DateTime<Utc>>) {
        let transfer = ChainTransfer { txid: txid.to_string(), amount, confirmations, block_time };
        self.script.lock().await.transfers.entry(address.to_string()).or_default().push(transfer);
    }

    pub async fn set_invoice(&self, invoice_id: &str, status: LightningInvoiceStatus) {
        self.script.lock().await.invoices.insert(invoice_id.to_string(), status);
    }

    pub async fn set_checkout(&self, checkout_id: &str, state: CardCheckoutState) {
        self.script.lock().await.checkouts.insert(checkout_id.to_string(), state);
    }

    pub async fn canceled_checkouts(&self) -> Vec<String> {
        self.script.lock().await.canceled_checkouts.clone()
    }

    pub async fn add_card_charge(&self, processor: CardProcessor, charge: CardCharge) {
        self.script.lock().await.charges.push((processor, charge));
    }

    pub async fn set_paypal_order(&self, order_id: &str, state: PaypalOrderState) {
        self.script.lock().await.paypal.insert(order_id.to_string(), state);
    }

    async fn lookup(&self) -> Result<tokio::sync::MutexGuard<'_, Script>, ProcessorError> {
        let mut script = self.script.lock().await;
        script.lookups += 1;
        if script.failing {
            return Err(ProcessorError::Network("connection refused".to_string()));
        }
        Ok(script)
    }
}

impl PaymentProcessors for ScriptedProcessors {
    async fn create_payable(&self, method: &PaymentMethod, request: &PayableRequest) -> Result<PaymentHandle, ProcessorError> {
        let mut script = self.script.lock().await;
        if script.failing {
            return Err(ProcessorError::Network("connection refused".to_string()));
        }
        script.next_id += 1;
        let n = script.next_id;
        let handle = match method {
            PaymentMethod::Bitcoin(_) => PaymentHandle::Address { address: format!("bc1qtest{n:04}") },
            PaymentMethod::Lightning(_) => PaymentHandle::Invoice {
                invoice_id: format!("ln-{n}"),
                payment_request: format!("lnbc{}n1test{n}", request.amount.amount),
            },
            PaymentMethod::Card(_) | PaymentMethod::Paypal => PaymentHandle::Checkout {
                checkout_id: format!("co-{n}"),
                url: Some(format!("https://checkout.test/co-{n}")),
            },
            other => return Err(ProcessorError::Unsupported(other.to_string())),
        };
        script.payables.push((*method, request.clone(), handle.clone()));
        Ok(handle)
    }

    async fn bitcoin_transfers(&self, _processor: BitcoinProcessor, address: &str) -> Result<Vec<ChainTransfer>, ProcessorError> {
        let script = self.lookup().await?;
        Ok(script.transfers.get(address).cloned().unwrap_or_default())
    }

    async fn lightning_invoice(
        &self,
        _processor: LightningProcessor,
        invoice_id: &str,
    ) -> Result<LightningInvoiceStatus, ProcessorError> {
        let script = self.lookup().await?;
        Ok(script.invoices.get(invoice_id).cloned().unwrap_or(LightningInvoiceStatus {
            paid: false,
            expired: false,
            received: Sats::from(0),
            fees: None,
            paid_at: None,
        }))
    }

    async fn card_checkout(&self, _processor: CardProcessor, checkout_id: &str) -> Result<CardCheckoutState, ProcessorError> {
        let script = self.lookup().await?;
        Ok(script.checkouts.get(checkout_id).cloned().unwrap_or(CardCheckoutState::Pending))
    }

    async fn cancel_card_checkout(&self, _processor: CardProcessor, checkout_id: &str) -> Result<(), ProcessorError> {
        let mut script = self.lookup().await?;
        script.canceled_checkouts.push(checkout_id.to_string());
        script.checkouts.insert(checkout_id.to_string(), CardCheckoutState::Expired);
        Ok(())
    }

    async fn recent_card_charges(
        &self,
        processor: CardProcessor,
        since: DateTime<Utc>,
    ) -> Result<Vec<CardCharge>, ProcessorError> {
        let script = self.lookup().await?;
        Ok(script
            .charges
            .iter()
            .filter(|(p, c)| *p == processor && c.created_at >= since)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn paypal_order(&self, order_id: &str) -> Result<PaypalOrderState, ProcessorError> {
        let script = self.lookup().await?;
        Ok(script.paypal.get(order_id).cloned().unwrap_or(PaypalOrderState::Created))
    }

    async fn capture_paypal_order(&self, order_id: &str) -> Result<PaypalOrderState, ProcessorError> {
        let mut script = self.lookup().await?;
        if script.paypal.get(order_id) != Some(&PaypalOrderState::Approved) {
            return Err(ProcessorError::Rejected { status: 422, message: format!("Order {order_id} is not approved") });
        }
        let amount = script
            .payables
            .iter()
            .find(|(_, _, h)| matches!(h, PaymentHandle::Checkout { checkout_id, .. } if checkout_id == order_id))
            .map(|(_, r, _)| r.amount)
            .ok_or_else(|| ProcessorError::MalformedResponse(format!("Unknown PayPal order {order_id}")))?;
        let state = PaypalOrderState::Completed { received: amount, fees: None, capture_id: format!("cap-{order_id}") };
        script.paypal.insert(order_id.to_string(), state.clone());
        Ok(state)
    }
}
