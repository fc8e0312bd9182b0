//! One reconciliation tick: every pending payment of every order awaiting payment is checked against its processor.
//!
//! Orders and their payments are processed one after the other. A processor failure only skips the payment it
//! concerns; the next tick retries it. A payment that is past its expiry without a success is expired, whether or not
//! the processor answered. Invariant violations abort the tick and are returned to the caller.
use std::{collections::HashSet, fmt::Debug};

use chrono::{DateTime, Duration, Utc};
use log::*;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::{
    bpe_api::order_flow_api::{OrderFlowApi, ReceivedPayment},
    currency::{CurrencyRole, Price},
    db_types::{
        BitcoinProcessor,
        CardProcessor,
        LightningProcessor,
        Order,
        OrderPayment,
        OrderStatus,
        PaymentHandle,
        PaymentMethod,
        PaymentStatus,
        PaymentTransaction,
    },
    lock::Lease,
    processors::{CardCheckoutState, PaymentProcessors, PaypalOrderState, ProcessorError},
    runtime_config::RuntimeConfig,
    traits::{PaymentGatewayDatabase, PaymentGatewayError},
};

#[derive(Debug, Clone, Error)]
pub enum ReconcileError {
    #[error("Reconciliation stopped on an invariant violation: {0}")]
    InvariantViolation(PaymentGatewayError),
    #[error("Could not load the orders to reconcile: {0}")]
    StorageError(PaymentGatewayError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub orders_checked: usize,
    pub payments_paid: usize,
    pub payments_failed: usize,
    /// Payments skipped this tick because a processor or the database reported an error.
    pub errors: usize,
    /// The tick stopped early because the lease was lost.
    pub lease_lost: bool,
}

/// What a processor lookup concluded about a payment.
#[derive(Debug, Clone)]
enum Verdict {
    Paid(ReceivedPayment),
    Failed(PaymentStatus, Option<String>),
    Undecided,
}

pub struct PaymentReconciler<B, P> {
    api: OrderFlowApi<B, P>,
    /// Card charges already matched to a tap-to-pay session in this process.
    matched_charges: Mutex<HashSet<String>>,
}

impl<B, P> Debug for PaymentReconciler<B, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaymentReconciler")
    }
}

impl<B, P> PaymentReconciler<B, P>
where
    B: PaymentGatewayDatabase,
    P: PaymentProcessors,
{
    pub fn new(api: OrderFlowApi<B, P>) -> Self {
        Self { api, matched_charges: Mutex::new(HashSet::new()) }
    }

    pub fn api(&self) -> &OrderFlowApi<B, P> {
        &self.api
    }

    /// Runs one pass over the orders awaiting payment. The lease is checked before each order; once it is lost, the
    /// tick stops and reports it.
    pub async fn tick(&self, lease: &Lease) -> Result<TickSummary, ReconcileError> {
        let mut summary = TickSummary::default();
        let orders = self.api.db().fetch_orders_awaiting_payment().await.map_err(ReconcileError::StorageError)?;
        if orders.is_empty() {
            return Ok(summary);
        }
        let config = self.api.db().fetch_runtime_config().await.map_err(ReconcileError::StorageError)?;
        trace!("🔄️ Reconciling {} orders", orders.len());
        for order in orders {
            if !lease.is_held() {
                warn!("🔄️ Lease on '{}' lost. Stopping the tick", lease.name());
                summary.lease_lost = true;
                break;
            }
            summary.orders_checked += 1;
            self.reconcile_order(order, &config, &mut summary).await?;
        }
        if summary.payments_paid + summary.payments_failed + summary.errors > 0 {
            info!(
                "🔄️ Tick done: {} orders checked, {} payments paid, {} failed, {} errors",
                summary.orders_checked, summary.payments_paid, summary.payments_failed, summary.errors
            );
        }
        Ok(summary)
    }

    async fn reconcile_order(
        &self,
        order: Order,
        config: &RuntimeConfig,
        summary: &mut TickSummary,
    ) -> Result<(), ReconcileError> {
        let mut current = order;
        let pending = current.pending_payments().map(|p| p.id.clone()).collect::<Vec<_>>();
        for payment_id in pending {
            if current.status != OrderStatus::Pending {
                break;
            }
            let Some(payment) = current.payment(&payment_id).cloned() else {
                continue;
            };
            if payment.status != PaymentStatus::Pending {
                continue;
            }
            let now = self.api.clock().now();
            let verdict = match self.check_payment(&current, &payment, config, now).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        "🔄️ Could not check payment {} ({}) of order #{} [{}]: {e}",
                        payment.id, payment.method, current.number, current.id
                    );
                    summary.errors += 1;
                    Verdict::Undecided
                },
            };
            let verdict = match verdict {
                Verdict::Undecided if payment.is_expired_at(now) => Verdict::Failed(PaymentStatus::Expired, None),
                v => v,
            };
            let result = match verdict {
                Verdict::Undecided => continue,
                Verdict::Paid(received) => {
                    let charges = tap_to_pay_charges(&payment, &received);
                    let result = self.api.on_order_payment(&current, &payment.id, received).await;
                    if result.is_ok() && !charges.is_empty() {
                        self.matched_charges.lock().await.extend(charges);
                    }
                    result.map(|t| {
                        summary.payments_paid += 1;
                        t.order
                    })
                },
                Verdict::Failed(status, reason) => {
                    self.api.on_order_payment_failed(&current, &payment.id, status, reason).await.map(|o| {
                        summary.payments_failed += 1;
                        o
                    })
                },
            };
            match result {
                Ok(order) => current = order,
                Err(e) if e.is_invariant_violation() => {
                    error!("🔄️ Invariant violated on order #{} [{}]: {e}", current.number, current.id);
                    return Err(ReconcileError::InvariantViolation(e));
                },
                Err(PaymentGatewayError::StaleOrder(id)) => {
                    debug!("🔄️ Order {id} changed during the tick. It will be looked at again on the next one");
                    break;
                },
                Err(e) => {
                    error!("🔄️ Could not update payment {} of order #{}: {e}", payment.id, current.number);
                    summary.errors += 1;
                    break;
                },
            }
        }
        Ok(())
    }

    async fn check_payment(
        &self,
        order: &Order,
        payment: &OrderPayment,
        config: &RuntimeConfig,
        now: DateTime<Utc>,
    ) -> Result<Verdict, ProcessorError> {
        match (payment.method, payment.handle.as_ref()) {
            (PaymentMethod::Bitcoin(p), Some(PaymentHandle::Address { address })) => {
                self.check_bitcoin(p, address, order, payment, config).await
            },
            (PaymentMethod::Lightning(p), Some(PaymentHandle::Invoice { invoice_id, .. })) => {
                self.check_lightning(p, invoice_id, payment, config).await
            },
            (PaymentMethod::Card(p), Some(PaymentHandle::Checkout { checkout_id, .. })) => {
                self.check_card(p, checkout_id, payment, config, now).await
            },
            (PaymentMethod::Paypal, Some(PaymentHandle::Checkout { checkout_id, .. })) => {
                self.check_paypal(checkout_id, payment, config, now).await
            },
            (PaymentMethod::PointOfSale { tap_to_pay: Some(p) }, Some(PaymentHandle::TapToPay { started_at })) => {
                self.check_tap_to_pay(p, *started_at, payment, config).await
            },
            (PaymentMethod::BankTransfer | PaymentMethod::PointOfSale { .. } | PaymentMethod::Free, _) => {
                Ok(Verdict::Undecided)
            },
            (method, handle) => {
                warn!("🔄️ Payment {} ({method}) has an unexpected handle: {handle:?}", payment.id);
                Ok(Verdict::Undecided)
            },
        }
    }

    async fn check_bitcoin(
        &self,
        processor: BitcoinProcessor,
        address: &str,
        order: &Order,
        payment: &OrderPayment,
        config: &RuntimeConfig,
    ) -> Result<Verdict, ProcessorError> {
        let transfers = self.api.processors().bitcoin_transfers(processor, address).await?;
        let required = required_confirmations(payment, config);
        let counted = transfers
            .iter()
            .filter(|t| t.confirmations >= required)
            .filter(|t| match t.block_time {
                Some(at) => at >= order.created_at && payment.expires_at.map_or(true, |exp| at <= exp),
                None => required == 0,
            })
            .collect::<Vec<_>>();
        let received = counted.iter().map(|t| Decimal::from(t.amount)).sum::<Decimal>();
        if counted.is_empty() || received < payment.price.amount {
            trace!("🔄️ {received} sats of {} counted for payment {}", payment.price.amount, payment.id);
            return Ok(Verdict::Undecided);
        }
        let paid_at = counted.iter().filter_map(|t| t.block_time).max().unwrap_or_else(|| self.api.clock().now());
        let mut result = ReceivedPayment::new(Price::new(received, payment.price.currency), paid_at);
        for t in counted {
            result = result.with_transaction(PaymentTransaction {
                id: t.txid.clone(),
                amount: Price::sats(t.amount),
                at: t.block_time,
            });
        }
        Ok(Verdict::Paid(result))
    }

    async fn check_lightning(
        &self,
        processor: LightningProcessor,
        invoice_id: &str,
        payment: &OrderPayment,
        config: &RuntimeConfig,
    ) -> Result<Verdict, ProcessorError> {
        let status = self.api.processors().lightning_invoice(processor, invoice_id).await?;
        if status.paid && !received_covers(&Price::sats(status.received), payment, config) {
            Ok(Verdict::Undecided)
        } else if status.paid {
            let paid_at = status.paid_at.unwrap_or_else(|| self.api.clock().now());
            let received = ReceivedPayment::new(Price::sats(status.received), paid_at)
                .with_fees(status.fees.map(Price::sats))
                .with_transaction(PaymentTransaction {
                    id: invoice_id.to_string(),
                    amount: Price::sats(status.received),
                    at: status.paid_at,
                });
            Ok(Verdict::Paid(received))
        } else if status.expired {
            Ok(Verdict::Failed(PaymentStatus::Expired, None))
        } else {
            Ok(Verdict::Undecided)
        }
    }

    async fn check_card(
        &self,
        processor: CardProcessor,
        checkout_id: &str,
        payment: &OrderPayment,
        config: &RuntimeConfig,
        now: DateTime<Utc>,
    ) -> Result<Verdict, ProcessorError> {
        match self.api.processors().card_checkout(processor, checkout_id).await? {
            CardCheckoutState::Succeeded { received, .. } if !received_covers(&received, payment, config) => {
                Ok(Verdict::Undecided)
            },
            CardCheckoutState::Succeeded { received, fees, transaction_id } => {
                let transaction = PaymentTransaction { id: transaction_id, amount: received, at: Some(now) };
                Ok(Verdict::Paid(ReceivedPayment::new(received, now).with_fees(fees).with_transaction(transaction)))
            },
            CardCheckoutState::Failed { reason } => Ok(Verdict::Failed(PaymentStatus::Failed, reason)),
            CardCheckoutState::Expired => Ok(Verdict::Failed(PaymentStatus::Expired, None)),
            CardCheckoutState::Pending if payment.is_expired_at(now) => {
                debug!("🔄️ Canceling checkout {checkout_id} of expired payment {}", payment.id);
                self.api.processors().cancel_card_checkout(processor, checkout_id).await?;
                Ok(Verdict::Failed(PaymentStatus::Expired, None))
            },
            CardCheckoutState::Pending => Ok(Verdict::Undecided),
        }
    }

    async fn check_paypal(
        &self,
        checkout_id: &str,
        payment: &OrderPayment,
        config: &RuntimeConfig,
        now: DateTime<Utc>,
    ) -> Result<Verdict, ProcessorError> {
        let state = match self.api.processors().paypal_order(checkout_id).await? {
            PaypalOrderState::Approved => {
                debug!("🔄️ Capturing approved PayPal order {checkout_id}");
                self.api.processors().capture_paypal_order(checkout_id).await?
            },
            state => state,
        };
        match state {
            PaypalOrderState::Completed { received, .. } if !received_covers(&received, payment, config) => {
                Ok(Verdict::Undecided)
            },
            PaypalOrderState::Completed { received, fees, capture_id } => {
                let transaction = PaymentTransaction { id: capture_id, amount: received, at: Some(now) };
                Ok(Verdict::Paid(ReceivedPayment::new(received, now).with_fees(fees).with_transaction(transaction)))
            },
            PaypalOrderState::Voided => Ok(Verdict::Failed(PaymentStatus::Canceled, Some("voided".to_string()))),
            PaypalOrderState::Created | PaypalOrderState::Approved => Ok(Verdict::Undecided),
        }
    }

    /// Matches a card charge of exactly the payment's amount made on the terminal within the session's window.
    async fn check_tap_to_pay(
        &self,
        processor: CardProcessor,
        started_at: DateTime<Utc>,
        payment: &OrderPayment,
        config: &RuntimeConfig,
    ) -> Result<Verdict, ProcessorError> {
        let window_end = started_at + Duration::minutes(config.tap_to_pay_window_minutes);
        let charges = self.api.processors().recent_card_charges(processor, started_at).await?;
        let matched = self.matched_charges.lock().await;
        let charge = charges.into_iter().find(|c| {
            c.amount.currency == payment.price.currency &&
                c.amount.amount == payment.price.amount &&
                c.created_at >= started_at &&
                c.created_at <= window_end &&
                !matched.contains(&c.id)
        });
        let Some(charge) = charge else {
            return Ok(Verdict::Undecided);
        };
        debug!("🔄️ Card charge {} matched to tap-to-pay payment {}", charge.id, payment.id);
        let transaction = PaymentTransaction { id: charge.id, amount: charge.amount, at: Some(charge.created_at) };
        Ok(Verdict::Paid(ReceivedPayment::new(charge.amount, charge.created_at).with_transaction(transaction)))
    }
}

/// Whether `received` is at least what `payment` asked for. Amounts in another currency are converted first.
fn received_covers(received: &Price, payment: &OrderPayment, config: &RuntimeConfig) -> bool {
    let owed = payment.price;
    let amount = if received.currency == owed.currency {
        Ok(received.amount)
    } else {
        config.converter().to_currency(owed.currency, received.amount, received.currency)
    };
    match amount {
        Ok(amount) if amount >= owed.amount => true,
        Ok(amount) => {
            warn!("🔄️ Payment {} received {amount} {} of {} {}", payment.id, owed.currency, owed.amount, owed.currency);
            false
        },
        Err(e) => {
            warn!("🔄️ Cannot compare what payment {} received ({received}) with its price: {e}", payment.id);
            false
        },
    }
}

/// The card charges a tap-to-pay payment is settled with. They are remembered once the payment is stored.
fn tap_to_pay_charges(payment: &OrderPayment, received: &ReceivedPayment) -> Vec<String> {
    match payment.method {
        PaymentMethod::PointOfSale { tap_to_pay: Some(_) } => received.transactions.iter().map(|t| t.id.clone()).collect(),
        _ => vec![],
    }
}

/// The number of confirmations a bitcoin payment needs, based on its value in the thresholds' currency.
fn required_confirmations(payment: &OrderPayment, config: &RuntimeConfig) -> u32 {
    let thresholds = &config.confirmation_thresholds;
    let value = payment
        .currency_snapshot
        .price
        .views()
        .find(|(_, p)| p.currency == thresholds.currency)
        .map(|(_, p)| p.amount)
        .or_else(|| {
            let price = payment.currency_snapshot.price.get(CurrencyRole::Main).copied().unwrap_or(payment.price);
            config.converter().to_currency(thresholds.currency, price.amount, price.currency).ok()
        });
    match value {
        Some(v) => thresholds.required_for(v),
        None => thresholds.default_confirmations,
    }
}
