// services/payment_service.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::database::ledger::{FinalizeResult, OrderPaymentPatch, OrderStore, TransactionLedger};
use crate::dtos::payment_dtos::{InitiatePaymentRequest, InitiatePaymentResponse};
use crate::errors::{AppError, Result};
use crate::models::callback::{CallbackOutcome, StkCallback};
use crate::models::transaction::{Transaction, UnmatchedCallback};
use crate::services::mpesa_service::{MpesaService, StkQueryResponse};

const DEFAULT_TRANSACTION_DESC: &str = "Order payment";

/// A `submitting` record older than this belongs to an initiation attempt
/// that died mid-flight; a retried checkout may take over its slot.
const STALE_SUBMITTING_SECS: i64 = 90;

/// Canonical Daraja subscriber format: strip everything that is not a
/// digit, then make sure the string carries the 254 country code.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if let Some(rest) = digits.strip_prefix('0') {
        format!("254{rest}")
    } else if digits.starts_with("254") {
        digits
    } else {
        format!("254{digits}")
    }
}

/// What one reconciliation sweep round did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub completed: usize,
    pub failed: usize,
    pub flagged: usize,
    pub still_pending: usize,
}

impl SweepSummary {
    pub fn swept(&self) -> usize {
        self.completed + self.failed + self.flagged + self.still_pending
    }
}

/// Payment initiation, callback reconciliation and status reads, built on
/// the gateway client and the ledger/order seams.
pub struct PaymentService {
    mpesa: MpesaService,
    ledger: Arc<dyn TransactionLedger>,
    orders: Arc<dyn OrderStore>,
}

impl PaymentService {
    pub fn new(
        mpesa: MpesaService,
        ledger: Arc<dyn TransactionLedger>,
        orders: Arc<dyn OrderStore>,
    ) -> Self {
        PaymentService {
            mpesa,
            ledger,
            orders,
        }
    }

    /// Validates and submits an STK push for an order.
    ///
    /// The ledger record is written as `submitting` before the push goes
    /// out and promoted to `pending` once the gateway accepts, so a crash
    /// between the two leaves a record the callback path can still report
    /// against instead of a confirmation with nowhere to land.
    pub async fn initiate_payment(
        &self,
        request: InitiatePaymentRequest,
    ) -> Result<InitiatePaymentResponse> {
        let (phone_raw, amount_raw, order_id) = match (
            request.phone_number.as_deref().filter(|p| !p.trim().is_empty()),
            request.amount,
            request.order_id.as_deref().filter(|o| !o.trim().is_empty()),
        ) {
            (Some(phone), Some(amount), Some(order_id)) => (phone, amount, order_id.to_string()),
            (phone, amount, order_id) => {
                let mut missing = Vec::new();
                if phone.is_none() {
                    missing.push("phoneNumber");
                }
                if amount.is_none() {
                    missing.push("amount");
                }
                if order_id.is_none() {
                    missing.push("orderId");
                }
                return Err(AppError::validation(format!(
                    "Missing required parameters: {}",
                    missing.join(", ")
                )));
            }
        };

        if amount_raw <= 0.0 {
            return Err(AppError::validation("amount must be greater than zero"));
        }
        // Daraja only takes whole shillings.
        let amount = amount_raw.trunc() as u64;
        if amount == 0 {
            return Err(AppError::validation("amount must be at least one whole shilling"));
        }

        let phone_number = normalize_phone(phone_raw);

        // Token precheck: if the gateway cannot authenticate us there is
        // no point writing a record for a push that can never go out. The
        // token is cached, so the push below does not pay for it twice.
        self.mpesa.get_access_token().await?;

        let transaction = Transaction::new_submitting(
            order_id.clone(),
            phone_number.clone(),
            amount,
            request.customer_email.clone(),
        );
        let resubmit_cutoff = Utc::now() - Duration::seconds(STALE_SUBMITTING_SECS);
        self.ledger
            .create_submitting(transaction, resubmit_cutoff)
            .await?;

        let description = request
            .transaction_description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(DEFAULT_TRANSACTION_DESC);

        let push = match self
            .mpesa
            .stk_push(&phone_number, amount, &order_id, description)
            .await
        {
            Ok(push) => push,
            Err(e) => {
                self.cleanup_submitting(&order_id).await;
                return Err(e);
            }
        };

        if !push.is_accepted() {
            warn!(
                "Gateway declined STK push for order {}: code {} ({})",
                order_id, push.response_code, push.response_description
            );
            self.cleanup_submitting(&order_id).await;
            let message = if push.response_description.is_empty() {
                "Failed to initiate STK Push".to_string()
            } else {
                push.response_description
            };
            return Err(AppError::GatewayRejection {
                code: push.response_code,
                message,
            });
        }

        self.ledger
            .mark_pending(
                &order_id,
                &push.checkout_request_id,
                &push.merchant_request_id,
            )
            .await?;
        info!(
            "STK push accepted for order {}; awaiting callback for {}",
            order_id, push.checkout_request_id
        );

        Ok(InitiatePaymentResponse {
            success: true,
            message: "STK Push sent successfully".to_string(),
            checkout_request_id: Some(push.checkout_request_id),
        })
    }

    /// Best-effort removal of the submitting record after a push that was
    /// declined or never answered. A record that survives a failed delete
    /// goes stale and is reclaimed by the next retry of the order.
    async fn cleanup_submitting(&self, order_id: &str) {
        if let Err(e) = self.ledger.discard_submitting(order_id).await {
            error!(
                "Failed to discard submitting record for order {}: {}",
                order_id, e
            );
        }
    }

    /// Applies the gateway's asynchronous result to the matching pending
    /// transaction, exactly once. Duplicate deliveries re-apply only the
    /// order patch; a delivery that matches nothing is dead-lettered and
    /// still acknowledged by the handler.
    pub async fn process_callback(&self, callback: StkCallback, raw_payload: Value) -> Result<()> {
        let checkout_request_id = callback.checkout_request_id.clone();
        let outcome = callback.outcome();

        match self.ledger.finalize(&checkout_request_id, &outcome).await? {
            FinalizeResult::Finalized(tx) => {
                match &outcome {
                    CallbackOutcome::Completed { receipt, .. } => info!(
                        "Payment completed for order {} (receipt {})",
                        tx.order_id,
                        receipt.as_deref().unwrap_or("n/a")
                    ),
                    CallbackOutcome::Failed { reason } => {
                        info!("Payment failed for order {}: {}", tx.order_id, reason)
                    }
                }
                let patch = OrderPaymentPatch::from_outcome(&outcome);
                self.orders.patch_order_payment(&tx.order_id, &patch).await?;
                Ok(())
            }
            FinalizeResult::AlreadyTerminal(tx) => {
                if tx.status == outcome.terminal_status() {
                    info!(
                        "Duplicate callback for order {} ({}); re-applying order patch",
                        tx.order_id, tx.status
                    );
                    // An identical overwrite converges an order the first
                    // delivery half-applied.
                    let patch = OrderPaymentPatch::from_outcome(&outcome);
                    self.orders.patch_order_payment(&tx.order_id, &patch).await?;
                } else {
                    error!(
                        "Conflicting callback for order {}: stored {}, gateway now says {}",
                        tx.order_id,
                        tx.status,
                        outcome.terminal_status()
                    );
                }
                Ok(())
            }
            FinalizeResult::NotFound => {
                warn!(
                    "Callback for unknown checkout request {}; recording for manual review",
                    checkout_request_id
                );
                let unmatched = UnmatchedCallback {
                    id: None,
                    checkout_request_id,
                    merchant_request_id: callback.merchant_request_id,
                    result_code: callback.result_code,
                    result_desc: callback.result_desc,
                    payload: raw_payload,
                    received_at: Utc::now(),
                };
                self.ledger.record_unmatched(unmatched).await?;
                Ok(())
            }
        }
    }

    /// Live gateway answer for a checkout request, passed through as-is.
    /// May disagree with the ledger while a callback is still in flight.
    pub async fn query_gateway_status(&self, checkout_request_id: &str) -> Result<StkQueryResponse> {
        self.mpesa.query_stk_status(checkout_request_id).await
    }

    pub async fn status_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Transaction> {
        self.ledger
            .find_by_checkout_request_id(checkout_request_id)
            .await?
            .ok_or(AppError::TransactionNotFound)
    }

    pub async fn status_by_order_id(&self, order_id: &str) -> Result<Transaction> {
        self.ledger
            .find_by_order_id(order_id)
            .await?
            .ok_or(AppError::TransactionNotFound)
    }

    /// Re-queries the gateway for payments stuck in `pending` longer than
    /// `pending_after`. Confirmed outcomes are finalized through the same
    /// conditional transition the callback path uses; payments the gateway
    /// still has no answer for are left alone until `give_up_after`, then
    /// flagged for manual reconciliation.
    pub async fn sweep_stale_pending(
        &self,
        pending_after: Duration,
        give_up_after: Duration,
    ) -> Result<SweepSummary> {
        let now = Utc::now();
        let stale = self.ledger.stale_pending(now - pending_after).await?;
        let mut summary = SweepSummary::default();

        for tx in stale {
            let Some(checkout_request_id) = tx.checkout_request_id.as_deref() else {
                // A pending record always carries its correlation id; one
                // without it can never be matched to a gateway answer.
                error!(
                    "Pending transaction for order {} has no checkout request id",
                    tx.order_id
                );
                self.ledger.flag_needs_attention(&tx.order_id).await?;
                summary.flagged += 1;
                continue;
            };

            match self.mpesa.query_stk_status(checkout_request_id).await {
                Ok(query) => match query.result_code.as_deref() {
                    Some("0") => {
                        // The query endpoint confirms the outcome but does
                        // not return the receipt.
                        let outcome = CallbackOutcome::Completed {
                            receipt: None,
                            transaction_date: None,
                            amount: None,
                            phone_number: None,
                        };
                        if self.finalize_from_sweep(checkout_request_id, &outcome).await? {
                            info!("Sweep completed payment for order {}", tx.order_id);
                            summary.completed += 1;
                        }
                    }
                    Some(code) => {
                        let reason = query
                            .result_desc
                            .clone()
                            .unwrap_or_else(|| format!("Gateway result code {code}"));
                        let outcome = CallbackOutcome::Failed {
                            reason: reason.clone(),
                        };
                        if self.finalize_from_sweep(checkout_request_id, &outcome).await? {
                            info!("Sweep failed payment for order {}: {}", tx.order_id, reason);
                            summary.failed += 1;
                        }
                    }
                    // No result yet: the prompt is still open on the
                    // payer's handset.
                    None => {
                        if self.give_up(&tx, now, give_up_after).await? {
                            summary.flagged += 1;
                        } else {
                            summary.still_pending += 1;
                        }
                    }
                },
                Err(e) => {
                    warn!(
                        "Status query for order {} failed during sweep: {}",
                        tx.order_id, e
                    );
                    if self.give_up(&tx, now, give_up_after).await? {
                        summary.flagged += 1;
                    } else {
                        summary.still_pending += 1;
                    }
                }
            }
        }

        Ok(summary)
    }

    async fn finalize_from_sweep(
        &self,
        checkout_request_id: &str,
        outcome: &CallbackOutcome,
    ) -> Result<bool> {
        match self.ledger.finalize(checkout_request_id, outcome).await? {
            FinalizeResult::Finalized(tx) => {
                let patch = OrderPaymentPatch::from_outcome(outcome);
                self.orders.patch_order_payment(&tx.order_id, &patch).await?;
                Ok(true)
            }
            // A callback beat the sweep to the transition.
            _ => Ok(false),
        }
    }

    async fn give_up(
        &self,
        tx: &Transaction,
        now: DateTime<Utc>,
        give_up_after: Duration,
    ) -> Result<bool> {
        if now - tx.created_at < give_up_after {
            return Ok(false);
        }
        error!(
            "Payment for order {} pending since {}; flagging for manual reconciliation",
            tx.order_id, tx.created_at
        );
        self.ledger.flag_needs_attention(&tx.order_id).await?;
        Ok(true)
    }
}
