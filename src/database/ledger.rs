use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::models::callback::CallbackOutcome;
use crate::models::transaction::{Transaction, TransactionStatus, UnmatchedCallback};

/// Result of applying a terminal outcome to the transaction matching a
/// gateway correlation id.
#[derive(Debug, Clone)]
pub enum FinalizeResult {
    /// The pending transaction was transitioned by this call.
    Finalized(Transaction),
    /// The transaction was already terminal; the stored document is
    /// returned untouched.
    AlreadyTerminal(Transaction),
    /// No transaction carries this correlation id.
    NotFound,
}

/// Fields pushed onto the storefront's order document when a payment
/// reaches a terminal state.
#[derive(Debug, Clone)]
pub struct OrderPaymentPatch {
    pub payment_status: TransactionStatus,
    pub receipt: Option<String>,
    pub failure_reason: Option<String>,
}

impl OrderPaymentPatch {
    pub fn from_outcome(outcome: &CallbackOutcome) -> Self {
        OrderPaymentPatch {
            payment_status: outcome.terminal_status(),
            receipt: outcome.receipt().map(str::to_string),
            failure_reason: outcome.failure_reason().map(str::to_string),
        }
    }
}

/// Persistence seam for payment attempts. The production implementation
/// is MongoDB; tests drive the service layer through an in-memory one.
#[async_trait]
pub trait TransactionLedger: Send + Sync {
    /// Records a fresh `submitting` attempt keyed by order id. An existing
    /// `failed` record, or a `submitting` record last touched before
    /// `resubmit_cutoff`, is replaced. A live `pending` record yields
    /// `PaymentInProgress` and a `completed` one yields `AlreadyPaid`.
    async fn create_submitting(
        &self,
        tx: Transaction,
        resubmit_cutoff: DateTime<Utc>,
    ) -> Result<()>;

    /// Promotes the order's `submitting` record to `pending`, attaching
    /// the gateway correlation ids.
    async fn mark_pending(
        &self,
        order_id: &str,
        checkout_request_id: &str,
        merchant_request_id: &str,
    ) -> Result<()>;

    /// Drops the order's `submitting` record after the gateway declined
    /// the push or the push never went out.
    async fn discard_submitting(&self, order_id: &str) -> Result<()>;

    /// Applies a terminal outcome to the `pending` transaction carrying
    /// this correlation id. The transition is a single conditional update,
    /// so concurrent deliveries of the same callback cannot double-apply.
    async fn finalize(
        &self,
        checkout_request_id: &str,
        outcome: &CallbackOutcome,
    ) -> Result<FinalizeResult>;

    async fn find_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<Transaction>>;

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Transaction>>;

    /// Pending transactions last touched before `cutoff`, excluding those
    /// already flagged for manual reconciliation.
    async fn stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<Transaction>>;

    /// Flags a pending transaction for manual reconciliation.
    async fn flag_needs_attention(&self, order_id: &str) -> Result<()>;

    /// Dead-letters a callback that matched no transaction.
    async fn record_unmatched(&self, callback: UnmatchedCallback) -> Result<()>;
}

/// Write access to the storefront's order documents.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Patches the payment fields on an order. A missing order is logged,
    /// not an error: the ledger stays authoritative either way.
    async fn patch_order_payment(&self, order_id: &str, patch: &OrderPaymentPatch) -> Result<()>;
}
