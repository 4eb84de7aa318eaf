//! In-memory `TransactionLedger`/`OrderStore` used to drive the service
//! layer in tests. Mirrors the MongoDB implementation's semantics,
//! including the conditional terminal transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::database::ledger::{FinalizeResult, OrderPaymentPatch, OrderStore, TransactionLedger};
use crate::errors::{AppError, Result};
use crate::models::callback::CallbackOutcome;
use crate::models::transaction::{Transaction, TransactionStatus, UnmatchedCallback};

#[derive(Default)]
pub struct MemoryLedger {
    transactions: RwLock<HashMap<String, Transaction>>,
    unmatched: RwLock<Vec<UnmatchedCallback>>,
    order_patches: RwLock<Vec<(String, OrderPaymentPatch)>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_transaction(&self, tx: Transaction) {
        self.transactions
            .write()
            .await
            .insert(tx.order_id.clone(), tx);
    }

    pub async fn transaction(&self, order_id: &str) -> Option<Transaction> {
        self.transactions.read().await.get(order_id).cloned()
    }

    pub async fn transaction_count(&self) -> usize {
        self.transactions.read().await.len()
    }

    pub async fn order_patches(&self) -> Vec<(String, OrderPaymentPatch)> {
        self.order_patches.read().await.clone()
    }

    pub async fn unmatched_callbacks(&self) -> Vec<UnmatchedCallback> {
        self.unmatched.read().await.clone()
    }
}

fn apply_outcome(tx: &mut Transaction, outcome: &CallbackOutcome) {
    tx.updated_at = Utc::now();
    match outcome {
        CallbackOutcome::Completed {
            receipt,
            transaction_date,
            amount,
            phone_number,
        } => {
            tx.status = TransactionStatus::Completed;
            if receipt.is_some() {
                tx.mpesa_receipt_number = receipt.clone();
            }
            if let Some(date) = transaction_date {
                tx.transaction_date = Some(*date);
            }
            if let Some(amount) = amount {
                tx.amount = *amount;
            }
            if let Some(phone) = phone_number {
                tx.phone_number = phone.clone();
            }
        }
        CallbackOutcome::Failed { reason } => {
            tx.status = TransactionStatus::Failed;
            tx.failure_reason = Some(reason.clone());
        }
    }
}

#[async_trait]
impl TransactionLedger for MemoryLedger {
    async fn create_submitting(
        &self,
        tx: Transaction,
        resubmit_cutoff: DateTime<Utc>,
    ) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        if let Some(existing) = transactions.get(&tx.order_id) {
            let replaceable = existing.status == TransactionStatus::Failed
                || (existing.status == TransactionStatus::Submitting
                    && existing.updated_at < resubmit_cutoff);
            if !replaceable {
                return match existing.status {
                    TransactionStatus::Completed => Err(AppError::AlreadyPaid),
                    _ => Err(AppError::PaymentInProgress),
                };
            }
        }
        transactions.insert(tx.order_id.clone(), tx);
        Ok(())
    }

    async fn mark_pending(
        &self,
        order_id: &str,
        checkout_request_id: &str,
        merchant_request_id: &str,
    ) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        match transactions.get_mut(order_id) {
            Some(tx) if tx.status == TransactionStatus::Submitting => {
                tx.status = TransactionStatus::Pending;
                tx.checkout_request_id = Some(checkout_request_id.to_string());
                tx.merchant_request_id = Some(merchant_request_id.to_string());
                tx.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(AppError::internal(format!(
                "no submitting transaction to promote for order {order_id}"
            ))),
        }
    }

    async fn discard_submitting(&self, order_id: &str) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        if let Some(tx) = transactions.get(order_id) {
            if tx.status == TransactionStatus::Submitting {
                transactions.remove(order_id);
            }
        }
        Ok(())
    }

    async fn finalize(
        &self,
        checkout_request_id: &str,
        outcome: &CallbackOutcome,
    ) -> Result<FinalizeResult> {
        let mut transactions = self.transactions.write().await;
        let matched = transactions
            .values_mut()
            .find(|tx| tx.checkout_request_id.as_deref() == Some(checkout_request_id));
        match matched {
            Some(tx) if tx.status == TransactionStatus::Pending => {
                apply_outcome(tx, outcome);
                Ok(FinalizeResult::Finalized(tx.clone()))
            }
            Some(tx) => Ok(FinalizeResult::AlreadyTerminal(tx.clone())),
            None => Ok(FinalizeResult::NotFound),
        }
    }

    async fn find_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<Transaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .values()
            .find(|tx| tx.checkout_request_id.as_deref() == Some(checkout_request_id))
            .cloned())
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Transaction>> {
        Ok(self.transactions.read().await.get(order_id).cloned())
    }

    async fn stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<Transaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .values()
            .filter(|tx| {
                tx.status == TransactionStatus::Pending
                    && !tx.needs_attention
                    && tx.updated_at < cutoff
            })
            .cloned()
            .collect())
    }

    async fn flag_needs_attention(&self, order_id: &str) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        if let Some(tx) = transactions.get_mut(order_id) {
            if tx.status == TransactionStatus::Pending {
                tx.needs_attention = true;
                tx.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn record_unmatched(&self, callback: UnmatchedCallback) -> Result<()> {
        self.unmatched.write().await.push(callback);
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MemoryLedger {
    async fn patch_order_payment(&self, order_id: &str, patch: &OrderPaymentPatch) -> Result<()> {
        self.order_patches
            .write()
            .await
            .push((order_id.to_string(), patch.clone()));
        Ok(())
    }
}
