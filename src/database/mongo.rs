use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::bson::{self, doc, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Collection, Database, IndexModel};
use tracing::warn;

use crate::database::ledger::{FinalizeResult, OrderPaymentPatch, OrderStore, TransactionLedger};
use crate::errors::{AppError, Result};
use crate::models::callback::CallbackOutcome;
use crate::models::transaction::{Transaction, TransactionStatus, UnmatchedCallback};

const TRANSACTIONS_COLLECTION: &str = "transactions";
const ORDERS_COLLECTION: &str = "orders";
const UNMATCHED_COLLECTION: &str = "unmatched_callbacks";

#[derive(Clone)]
pub struct MongoLedger {
    db: Database,
}

impl MongoLedger {
    pub fn new(db: Database) -> Self {
        MongoLedger { db }
    }

    fn transactions(&self) -> Collection<Transaction> {
        self.db.collection(TRANSACTIONS_COLLECTION)
    }

    fn orders(&self) -> Collection<Document> {
        self.db.collection(ORDERS_COLLECTION)
    }

    fn unmatched(&self) -> Collection<UnmatchedCallback> {
        self.db.collection(UNMATCHED_COLLECTION)
    }

    /// One transaction per order, and fast lookups on the two access
    /// paths the handlers and the sweeper use.
    pub async fn ensure_indexes(&self) -> Result<()> {
        let unique = IndexOptions::builder().unique(true).build();
        self.transactions()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "orderId": 1 })
                    .options(unique)
                    .build(),
            )
            .await?;
        self.transactions()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "checkoutRequestId": 1 })
                    .build(),
            )
            .await?;
        self.transactions()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "status": 1, "updatedAt": 1 })
                    .build(),
            )
            .await?;
        Ok(())
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == 11000
    )
}

fn terminal_update(outcome: &CallbackOutcome, now: DateTime<Utc>) -> Document {
    let mut set = doc! { "updatedAt": bson::DateTime::from_chrono(now) };
    match outcome {
        CallbackOutcome::Completed {
            receipt,
            transaction_date,
            amount,
            phone_number,
        } => {
            set.insert("status", TransactionStatus::Completed.as_str());
            if let Some(receipt) = receipt {
                set.insert("mpesaReceiptNumber", receipt);
            }
            if let Some(date) = transaction_date {
                set.insert("transactionDate", date);
            }
            if let Some(amount) = amount {
                set.insert("amount", *amount as i64);
            }
            if let Some(phone) = phone_number {
                set.insert("phoneNumber", phone);
            }
        }
        CallbackOutcome::Failed { reason } => {
            set.insert("status", TransactionStatus::Failed.as_str());
            set.insert("failureReason", reason);
        }
    }
    doc! { "$set": set }
}

#[async_trait]
impl TransactionLedger for MongoLedger {
    async fn create_submitting(
        &self,
        tx: Transaction,
        resubmit_cutoff: DateTime<Utc>,
    ) -> Result<()> {
        match self.transactions().insert_one(&tx).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => {
                // Retry path: take over the slot only from a failed attempt
                // or a submitting record that was abandoned mid-flight.
                let replaceable = doc! {
                    "orderId": &tx.order_id,
                    "$or": [
                        { "status": TransactionStatus::Failed.as_str() },
                        {
                            "status": TransactionStatus::Submitting.as_str(),
                            "updatedAt": { "$lt": bson::DateTime::from_chrono(resubmit_cutoff) },
                        },
                    ],
                };
                let replaced = self.transactions().replace_one(replaceable, &tx).await?;
                if replaced.matched_count == 1 {
                    return Ok(());
                }
                match self
                    .transactions()
                    .find_one(doc! { "orderId": &tx.order_id })
                    .await?
                {
                    Some(existing) if existing.status == TransactionStatus::Completed => {
                        Err(AppError::AlreadyPaid)
                    }
                    _ => Err(AppError::PaymentInProgress),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_pending(
        &self,
        order_id: &str,
        checkout_request_id: &str,
        merchant_request_id: &str,
    ) -> Result<()> {
        let filter = doc! {
            "orderId": order_id,
            "status": TransactionStatus::Submitting.as_str(),
        };
        let update = doc! {
            "$set": {
                "status": TransactionStatus::Pending.as_str(),
                "checkoutRequestId": checkout_request_id,
                "merchantRequestId": merchant_request_id,
                "updatedAt": bson::DateTime::from_chrono(Utc::now()),
            }
        };
        let updated = self.transactions().update_one(filter, update).await?;
        if updated.matched_count == 0 {
            return Err(AppError::internal(format!(
                "no submitting transaction to promote for order {order_id}"
            )));
        }
        Ok(())
    }

    async fn discard_submitting(&self, order_id: &str) -> Result<()> {
        self.transactions()
            .delete_one(doc! {
                "orderId": order_id,
                "status": TransactionStatus::Submitting.as_str(),
            })
            .await?;
        Ok(())
    }

    async fn finalize(
        &self,
        checkout_request_id: &str,
        outcome: &CallbackOutcome,
    ) -> Result<FinalizeResult> {
        let filter = doc! {
            "checkoutRequestId": checkout_request_id,
            "status": TransactionStatus::Pending.as_str(),
        };
        let update = terminal_update(outcome, Utc::now());
        let finalized = self
            .transactions()
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await?;
        if let Some(tx) = finalized {
            return Ok(FinalizeResult::Finalized(tx));
        }
        match self
            .transactions()
            .find_one(doc! { "checkoutRequestId": checkout_request_id })
            .await?
        {
            Some(tx) => Ok(FinalizeResult::AlreadyTerminal(tx)),
            None => Ok(FinalizeResult::NotFound),
        }
    }

    async fn find_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<Transaction>> {
        let tx = self
            .transactions()
            .find_one(doc! { "checkoutRequestId": checkout_request_id })
            .await?;
        Ok(tx)
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Transaction>> {
        let tx = self
            .transactions()
            .find_one(doc! { "orderId": order_id })
            .await?;
        Ok(tx)
    }

    async fn stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<Transaction>> {
        let filter = doc! {
            "status": TransactionStatus::Pending.as_str(),
            "needsAttention": { "$ne": true },
            "updatedAt": { "$lt": bson::DateTime::from_chrono(cutoff) },
        };
        let cursor = self
            .transactions()
            .find(filter)
            .sort(doc! { "updatedAt": 1 })
            .await?;
        let stale: Vec<Transaction> = cursor.try_collect().await?;
        Ok(stale)
    }

    async fn flag_needs_attention(&self, order_id: &str) -> Result<()> {
        let filter = doc! {
            "orderId": order_id,
            "status": TransactionStatus::Pending.as_str(),
        };
        let update = doc! {
            "$set": {
                "needsAttention": true,
                "updatedAt": bson::DateTime::from_chrono(Utc::now()),
            }
        };
        self.transactions().update_one(filter, update).await?;
        Ok(())
    }

    async fn record_unmatched(&self, callback: UnmatchedCallback) -> Result<()> {
        self.unmatched().insert_one(&callback).await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MongoLedger {
    async fn patch_order_payment(&self, order_id: &str, patch: &OrderPaymentPatch) -> Result<()> {
        let mut set = doc! {
            "paymentStatus": patch.payment_status.as_str(),
            "updatedAt": bson::DateTime::from_chrono(Utc::now()),
        };
        if let Some(receipt) = &patch.receipt {
            set.insert("mpesaReceiptNumber", receipt);
            set.insert("transactionId", receipt);
        }
        if let Some(reason) = &patch.failure_reason {
            set.insert("failureReason", reason);
        }

        // Orders use the storefront's own ids as document ids.
        let updated = self
            .orders()
            .update_one(doc! { "_id": order_id }, doc! { "$set": set })
            .await?;
        if updated.matched_count == 0 {
            warn!("Order {} not found while patching payment fields", order_id);
        }
        Ok(())
    }
}
