use chrono::{DateTime, Utc};
use mongodb::bson;
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const PAYMENT_METHOD_MPESA: &str = "mpesa";

/// Lifecycle of a payment attempt. Transitions only move forward:
/// `Submitting -> Pending -> Completed | Failed`, and a terminal status
/// is never overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Recorded locally, gateway push not yet acknowledged.
    Submitting,
    /// Push accepted by the gateway, waiting for the payer to act.
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Submitting => "submitting",
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed | TransactionStatus::Failed
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub order_id: String,
    pub phone_number: String,
    /// Whole currency units, fractions truncated at initiation.
    pub amount: u64,
    pub payment_method: String,
    pub status: TransactionStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mpesa_receipt_number: Option<String>,
    /// Gateway-format completion time, YYYYMMDDHHMMSS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Set by the reconciliation sweep once a pending payment has gone
    /// unresolved past the give-up age.
    #[serde(default)]
    pub needs_attention: bool,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new_submitting(
        order_id: impl Into<String>,
        phone_number: impl Into<String>,
        amount: u64,
        customer_email: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Transaction {
            id: None,
            order_id: order_id.into(),
            phone_number: phone_number.into(),
            amount,
            payment_method: PAYMENT_METHOD_MPESA.to_string(),
            status: TransactionStatus::Submitting,
            checkout_request_id: None,
            merchant_request_id: None,
            customer_email,
            mpesa_receipt_number: None,
            transaction_date: None,
            failure_reason: None,
            needs_attention: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Dead-letter record for a gateway callback that matched no transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmatchedCallback {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub result_code: i64,
    pub result_desc: String,
    /// The callback body as delivered, kept for manual replay.
    pub payload: serde_json::Value,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub received_at: DateTime<Utc>,
}
