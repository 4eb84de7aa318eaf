use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::transaction::TransactionStatus;

/// Failure reason recorded when the payer dismisses the STK prompt.
pub const USER_CANCELLED: &str = "User cancelled";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpesaCallbackPayload {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata", default, skip_serializing_if = "Option::is_none")]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item")]
    pub items: Vec<CallbackItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Value,
}

/// What a callback means for the matched transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    Completed {
        receipt: Option<String>,
        transaction_date: Option<i64>,
        amount: Option<u64>,
        phone_number: Option<String>,
    },
    Failed {
        reason: String,
    },
}

impl CallbackOutcome {
    pub fn terminal_status(&self) -> TransactionStatus {
        match self {
            CallbackOutcome::Completed { .. } => TransactionStatus::Completed,
            CallbackOutcome::Failed { .. } => TransactionStatus::Failed,
        }
    }

    pub fn receipt(&self) -> Option<&str> {
        match self {
            CallbackOutcome::Completed { receipt, .. } => receipt.as_deref(),
            CallbackOutcome::Failed { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            CallbackOutcome::Completed { .. } => None,
            CallbackOutcome::Failed { reason } => Some(reason),
        }
    }
}

impl StkCallback {
    /// Maps the gateway result to a terminal outcome. Code 0 is success,
    /// code 1 is the payer dismissing the prompt, anything else carries
    /// the gateway's own description.
    pub fn outcome(&self) -> CallbackOutcome {
        if self.result_code == 0 {
            let mut receipt = None;
            let mut transaction_date = None;
            let mut amount = None;
            let mut phone_number = None;
            if let Some(metadata) = &self.callback_metadata {
                for item in &metadata.items {
                    match item.name.as_str() {
                        "Amount" => amount = as_whole_units(&item.value),
                        "MpesaReceiptNumber" => receipt = as_text(&item.value),
                        "TransactionDate" => transaction_date = as_integer(&item.value),
                        "PhoneNumber" => phone_number = as_text(&item.value),
                        _ => {}
                    }
                }
            }
            CallbackOutcome::Completed {
                receipt,
                transaction_date,
                amount,
                phone_number,
            }
        } else if self.result_code == 1 {
            CallbackOutcome::Failed {
                reason: USER_CANCELLED.to_string(),
            }
        } else {
            CallbackOutcome::Failed {
                reason: self.result_desc.clone(),
            }
        }
    }
}

// Metadata values arrive as a mix of strings and numbers depending on the
// field, so each accessor accepts both.
fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn as_whole_units(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().map(|f| f as u64))
}
