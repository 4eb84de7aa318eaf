use serde::{Deserialize, Serialize};

/// Checkout-initiated payment request. Fields are optional so that
/// presence checks stay in the service layer, which owns the
/// validation message the storefront relies on.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentRequest {
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub transaction_description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutStatusParams {
    #[serde(default)]
    pub checkout_request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentParams {
    #[serde(default)]
    pub order_id: Option<String>,
}

/// Receipt acknowledgement the gateway expects for every callback
/// delivery, structurally valid or not.
#[derive(Debug, Serialize, Deserialize)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i32,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl CallbackAck {
    pub fn accepted() -> Self {
        CallbackAck {
            result_code: 0,
            result_desc: "Accepted".to_string(),
        }
    }

    pub fn rejected(desc: impl Into<String>) -> Self {
        CallbackAck {
            result_code: 1,
            result_desc: desc.into(),
        }
    }
}
