// handlers/payment_handlers.rs
use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::dtos::payment_dtos::{
    CallbackAck, CheckoutStatusParams, InitiatePaymentRequest, InitiatePaymentResponse,
    VerifyPaymentParams,
};
use crate::errors::{AppError, Result};
use crate::models::callback::MpesaCallbackPayload;
use crate::services::mpesa_service::StkQueryResponse;
use crate::state::AppState;

// POST /api/payments/initiate
pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<Json<InitiatePaymentResponse>> {
    info!("Received payment initiation request: {:?}", request);
    let response = state.payments.initiate_payment(request).await?;
    Ok(Json(response))
}

// POST /api/payments/callback
//
// The gateway's asynchronous verdict. Unknown correlation ids are still
// acknowledged with ResultCode 0; a non-2xx answer would only make the
// gateway retry a callback we can never match.
pub async fn mpesa_callback(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    info!("Received M-Pesa callback: {}", payload);

    let parsed: MpesaCallbackPayload = match serde_json::from_value(payload.clone()) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Malformed M-Pesa callback: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(CallbackAck::rejected("Invalid callback structure")),
            );
        }
    };

    match state
        .payments
        .process_callback(parsed.body.stk_callback, payload)
        .await
    {
        Ok(()) => (StatusCode::OK, Json(CallbackAck::accepted())),
        Err(e) => {
            error!("Failed to process M-Pesa callback: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(CallbackAck::rejected(format!("An error occurred: {e}"))),
            )
        }
    }
}

// GET|POST /api/payments/stk-status
//
// Live gateway answer for a checkout request, passed through untranslated.
// The ledger stays the source of truth; this exists for support tooling.
pub async fn query_stk_status(
    State(state): State<AppState>,
    Query(params): Query<CheckoutStatusParams>,
) -> Result<Json<StkQueryResponse>> {
    let checkout_request_id = params
        .checkout_request_id
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::validation("checkoutRequestId is required"))?;

    info!("Querying STK status for {}", checkout_request_id);
    let response = state
        .payments
        .query_gateway_status(checkout_request_id)
        .await?;
    Ok(Json(response))
}

// GET /api/payments/status
pub async fn check_payment_status(
    State(state): State<AppState>,
    Query(params): Query<CheckoutStatusParams>,
) -> Result<Json<Value>> {
    let checkout_request_id = params
        .checkout_request_id
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::validation("checkoutRequestId is required"))?;

    let transaction = state
        .payments
        .status_by_checkout_request_id(checkout_request_id)
        .await?;
    Ok(Json(json!({
        "success": true,
        "status": transaction.status,
        "transaction": transaction,
    })))
}

// GET /api/payments/verify
pub async fn verify_payment(
    State(state): State<AppState>,
    Query(params): Query<VerifyPaymentParams>,
) -> Result<Json<Value>> {
    let order_id = params
        .order_id
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::validation("orderId is required"))?;

    let transaction = state.payments.status_by_order_id(order_id).await?;
    Ok(Json(json!({
        "success": true,
        "transaction": transaction,
    })))
}
