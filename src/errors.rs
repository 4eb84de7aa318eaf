// src/errors.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Failed to authenticate with M-Pesa")]
    GatewayAuth,

    #[error("{message}")]
    GatewayRejection { code: String, message: String },

    #[error("M-Pesa request failed: {0}")]
    Gateway(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transaction not found")]
    TransactionNotFound,

    #[error("A payment for this order is already in progress")]
    PaymentInProgress,

    #[error("This order has already been paid")]
    AlreadyPaid,

    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::GatewayAuth => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::GatewayRejection { .. } => StatusCode::BAD_REQUEST,
            AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Http(_) => StatusCode::BAD_GATEWAY,
            AppError::TransactionNotFound => StatusCode::NOT_FOUND,
            AppError::PaymentInProgress => StatusCode::CONFLICT,
            AppError::AlreadyPaid => StatusCode::CONFLICT,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "Validation failed",
            AppError::GatewayAuth => "Gateway authentication failed",
            AppError::GatewayRejection { .. } => "Payment request rejected",
            AppError::Gateway(_) => "Gateway error",
            AppError::Http(_) => "Gateway unreachable",
            AppError::TransactionNotFound => "Transaction not found",
            AppError::PaymentInProgress => "Payment in progress",
            AppError::AlreadyPaid => "Already paid",
            AppError::Database(_) => "Database error",
            AppError::Config(_) => "Configuration error",
            AppError::Internal(_) => "Internal server error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let mut body = json!({
            "error": self.label(),
            "message": self.to_string(),
            "success": false,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let AppError::GatewayRejection { code, .. } = &self {
            body["responseCode"] = json!(code);
        }

        (status, Json(body)).into_response()
    }
}

// Helper conversion functions
impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn gateway(msg: impl Into<String>) -> Self {
        AppError::Gateway(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        AppError::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
