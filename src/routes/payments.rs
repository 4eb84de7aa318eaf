use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::payment_handlers;
use crate::state::AppState;

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        // Initiation
        .route("/initiate", post(payment_handlers::initiate_payment))

        // Gateway callback (registered with Daraja as the CallBackURL)
        .route("/callback", post(payment_handlers::mpesa_callback))

        // Live gateway query; GET and POST both take query params
        .route(
            "/stk-status",
            get(payment_handlers::query_stk_status).post(payment_handlers::query_stk_status),
        )

        // Ledger reads
        .route("/status", get(payment_handlers::check_payment_status))
        .route("/verify", get(payment_handlers::verify_payment))
}
