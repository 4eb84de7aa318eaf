use mongodb::Database;
use std::sync::Arc;

use crate::services::payment_service::PaymentService;

/// Shared handler state. The payment service is always present: the
/// process refuses to start without gateway credentials.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub payments: Arc<PaymentService>,
    /// Which Daraja environment this process talks to, for /health.
    pub mpesa_environment: String,
}

impl AppState {
    pub fn new(db: Database, payments: Arc<PaymentService>, mpesa_environment: String) -> Self {
        AppState {
            db,
            payments,
            mpesa_environment,
        }
    }
}
