use axum::extract::State;
use axum::{http::Method, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

mod config;
mod database;
mod dtos;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use config::AppConfig;
use database::mongo::MongoLedger;
use services::mpesa_service::MpesaService;
use services::payment_service::PaymentService;
use state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let db = match database::connection::connect(&config).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            std::process::exit(1);
        }
    };

    let app_state = initialize_app_state(db, &config).await;
    let app = build_router(app_state);
    start_server(app, &config).await;
}

async fn initialize_app_state(db: mongodb::Database, config: &AppConfig) -> AppState {
    let ledger = MongoLedger::new(db.clone());
    // Index creation needs a reachable server; a failure here leaves the
    // indexes to the next boot rather than blocking this one.
    if let Err(e) = ledger.ensure_indexes().await {
        tracing::warn!("Failed to create transaction indexes: {}", e);
    }
    let ledger = Arc::new(ledger);

    tracing::info!(
        "M-Pesa gateway: {} (shortcode {})",
        config.mpesa.environment,
        config.mpesa.shortcode
    );
    let mpesa = MpesaService::new(config.mpesa.clone());
    let payments = Arc::new(PaymentService::new(mpesa, ledger.clone(), ledger));

    services::sweeper::spawn(payments.clone(), config.sweep.clone());

    AppState::new(db, payments, config.mpesa.environment.clone())
}

fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .allow_credentials(false);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_check))
        .nest("/api/payments", routes::payments::payment_routes())
        .layer(cors)
        .with_state(app_state)
}

async fn start_server(app: Router, config: &AppConfig) {
    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("Invalid HOST/PORT ({}:{}): {}", config.host, config.port, e);
            std::process::exit(1);
        }
    };

    tracing::info!("🚀 Server starting on {}", addr);

    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    }
}

async fn root_handler() -> &'static str {
    "🚀 M-Pesa Payments Bridge"
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    use mongodb::bson::doc;

    let db_status = match state.db.run_command(doc! {"ping": 1}).await {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    Json(json!({
        "status": "healthy",
        "database": db_status,
        "mpesa": state.mpesa_environment,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
