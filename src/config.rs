// config.rs
use std::env;
use std::str::FromStr;

use crate::errors::{AppError, Result};

const SANDBOX_BASE_URL: &str = "https://sandbox.safaricom.co.ke";
const PRODUCTION_BASE_URL: &str = "https://api.safaricom.co.ke";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub database_name: String,
    pub mpesa: MpesaConfig,
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub callback_url: String,
    pub environment: String,
    /// Overrides the environment-derived Daraja base URL when set.
    pub base_url: Option<String>,
}

/// Knobs for the background reconciliation sweep. An interval of zero
/// disables the sweeper entirely.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub interval_secs: u64,
    pub pending_after_secs: i64,
    pub give_up_after_secs: i64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let mpesa = MpesaConfig {
            consumer_key: require("MPESA_CONSUMER_KEY")?,
            consumer_secret: require("MPESA_CONSUMER_SECRET")?,
            shortcode: require("MPESA_SHORTCODE")?,
            passkey: require("MPESA_PASSKEY")?,
            callback_url: require("MPESA_CALLBACK_URL")?,
            environment: env::var("MPESA_ENVIRONMENT").unwrap_or_else(|_| "sandbox".to_string()),
            base_url: env::var("MPESA_BASE_URL").ok(),
        };

        let sweep = SweepConfig {
            interval_secs: env_number("SWEEP_INTERVAL_SECS", 300)?,
            pending_after_secs: env_number("SWEEP_PENDING_AFTER_SECS", 300)?,
            give_up_after_secs: env_number("SWEEP_GIVE_UP_AFTER_SECS", 86_400)?,
        };

        Ok(AppConfig {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_number("PORT", 3000)?,
            database_url: require("DATABASE_URL")?,
            database_name: env::var("DATABASE_NAME").unwrap_or_else(|_| "payments".to_string()),
            mpesa,
            sweep,
        })
    }
}

impl MpesaConfig {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn api_base_url(&self) -> String {
        if let Some(url) = &self.base_url {
            return url.trim_end_matches('/').to_string();
        }
        if self.is_production() {
            PRODUCTION_BASE_URL.to_string()
        } else {
            SANDBOX_BASE_URL.to_string()
        }
    }

    pub fn auth_url(&self) -> String {
        format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.api_base_url()
        )
    }

    pub fn stk_push_url(&self) -> String {
        format!("{}/mpesa/stkpush/v1/processrequest", self.api_base_url())
    }

    pub fn stk_query_url(&self) -> String {
        format!("{}/mpesa/stkpushquery/v1/query", self.api_base_url())
    }
}

impl SweepConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    pub fn pending_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pending_after_secs)
    }

    pub fn give_up_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.give_up_after_secs)
    }
}

fn require(key: &str) -> Result<String> {
    env::var(key).map_err(|_| AppError::Config(format!("{key} must be set")))
}

fn env_number<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} must be a number"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
impl MpesaConfig {
    pub fn for_tests(base_url: impl Into<String>) -> Self {
        MpesaConfig {
            consumer_key: "test_consumer_key".to_string(),
            consumer_secret: "test_consumer_secret".to_string(),
            shortcode: "174379".to_string(),
            passkey: "test_passkey".to_string(),
            callback_url: "https://example.com/api/payments/callback".to_string(),
            environment: "sandbox".to_string(),
            base_url: Some(base_url.into()),
        }
    }
}
