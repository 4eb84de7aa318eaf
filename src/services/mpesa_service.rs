// services/mpesa_service.rs
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::{DateTime, FixedOffset, Utc};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{error, info};

use crate::config::MpesaConfig;
use crate::errors::{AppError, Result};

const TRANSACTION_TYPE: &str = "CustomerPayBillOnline";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Daraja timestamps are expressed in gateway-local time, UTC+3.
const GATEWAY_UTC_OFFSET_SECS: i32 = 3 * 3600;
/// Refresh the cached token this long before it actually expires.
const TOKEN_HEADROOM_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub expires_in: String,
}

#[derive(Debug, Serialize)]
pub struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Amount")]
    pub amount: u64,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "PhoneNumber")]
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    #[serde(rename = "AccountReference")]
    pub account_reference: String,
    #[serde(rename = "TransactionDesc")]
    pub transaction_desc: String,
}

#[derive(Debug, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "CustomerMessage", default)]
    pub customer_message: String,
}

impl StkPushResponse {
    pub fn is_accepted(&self) -> bool {
        self.response_code == "0"
    }
}

#[derive(Debug, Serialize)]
pub struct StkQueryRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
}

/// Raw gateway answer to a push-status query. `ResultCode` is absent
/// while the prompt is still open on the payer's handset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StkQueryResponse {
    #[serde(rename = "ResponseCode", default, skip_serializing_if = "Option::is_none")]
    pub response_code: Option<String>,
    #[serde(
        rename = "ResponseDescription",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub response_description: Option<String>,
    #[serde(
        rename = "MerchantRequestID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub merchant_request_id: Option<String>,
    #[serde(
        rename = "CheckoutRequestID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "ResultCode", default, skip_serializing_if = "Option::is_none")]
    pub result_code: Option<String>,
    #[serde(rename = "ResultDesc", default, skip_serializing_if = "Option::is_none")]
    pub result_desc: Option<String>,
}

fn gateway_timestamp(now: DateTime<Utc>) -> String {
    let offset = FixedOffset::east_opt(GATEWAY_UTC_OFFSET_SECS).expect("valid gateway offset");
    now.with_timezone(&offset).format("%Y%m%d%H%M%S").to_string()
}

#[derive(Clone)]
pub struct MpesaService {
    config: MpesaConfig,
    client: Client,
    cached_token: Arc<RwLock<Option<(String, DateTime<Utc>)>>>,
}

impl MpesaService {
    pub fn new(config: MpesaConfig) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        MpesaService {
            config,
            client,
            cached_token: Arc::new(RwLock::new(None)),
        }
    }

    fn generate_password(&self, timestamp: &str) -> String {
        let password_string = format!(
            "{}{}{}",
            self.config.shortcode, self.config.passkey, timestamp
        );
        base64.encode(password_string)
    }

    /// Client-credentials token, cached until shortly before expiry.
    /// Every failure mode collapses into `GatewayAuth`: callers cannot
    /// proceed without a token regardless of why it was refused.
    pub async fn get_access_token(&self) -> Result<String> {
        {
            let cached = self.cached_token.read().unwrap();
            if let Some((token, expiry)) = cached.as_ref() {
                if *expiry > Utc::now() + chrono::Duration::seconds(TOKEN_HEADROOM_SECS) {
                    return Ok(token.clone());
                }
            }
        }

        info!("Requesting new M-Pesa access token");
        let auth_string = format!(
            "{}:{}",
            self.config.consumer_key, self.config.consumer_secret
        );
        let encoded_auth = base64.encode(auth_string);

        let response = match self
            .client
            .get(self.config.auth_url())
            .header(header::AUTHORIZATION, format!("Basic {}", encoded_auth))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to reach M-Pesa auth endpoint: {}", e);
                return Err(AppError::GatewayAuth);
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Failed to get access token: {} - {}", status, body);
            return Err(AppError::GatewayAuth);
        }

        let auth_response: AuthResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("Malformed M-Pesa auth response: {}", e);
                return Err(AppError::GatewayAuth);
            }
        };

        let ttl_secs = auth_response.expires_in.parse::<i64>().unwrap_or(3600);
        {
            let expiry_time = Utc::now() + chrono::Duration::seconds(ttl_secs);
            let mut cached = self.cached_token.write().unwrap();
            *cached = Some((auth_response.access_token.clone(), expiry_time));
        }

        Ok(auth_response.access_token)
    }

    /// Submits an STK push. The returned `ResponseCode` is the gateway's
    /// accept/reject verdict, not the payment outcome; that arrives later
    /// on the callback URL.
    pub async fn stk_push(
        &self,
        phone_number: &str,
        amount: u64,
        account_reference: &str,
        transaction_desc: &str,
    ) -> Result<StkPushResponse> {
        let access_token = self.get_access_token().await?;
        let timestamp = gateway_timestamp(Utc::now());
        let password = self.generate_password(&timestamp);

        let stk_request = StkPushRequest {
            business_short_code: self.config.shortcode.clone(),
            password,
            timestamp,
            transaction_type: TRANSACTION_TYPE.to_string(),
            amount,
            party_a: phone_number.to_string(),
            party_b: self.config.shortcode.clone(),
            phone_number: phone_number.to_string(),
            callback_url: self.config.callback_url.clone(),
            account_reference: account_reference.to_string(),
            transaction_desc: transaction_desc.to_string(),
        };

        info!("STK push for {} - KSh {}", phone_number, amount);
        let response = self
            .client
            .post(self.config.stk_push_url())
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .json(&stk_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("STK push failed: {} - {}", status, body);
            return Err(AppError::Gateway(format!(
                "STK push failed with status {status}"
            )));
        }

        let stk_response: StkPushResponse = response.json().await?;
        info!(
            "STK push response for {}: code {}",
            stk_response.checkout_request_id, stk_response.response_code
        );
        Ok(stk_response)
    }

    /// Asks the gateway how a previously accepted push resolved.
    pub async fn query_stk_status(&self, checkout_request_id: &str) -> Result<StkQueryResponse> {
        let access_token = self.get_access_token().await?;
        let timestamp = gateway_timestamp(Utc::now());
        let password = self.generate_password(&timestamp);

        let query_request = StkQueryRequest {
            business_short_code: self.config.shortcode.clone(),
            password,
            timestamp,
            checkout_request_id: checkout_request_id.to_string(),
        };

        let response = self
            .client
            .post(self.config.stk_query_url())
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .json(&query_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("STK status query failed: {} - {}", status, body);
            return Err(AppError::Gateway(format!(
                "STK status query failed with status {status}"
            )));
        }

        let query_response: StkQueryResponse = response.json().await?;
        Ok(query_response)
    }
}
