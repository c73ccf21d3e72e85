// libs/payment-cell/src/services/qpay.rs
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use shared_config::AppConfig;

use crate::models::{
    InvoiceRequest, PaymentCheck, PaymentError, ProviderInvoice, QPayAuthResponse, QPayInvoiceRequest,
    QPayOffset, QPayPaymentCheckRequest,
};

/// Tokens are treated as expired this long before the provider says so.
const TOKEN_SAFETY_MARGIN_SECS: i64 = 60;

/// The external party that issues QR invoices and reports payments.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<ProviderInvoice, PaymentError>;

    async fn check_payment(&self, invoice_id: &str) -> Result<PaymentCheck, PaymentError>;

    async fn cancel_invoice(&self, invoice_id: &str) -> Result<(), PaymentError>;
}

#[derive(Debug, Default)]
struct TokenCache {
    access_token: Option<String>,
    access_expires_at: Option<Instant>,
    refresh_token: Option<String>,
    refresh_expires_at: Option<Instant>,
}

impl TokenCache {
    fn valid_access_token(&self) -> Option<String> {
        match (&self.access_token, self.access_expires_at) {
            (Some(token), Some(expires_at)) if Instant::now() < expires_at => Some(token.clone()),
            _ => None,
        }
    }

    fn valid_refresh_token(&self) -> Option<String> {
        match (&self.refresh_token, self.refresh_expires_at) {
            (Some(token), Some(expires_at)) if Instant::now() < expires_at => Some(token.clone()),
            _ => None,
        }
    }

    fn store(&mut self, auth: QPayAuthResponse) -> String {
        let now = Instant::now();
        self.access_expires_at = Some(now + lifetime(auth.expires_in));
        self.refresh_expires_at = Some(now + lifetime(auth.refresh_expires_in));
        self.refresh_token = auth.refresh_token;
        self.access_token = Some(auth.access_token.clone());
        auth.access_token
    }

    fn invalidate_access(&mut self) {
        self.access_token = None;
        self.access_expires_at = None;
    }
}

fn lifetime(expires_in_secs: i64) -> Duration {
    Duration::from_secs((expires_in_secs - TOKEN_SAFETY_MARGIN_SECS).max(0) as u64)
}

/// QPay merchant API v2 client.
///
/// Built once at startup and shared; the token cache lives inside the
/// client, so every caller holding the same instance reuses one session.
pub struct QPayClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    invoice_code: String,
    callback_url: String,
    configured: bool,
    tokens: Mutex<TokenCache>,
}

impl QPayClient {
    pub fn new(config: &AppConfig) -> Result<Self, PaymentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.qpay_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.qpay_base_url.trim_end_matches('/').to_string(),
            username: config.qpay_username.clone(),
            password: config.qpay_password.clone(),
            invoice_code: config.qpay_invoice_code.clone(),
            callback_url: config.qpay_callback_url.clone(),
            configured: config.is_payment_provider_configured(),
            tokens: Mutex::new(TokenCache::default()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Callback the provider will hit, tagged with our own invoice number.
    pub fn callback_url_for(&self, sender_invoice_no: &str) -> String {
        format!(
            "{}?invoice_id={}",
            self.callback_url,
            urlencoding::encode(sender_invoice_no)
        )
    }

    /// POST /auth/token with basic credentials.
    async fn authenticate(&self, cache: &mut TokenCache) -> Result<String, PaymentError> {
        if !self.configured {
            return Err(PaymentError::NotConfigured);
        }

        debug!("Authenticating with QPay at {}", self.base_url);

        let response = self
            .client
            .post(self.url("/auth/token"))
            .basic_auth(&self.username, Some(&self.password))
            .json(&json!({}))
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;

        if !status.is_success() {
            error!("QPay authentication failed: {} - {}", status, response_text);
            return Err(PaymentError::Provider(format!(
                "Authentication failed: HTTP {}: {}",
                status, response_text
            )));
        }

        let auth: QPayAuthResponse = serde_json::from_str(&response_text)
            .map_err(|e| PaymentError::Provider(format!("Failed to parse auth response: {}", e)))?;

        info!("QPay authenticated successfully");
        Ok(cache.store(auth))
    }

    /// POST /auth/refresh with the refresh token; falls back to a full
    /// authentication when the refresh is refused.
    async fn refresh(&self, cache: &mut TokenCache, refresh_token: &str) -> Result<String, PaymentError> {
        debug!("Refreshing QPay access token");

        let response = self
            .client
            .post(self.url("/auth/refresh"))
            .bearer_auth(refresh_token)
            .json(&json!({}))
            .send()
            .await;

        let response = match response {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!("QPay token refresh refused with {}, re-authenticating", response.status());
                return self.authenticate(cache).await;
            }
            Err(e) => {
                warn!("QPay token refresh failed: {}, re-authenticating", e);
                return self.authenticate(cache).await;
            }
        };

        let response_text = response.text().await?;
        match serde_json::from_str::<QPayAuthResponse>(&response_text) {
            Ok(auth) => Ok(cache.store(auth)),
            Err(e) => {
                warn!("Unreadable QPay refresh response: {}, re-authenticating", e);
                self.authenticate(cache).await
            }
        }
    }

    /// A usable access token, refreshing or re-authenticating as needed.
    async fn access_token(&self) -> Result<String, PaymentError> {
        let mut cache = self.tokens.lock().await;

        if let Some(token) = cache.valid_access_token() {
            return Ok(token);
        }

        match cache.valid_refresh_token() {
            Some(refresh_token) => self.refresh(&mut cache, &refresh_token).await,
            None => self.authenticate(&mut cache).await,
        }
    }

    async fn reauthenticate(&self) -> Result<String, PaymentError> {
        let mut cache = self.tokens.lock().await;
        cache.invalidate_access();
        self.authenticate(&mut cache).await
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        token: &str,
        body: Option<&Value>,
    ) -> Result<(StatusCode, String), PaymentError> {
        let mut request = self.client.request(method.clone(), url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let response_text = response.text().await?;
        Ok((status, response_text))
    }

    /// Authorized call that re-authenticates once on a 401.
    async fn authorized_request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<String, PaymentError> {
        let url = self.url(path);
        let token = self.access_token().await?;

        debug!("QPay request: {} {}", method, url);

        let (mut status, mut response_text) = self.send(&method, &url, &token, body.as_ref()).await?;

        if status == StatusCode::UNAUTHORIZED {
            warn!("QPay rejected the access token for {} {}, re-authenticating", method, path);
            let token = self.reauthenticate().await?;
            (status, response_text) = self.send(&method, &url, &token, body.as_ref()).await?;

            if status == StatusCode::UNAUTHORIZED {
                error!("QPay still unauthorized after re-authentication: {}", response_text);
                return Err(PaymentError::Unauthorized);
            }
        }

        debug!("QPay response: {} - {}", status, response_text);

        if !status.is_success() {
            error!("QPay request {} {} failed: {} - {}", method, path, status, response_text);
            return Err(PaymentError::Provider(format!("HTTP {}: {}", status, response_text)));
        }

        Ok(response_text)
    }
}

#[async_trait]
impl PaymentProvider for QPayClient {
    /// POST /invoice
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<ProviderInvoice, PaymentError> {
        info!(
            "Creating QPay invoice {} for {}",
            request.sender_invoice_no, request.amount
        );

        let body = QPayInvoiceRequest {
            invoice_code: self.invoice_code.clone(),
            sender_invoice_no: request.sender_invoice_no.clone(),
            invoice_receiver_code: request.receiver_code.clone(),
            invoice_description: request.description.clone(),
            amount: request.amount,
            callback_url: self.callback_url_for(&request.sender_invoice_no),
        };
        let body = serde_json::to_value(&body)
            .map_err(|e| PaymentError::Provider(format!("Failed to encode invoice: {}", e)))?;

        let response_text = self.authorized_request(Method::POST, "/invoice", Some(body)).await?;

        let invoice: ProviderInvoice = serde_json::from_str(&response_text)
            .map_err(|e| PaymentError::Provider(format!("Failed to parse invoice response: {}", e)))?;

        info!("QPay invoice created: {}", invoice.invoice_id);
        Ok(invoice)
    }

    /// POST /payment/check
    async fn check_payment(&self, invoice_id: &str) -> Result<PaymentCheck, PaymentError> {
        let body = QPayPaymentCheckRequest {
            object_type: "INVOICE".to_string(),
            object_id: invoice_id.to_string(),
            offset: QPayOffset {
                page_number: 1,
                page_limit: 100,
            },
        };
        let body = serde_json::to_value(&body)
            .map_err(|e| PaymentError::Provider(format!("Failed to encode payment check: {}", e)))?;

        let response_text = self
            .authorized_request(Method::POST, "/payment/check", Some(body))
            .await?;

        let check: PaymentCheck = serde_json::from_str(&response_text)
            .map_err(|e| PaymentError::Provider(format!("Failed to parse payment check: {}", e)))?;

        debug!(
            "QPay invoice {}: {} payment(s), {} paid",
            invoice_id,
            check.count,
            check.total_paid()
        );
        Ok(check)
    }

    /// DELETE /invoice/{invoice_id}
    async fn cancel_invoice(&self, invoice_id: &str) -> Result<(), PaymentError> {
        let path = format!("/invoice/{}", urlencoding::encode(invoice_id));
        self.authorized_request(Method::DELETE, &path, None).await?;

        info!("QPay invoice cancelled: {}", invoice_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_lifetime_keeps_a_safety_margin() {
        assert_eq!(lifetime(3600), Duration::from_secs(3540));
        assert_eq!(lifetime(30), Duration::ZERO);
    }

    #[test]
    fn stored_tokens_expire_early() {
        let mut cache = TokenCache::default();
        let token = cache.store(QPayAuthResponse {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_in: 30,
            refresh_expires_in: 3600,
        });

        assert_eq!(token, "access");
        assert!(cache.valid_access_token().is_none());
        assert_eq!(cache.valid_refresh_token().as_deref(), Some("refresh"));
    }
}
