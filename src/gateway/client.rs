use crate::gateway::error::{GatewayError, GatewayResult};
use crate::gateway::types::{CreateOrderRequest, GatewayOrder, GatewayPayment};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{info, warn};

/// Gateway-side operations the reconciliation engine depends on. Injected as
/// a trait object so tests can substitute a double for the live API.
#[async_trait]
pub trait RazorpayGateway: Send + Sync {
    /// Create a gateway-side order for the given minor-unit amount.
    async fn create_order(&self, request: CreateOrderRequest) -> GatewayResult<GatewayOrder>;

    /// Fetch the authoritative payment entity by gateway payment id.
    async fn fetch_payment(&self, gateway_payment_id: &str) -> GatewayResult<GatewayPayment>;
}

pub const DEFAULT_BASE_URL: &str = "https://api.razorpay.com/v1";

/// Connection settings for the live client. Credentials and tuning knobs
/// come from the application config's Razorpay section.
#[derive(Debug, Clone)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for RazorpayConfig {
    fn default() -> Self {
        Self {
            key_id: String::new(),
            key_secret: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

/// reqwest-backed gateway client with basic auth and bounded retries on
/// transient upstream failures.
pub struct RazorpayClient {
    config: RazorpayConfig,
    client: Client,
}

impl RazorpayClient {
    pub fn new(config: RazorpayConfig) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::NetworkError {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> GatewayResult<T> {
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            let mut request = self
                .client
                .request(method.clone(), url)
                .basic_auth(&self.config.key_id, Some(&self.config.key_secret));
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let response = request
                .send()
                .await
                .map_err(|e| GatewayError::NetworkError {
                    message: format!("gateway request failed: {}", e),
                });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            GatewayError::ProviderError {
                                message: format!("invalid gateway JSON response: {}", e),
                                provider_code: None,
                                retryable: false,
                            }
                        });
                    }

                    if status.as_u16() == 429 {
                        if attempt < self.config.max_retries {
                            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                            continue;
                        }
                        return Err(GatewayError::RateLimitError {
                            message: "gateway rate limit exceeded".to_string(),
                            retry_after_seconds: None,
                        });
                    }

                    if status.is_server_error() && attempt < self.config.max_retries {
                        warn!(
                            status = %status,
                            attempt = attempt + 1,
                            "gateway server error, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }

                    // Razorpay wraps failures as {"error": {"code", "description"}}
                    let description = serde_json::from_str::<serde_json::Value>(&text)
                        .ok()
                        .and_then(|v| {
                            v.get("error")
                                .and_then(|e| e.get("description"))
                                .and_then(|d| d.as_str())
                                .map(|d| d.to_string())
                        })
                        .unwrap_or_else(|| format!("HTTP {}: {}", status, text));

                    return Err(GatewayError::ProviderError {
                        message: description,
                        provider_code: Some(status.as_u16().to_string()),
                        retryable: status.is_server_error(),
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(GatewayError::NetworkError {
            message: "gateway request failed".to_string(),
        }))
    }
}

#[async_trait]
impl RazorpayGateway for RazorpayClient {
    async fn create_order(&self, request: CreateOrderRequest) -> GatewayResult<GatewayOrder> {
        if request.amount <= 0 {
            return Err(GatewayError::ValidationError {
                message: "order amount must be a positive minor-unit integer".to_string(),
                field: Some("amount".to_string()),
            });
        }

        let payload = serde_json::json!({
            "amount": request.amount,
            "currency": request.currency,
            "receipt": request.receipt,
        });

        let order: GatewayOrder = self
            .request_json(reqwest::Method::POST, &self.endpoint("/orders"), Some(&payload))
            .await?;
        info!(gateway_order_id = %order.id, receipt = %request.receipt, "gateway order created");
        Ok(order)
    }

    async fn fetch_payment(&self, gateway_payment_id: &str) -> GatewayResult<GatewayPayment> {
        if gateway_payment_id.trim().is_empty() {
            return Err(GatewayError::ValidationError {
                message: "gateway payment id is required".to_string(),
                field: Some("gateway_payment_id".to_string()),
            });
        }
        self.request_json(
            reqwest::Method::GET,
            &self.endpoint(&format!("/payments/{}", gateway_payment_id)),
            None,
        )
        .await
    }
}
