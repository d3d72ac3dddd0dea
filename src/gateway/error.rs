use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid signature: {message}")]
    InvalidSignature { message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Gateway error: {message}")]
    ProviderError {
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::ValidationError { .. } => false,
            GatewayError::InvalidSignature { .. } => false,
            GatewayError::NetworkError { .. } => true,
            GatewayError::RateLimitError { .. } => true,
            GatewayError::ProviderError { retryable, .. } => *retryable,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            GatewayError::ValidationError { .. } => 400,
            GatewayError::InvalidSignature { .. } => 400,
            GatewayError::NetworkError { .. } => 503,
            GatewayError::RateLimitError { .. } => 429,
            GatewayError::ProviderError { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            GatewayError::ValidationError { message, .. } => message.clone(),
            GatewayError::InvalidSignature { .. } => "Invalid payment signature".to_string(),
            GatewayError::NetworkError { .. } => {
                "Payment gateway is temporarily unavailable".to_string()
            }
            GatewayError::RateLimitError { .. } => {
                "Too many requests to payment gateway. Please retry shortly".to_string()
            }
            GatewayError::ProviderError { message, .. } => {
                format!("Payment gateway returned an error: {}", message)
            }
        }
    }
}
