use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use cartpay_backend::api::{self, AppState};
use cartpay_backend::config::{AppConfig, LogFormat};
use cartpay_backend::database::order_repository::OrderRepository;
use cartpay_backend::database::payment_record_repository::PaymentRecordRepository;
use cartpay_backend::database::init_pool_from_config;
use cartpay_backend::gateway::client::{RazorpayClient, RazorpayConfig};
use cartpay_backend::health::HealthChecker;
use cartpay_backend::services::notification::LogNotifier;
use cartpay_backend::services::reconciliation::{GatewaySecrets, ReconciliationEngine};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;
    config.validate()?;

    init_tracing(&config);

    info!(
        host = %config.server.host,
        port = config.server.port,
        "starting payment reconciliation backend"
    );

    let pool = init_pool_from_config(&config.database).await?;

    // validate() guarantees the credentials are present.
    let key_id = config.razorpay.key_id.clone().unwrap_or_default();
    let key_secret = config.razorpay.key_secret.clone().unwrap_or_default();
    let webhook_secret = config.razorpay.webhook_secret.clone().unwrap_or_default();

    let gateway = RazorpayClient::new(RazorpayConfig {
        key_id,
        key_secret: key_secret.clone(),
        base_url: config.razorpay.base_url.clone(),
        timeout_secs: config.razorpay.timeout_secs,
        max_retries: config.razorpay.max_retries,
    })?;

    let engine = ReconciliationEngine::new(
        Arc::new(OrderRepository::new(pool.clone())),
        Arc::new(PaymentRecordRepository::new(pool.clone())),
        Arc::new(gateway),
        Arc::new(LogNotifier::new()),
        GatewaySecrets {
            key_secret,
            webhook_secret,
        },
    );

    let health = HealthChecker::new(pool, config.razorpay.clone());

    let app = api::router(Arc::new(AppState { engine, health }));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "listening");

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_lowercase()));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        LogFormat::Plain => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
