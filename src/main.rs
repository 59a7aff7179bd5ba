//! Storefront Checkout - checkout-to-settlement service

use std::sync::Arc;

use anyhow::Result;
use secrecy::ExposeSecret;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront_checkout::api::{self, AppState, SERVICE_NAME};
use storefront_checkout::config::AppConfig;
use storefront_checkout::gateway::{StripeGateway, WebhookVerifier};
use storefront_checkout::services::{NatsNotifier, OrderNotifier, PaymentSettings, TracingNotifier};
use storefront_checkout::store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = AppConfig::from_env()?;
    tracing::debug!(?config, "configuration loaded");

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let pg = PgStore::connect(url.expose_secret()).await?;
            sqlx::migrate!("./migrations").run(pg.pool()).await?;
            Arc::new(pg)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let notifier: Arc<dyn OrderNotifier> = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Arc::new(NatsNotifier::new(client, "orders.events")),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, order events will only be logged");
                Arc::new(TracingNotifier)
            }
        },
        None => Arc::new(TracingNotifier),
    };

    let gateway = Arc::new(StripeGateway::new(config.stripe.api_base.clone(), config.stripe.secret_key.clone()));
    let verifier = WebhookVerifier::new(config.stripe.webhook_secret.clone(), config.stripe.webhook_tolerance_secs);
    let settings = PaymentSettings { currency: config.currency.clone(), client_url: config.client_url.clone(), timeout: config.gateway_timeout };
    let app = api::router(AppState::new(store, gateway, verifier, notifier, settings));

    tracing::info!("🚀 {} listening on 0.0.0.0:{}", SERVICE_NAME, config.port);
    axum::serve(tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?, app).await?;
    Ok(())
}
