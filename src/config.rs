//! Service configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STRIPE_SECRET_KEY` - Payment gateway API key
//! - `STRIPE_WEBHOOK_SECRET` - Webhook endpoint signing secret
//!
//! ## Optional
//! - `DATABASE_URL` - `PostgreSQL` connection string (unset: in-memory store)
//! - `PORT` - Listen port (default: 8083)
//! - `NATS_URL` - Event bus for order notifications
//! - `STRIPE_API_BASE` - Gateway base URL (default: https://api.stripe.com)
//! - `CLIENT_URL` - Storefront URL for payment redirects (default: http://localhost:3000)
//! - `PAYMENT_CURRENCY` - ISO currency code (default: inr)
//! - `GATEWAY_TIMEOUT_SECS` - Bound on each gateway call (default: 10)
//! - `WEBHOOK_TOLERANCE_SECS` - Accepted webhook timestamp skew (default: 300)

use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

use crate::gateway::stripe::DEFAULT_API_BASE;

const DEFAULT_PORT: u16 = 8083;
const DEFAULT_CLIENT_URL: &str = "http://localhost:3000";
const DEFAULT_CURRENCY: &str = "inr";
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_WEBHOOK_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: Option<SecretString>,
    pub port: u16,
    pub nats_url: Option<String>,
    pub stripe: StripeConfig,
    pub client_url: String,
    pub currency: String,
    pub gateway_timeout: Duration,
}

/// Payment gateway credentials.
#[derive(Clone)]
pub struct StripeConfig {
    pub api_base: String,
    pub secret_key: SecretString,
    pub webhook_secret: SecretString,
    pub webhook_tolerance_secs: i64,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("port", &self.port)
            .field("nats_url", &self.nats_url)
            .field("stripe", &self.stripe)
            .field("client_url", &self.client_url)
            .field("currency", &self.currency)
            .field("gateway_timeout", &self.gateway_timeout)
            .finish()
    }
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("api_base", &self.api_base)
            .field("secret_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .field("webhook_tolerance_secs", &self.webhook_tolerance_secs)
            .finish()
    }
}

impl AppConfig {
    /// Reads the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| optional(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()));

        Ok(Self {
            database_url: optional("DATABASE_URL").map(SecretString::from),
            port: parse_or(optional("PORT"), "PORT", DEFAULT_PORT)?,
            nats_url: optional("NATS_URL"),
            stripe: StripeConfig {
                api_base: optional("STRIPE_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
                secret_key: SecretString::from(required("STRIPE_SECRET_KEY")?),
                webhook_secret: SecretString::from(required("STRIPE_WEBHOOK_SECRET")?),
                webhook_tolerance_secs: parse_or(optional("WEBHOOK_TOLERANCE_SECS"), "WEBHOOK_TOLERANCE_SECS", DEFAULT_WEBHOOK_TOLERANCE_SECS)?,
            },
            client_url: optional("CLIENT_URL").unwrap_or_else(|| DEFAULT_CLIENT_URL.to_string()),
            currency: optional("PAYMENT_CURRENCY").map_or_else(|| DEFAULT_CURRENCY.to_string(), |c| c.to_lowercase()),
            gateway_timeout: Duration::from_secs(parse_or(optional("GATEWAY_TIMEOUT_SECS"), "GATEWAY_TIMEOUT_SECS", DEFAULT_GATEWAY_TIMEOUT_SECS)?),
        })
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => v.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}
