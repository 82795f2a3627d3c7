use std::net::SocketAddr;

use axum::http::HeaderValue;
use env_helpers::{get_env, get_env_default};
use secrecy::SecretString;

pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub cors_origin: HeaderValue,
    pub database_url: String,
    /// Secret API key for the billing provider.
    pub stripe_secret_key: SecretString,
    /// Signing secret for billing webhooks.
    pub stripe_webhook_secret: SecretString,
    /// Signing secret for identity webhooks (whsec_-prefixed).
    pub clerk_webhook_secret: SecretString,
    pub resend_api_key: SecretString,
    pub email_from: String,
    /// When false, webhook deliveries are processed without audit logging.
    pub enable_webhook_logging: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let bind_addr: SocketAddr = get_env_default("BIND_ADDR", "127.0.0.1:3001".parse().unwrap());
        let cors_origin: HeaderValue =
            get_env_default("CORS_ORIGIN", String::from("http://localhost:3000"))
                .parse()
                .expect("CORS_ORIGIN must be a valid header value");
        let database_url: String = get_env("DATABASE_URL");
        let stripe_secret_key = SecretString::new(get_env::<String>("STRIPE_SECRET_KEY").into());
        let stripe_webhook_secret =
            SecretString::new(get_env::<String>("STRIPE_WEBHOOK_SECRET").into());
        let clerk_webhook_secret =
            SecretString::new(get_env::<String>("CLERK_WEBHOOK_SECRET").into());
        let resend_api_key = SecretString::new(get_env::<String>("RESEND_API_KEY").into());
        let email_from: String = get_env_default("EMAIL_FROM", "billing@example.com".to_string());
        let enable_webhook_logging: bool = get_env_default("ENABLE_WEBHOOK_LOGGING", true);

        Self {
            bind_addr,
            cors_origin,
            database_url,
            stripe_secret_key,
            stripe_webhook_secret,
            clerk_webhook_secret,
            resend_api_key,
            email_from,
            enable_webhook_logging,
        }
    }
}
