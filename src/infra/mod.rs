pub mod app;
pub mod clerk_verifier;
pub mod config;
pub mod db;
pub mod http_client;
pub mod resend_notifier;
pub mod setup;
pub mod stripe_client;
