pub mod billing;
pub mod event_log;
pub mod event_router;
pub mod identity;
pub mod user_resolution;
