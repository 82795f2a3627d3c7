pub mod invoice;
pub mod subscription;
pub mod subscription_plan;
pub mod user;
pub mod webhook_event;
