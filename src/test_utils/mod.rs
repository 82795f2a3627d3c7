//! Test utilities for integration testing.
//!
//! This module provides:
//! - Test data factories for creating valid test fixtures
//! - In-memory repository implementations for mocking persistence
//! - Mock provider/notifier and an app state builder for endpoint tests

mod app_state_builder;
mod factories;
mod provider_mocks;
mod repos;

pub use app_state_builder::*;
pub use factories::*;
pub use provider_mocks::*;
pub use repos::*;
