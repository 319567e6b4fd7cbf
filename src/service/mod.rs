//! Service layer for the draft-room service
//!
//! Application state, command dispatch, health probes and background task
//! management for the production service.

pub mod app;
pub mod health;

pub use app::{AppState, ProductionCommandHandler, ServiceError};
pub use health::{HealthCheck, HealthContext, HealthStatus};
