//! Gameplay telemetry used for scoring

pub mod client;
pub mod events;

pub use client::{CensusClient, MockTelemetryClient, TelemetryClient};
pub use events::{CaptureEvent, KillEvent};
