//! Utility functions for the match lifecycle service

use crate::error::{MatchmakingError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::path::Path;
use uuid::Uuid;

/// Generate a new unique correlation ID
pub fn generate_correlation_id() -> Uuid {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Current time in unix seconds, the unit used by the telemetry API
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Load a JSON data file (weapons, maps, accounts)
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| MatchmakingError::ConfigurationError {
        message: format!("Failed to read {}: {}", path.display(), e),
    })?;

    serde_json::from_str(&content).map_err(|e| {
        MatchmakingError::ConfigurationError {
            message: format!("Failed to parse {}: {}", path.display(), e),
        }
        .into()
    })
}
