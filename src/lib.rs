//! Draft Room - match lifecycle service for captain-drafted team matches
//!
//! Players queue in a lobby; a full lobby launches a match where two captains
//! draft their teams, pick factions, negotiate a map and ready up. Two timed
//! rounds are scored from gameplay telemetry. Commands arrive over AMQP and
//! notices are published back.

pub mod accounts;
pub mod amqp;
pub mod config;
pub mod error;
pub mod lobby;
pub mod maps;
pub mod matches;
pub mod metrics;
pub mod score;
pub mod service;
pub mod team;
pub mod telemetry;
pub mod timer;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::Notifier;
pub use lobby::LobbyQueue;
pub use matches::{MatchManager, MatchStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
