//! Score reconciliation
//!
//! At the end of each round the [`ScoreProcessor`] pulls kill and capture
//! telemetry for the round window and folds it into the per-loadout tallies
//! of both ready teams.

pub mod processor;
pub mod stats;
pub mod weapons;

pub use processor::{
    roster_index, tally_captures, tally_kills, CaptureSummary, IllegalWeaponReport, RosterIndex,
    RoundContext, RoundScoreReport, ScoreProcessor,
};
pub use stats::{LoadoutStat, PlayerScore, TeamScore};
pub use weapons::{WeaponCatalog, UNKNOWN_WEAPON_ID};
