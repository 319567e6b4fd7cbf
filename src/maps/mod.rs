//! Map negotiation between the two captains

pub mod pool;

pub use pool::{MapPool, PoolMapSelector};

use crate::types::{GameMap, MatchId};
use serde::Serialize;

/// Progress of a map negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MapStatus {
    Unconfirmed,
    Selected,
    Confirmed,
}

/// Per-match map negotiation
pub trait MapSelector: Send + Sync + std::fmt::Debug {
    fn status(&self) -> MapStatus;

    /// Propose a map by name or id. Returns the selection when the query
    /// designates exactly one map.
    fn select(&mut self, query: &str) -> Option<GameMap>;

    /// Lock in the current selection; false when nothing is selected
    fn confirm(&mut self) -> bool;

    /// The map, once confirmed
    fn map(&self) -> Option<&GameMap>;

    /// The current proposal, confirmed or not
    fn selection(&self) -> Option<&GameMap>;

    /// Give the selection back to the pool
    fn release(&mut self);
}

/// Creates one selector per launched match
pub trait MapSelectorFactory: Send + Sync {
    fn create(&self, match_id: MatchId) -> Box<dyn MapSelector>;
}
