//! Match status and its transition graph

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Free,
    Picking,
    Faction,
    Mapping,
    /// Accounts being lent, or countdown running
    Starting,
    /// Ready-check between rounds
    Waiting,
    Playing,
}

impl MatchStatus {
    /// Edges of the lifecycle graph. Any occupied state may abort to FREE.
    pub fn can_transition_to(self, next: MatchStatus) -> bool {
        use MatchStatus::*;
        matches!(
            (self, next),
            (Free, Picking)
                | (Picking, Faction)
                | (Faction, Mapping)
                | (Mapping, Starting)
                | (Starting, Waiting)
                | (Waiting, Starting)
                | (Starting, Playing)
                | (Playing, Waiting)
        ) || (self != Free && next == Free)
    }

    pub fn is_free(self) -> bool {
        self == MatchStatus::Free
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchStatus::Free => "free",
            MatchStatus::Picking => "picking",
            MatchStatus::Faction => "faction",
            MatchStatus::Mapping => "mapping",
            MatchStatus::Starting => "starting",
            MatchStatus::Waiting => "waiting",
            MatchStatus::Playing => "playing",
        };
        f.write_str(name)
    }
}
