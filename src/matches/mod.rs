//! Match slots and their lifecycle
//!
//! A fixed set of matches cycles between FREE and the draft, faction, map,
//! ready-check and playing phases. [`MatchManager`] is the entry point for
//! every human decision and timer firing.

pub mod instance;
pub mod manager;
pub mod registry;
pub mod state;

pub use instance::{
    ClearReport, DraftProgress, FactionOutcome, Match, MatchSnapshot, PickReport, ReadyOutcome,
    RoundEnd, SubstituteReport, TeamSnapshot, TeamSummary, MAX_ROUNDS,
};
pub use manager::{Collaborators, MatchManager, MatchManagerStats};
pub use registry::{MatchRegistry, SharedMatch};
pub use state::MatchStatus;
