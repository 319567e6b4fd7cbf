//! Team and roster model
//!
//! A team is an index-addressed roster whose slot 0 is the captain. The
//! captain's `turn` flag is the handshake token used by the draft, faction,
//! map and ready-check phases of a match.

pub mod instance;
pub mod roster;

pub use instance::{Team, CAPTAIN_SLOT};
pub use roster::{Role, RosterEntry};
