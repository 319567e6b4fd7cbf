//! Lobby admission for the match lifecycle service
//!
//! A single FIFO queue collects players until it reaches the configured lobby
//! size, then drains into the first free match slot.

pub mod queue;

pub use queue::{LobbyEvent, LobbyQueue};
