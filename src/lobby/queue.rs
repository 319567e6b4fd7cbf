//! FIFO admission queue of players waiting for a match

use crate::error::{MatchmakingError, Result};
use crate::timer::{TimerConfig, TimerScheduler, TimerState};
use crate::types::{Player, PlayerId};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// What an accepted `add` asks the caller to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyEvent {
    /// Nothing beyond the join notice
    Queued,
    /// The auto-ping threshold was crossed for this fill cycle
    PingThresholdReached,
    /// The lobby reached its configured size
    Full,
}

/// The lobby queue
#[derive(Debug)]
pub struct LobbyQueue {
    players: Vec<Player>,
    capacity: usize,
    ping_threshold: usize,
    stuck: bool,
    /// Set once the auto-ping fired (or was skipped) for the current fill cycle
    ping_consumed: bool,
    auto_ping: TimerScheduler,
    match_start: TimerScheduler,
}

impl LobbyQueue {
    pub fn new(capacity: usize, ping_threshold: usize, auto_ping: TimerConfig) -> Self {
        Self {
            players: Vec::with_capacity(capacity),
            capacity,
            ping_threshold,
            stuck: false,
            ping_consumed: false,
            auto_ping: TimerScheduler::new("lobby_auto_ping", auto_ping),
            match_start: TimerScheduler::new("lobby_match_start", TimerConfig::once(Duration::ZERO)),
        }
    }

    /// Append a player
    pub fn add(&mut self, player: Player) -> Result<LobbyEvent> {
        if self.contains(player.id) {
            return Err(MatchmakingError::invalid_action(format!(
                "{} is already in the lobby",
                player.name
            ))
            .into());
        }
        if self.is_full() {
            return Err(MatchmakingError::invalid_action("The lobby is full").into());
        }

        debug!("Lobby add - player: '{}', id: {}", player.name, player.id);
        self.players.push(player);

        if self.players.len() == self.capacity {
            info!("Lobby full - {} players waiting", self.players.len());
            return Ok(LobbyEvent::Full);
        }

        if self.players.len() > self.ping_threshold
            && !self.auto_ping.is_active()
            && !self.ping_consumed
        {
            self.ping_consumed = true;
            return Ok(LobbyEvent::PingThresholdReached);
        }

        Ok(LobbyEvent::Queued)
    }

    /// Remove a player. Clears the stuck flag and drops the pending ping once
    /// the lobby falls back to the threshold.
    pub fn remove(&mut self, player_id: PlayerId) -> Option<Player> {
        let index = self.players.iter().position(|p| p.id == player_id)?;
        let player = self.players.remove(index);
        self.stuck = false;

        if self.players.len() <= self.ping_threshold {
            self.cancel_auto_ping();
            self.ping_consumed = false;
        }

        debug!(
            "Lobby remove - player: '{}', remaining: {}",
            player.name,
            self.players.len()
        );
        Some(player)
    }

    /// Empty the queue; `None` when it was already empty
    pub fn clear(&mut self) -> Option<Vec<Player>> {
        if self.players.is_empty() {
            return None;
        }
        self.stuck = false;
        self.cancel_auto_ping();
        self.ping_consumed = false;
        Some(std::mem::take(&mut self.players))
    }

    /// Hand every queued player to a match
    pub fn drain_for_match(&mut self) -> Vec<Player> {
        self.stuck = false;
        self.cancel_auto_ping();
        self.ping_consumed = false;
        std::mem::take(&mut self.players)
    }

    /// Schedule the bounded-repeat lobby notification
    pub fn schedule_auto_ping<F, Fut>(&mut self, action: F) -> bool
    where
        F: FnMut(u32) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.auto_ping.start(action)
    }

    /// Schedule the single-shot match start
    pub fn schedule_match_start<F, Fut>(&mut self, action: F) -> bool
    where
        F: FnMut(u32) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.match_start.start(action)
    }

    pub fn cancel_auto_ping(&mut self) -> bool {
        self.auto_ping.cancel()
    }

    /// A slot was freed: no ping is needed until the next fill cycle
    pub fn mark_slot_freed(&mut self) {
        self.ping_consumed = true;
    }

    pub fn contains(&self, player_id: PlayerId) -> bool {
        self.players.iter().any(|p| p.id == player_id)
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ping_threshold(&self) -> usize {
        self.ping_threshold
    }

    pub fn is_stuck(&self) -> bool {
        self.stuck
    }

    pub fn set_stuck(&mut self, stuck: bool) {
        self.stuck = stuck;
    }

    pub fn auto_ping_state(&self) -> TimerState {
        self.auto_ping.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tokio_test::{assert_err, assert_ok};

    fn lobby(size: usize, threshold: usize) -> LobbyQueue {
        LobbyQueue::new(
            size,
            threshold,
            TimerConfig::repeating(Duration::from_secs(180), Duration::from_secs(60), 2),
        )
    }

    fn player(id: PlayerId) -> Player {
        Player::new(id, format!("player{}", id), id * 10)
    }

    #[test]
    fn test_threshold_and_full_events() {
        let mut queue = lobby(6, 4);
        for id in 1..=4 {
            assert_eq!(queue.add(player(id)).unwrap(), LobbyEvent::Queued);
        }
        assert_eq!(queue.add(player(5)).unwrap(), LobbyEvent::PingThresholdReached);
        assert_eq!(queue.add(player(6)).unwrap(), LobbyEvent::Full);
        assert!(queue.is_full());
    }

    #[test]
    fn test_ping_only_once_per_fill_cycle() {
        let mut queue = lobby(8, 4);
        for id in 1..=4 {
            queue.add(player(id)).unwrap();
        }
        assert_eq!(queue.add(player(5)).unwrap(), LobbyEvent::PingThresholdReached);
        assert_eq!(queue.add(player(6)).unwrap(), LobbyEvent::Queued);

        // still above the threshold: the cycle is not re-armed
        queue.remove(6);
        assert_eq!(queue.add(player(7)).unwrap(), LobbyEvent::Queued);

        // dropping to the threshold re-arms it
        queue.remove(7);
        queue.remove(5);
        assert_eq!(queue.add(player(8)).unwrap(), LobbyEvent::PingThresholdReached);
    }

    #[test]
    fn test_rejects_duplicates_and_overflow() {
        let mut queue = lobby(2, 1);
        assert_ok!(queue.add(player(1)));
        assert_err!(queue.add(player(1)));
        assert_ok!(queue.add(player(2)));
        assert_err!(queue.add(player(3)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_remove_clears_stuck() {
        let mut queue = lobby(3, 2);
        for id in 1..=3 {
            queue.add(player(id)).unwrap();
        }
        queue.set_stuck(true);

        assert!(queue.remove(42).is_none());
        assert!(queue.is_stuck());

        assert_eq!(queue.remove(2).unwrap().id, 2);
        assert!(!queue.is_stuck());
    }

    #[test]
    fn test_clear_empty_is_noop() {
        let mut queue = lobby(6, 4);
        assert!(queue.clear().is_none());

        queue.add(player(1)).unwrap();
        queue.add(player(2)).unwrap();
        let removed = queue.clear().unwrap();
        assert_eq!(removed.len(), 2);
        assert!(queue.is_empty());
        assert!(queue.clear().is_none());
    }

    #[test]
    fn test_drain_for_match_preserves_order() {
        let mut queue = lobby(3, 2);
        for id in [3, 1, 2] {
            queue.add(player(id)).unwrap();
        }
        let drained: Vec<_> = queue.drain_for_match().into_iter().map(|p| p.id).collect();
        assert_eq!(drained, vec![3, 1, 2]);
        assert!(queue.is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(PlayerId),
        Remove(PlayerId),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u64..20).prop_map(Op::Add),
            (1u64..20).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn prop_length_never_exceeds_capacity(ops in prop::collection::vec(op_strategy(), 0..200)) {
            let mut queue = lobby(6, 4);
            for op in ops {
                match op {
                    Op::Add(id) => {
                        if let Ok(LobbyEvent::Full) = queue.add(player(id)) {
                            prop_assert_eq!(queue.len(), 6);
                            // a full lobby is drained into a match
                            queue.drain_for_match();
                        }
                    }
                    Op::Remove(id) => {
                        queue.remove(id);
                    }
                }
                prop_assert!(queue.len() <= queue.capacity());
            }
        }

        #[test]
        fn prop_exactly_one_full_event_per_fill(extra in 0usize..5) {
            let mut queue = lobby(6, 4);
            let mut full_events = 0;
            for id in 1..=(6 + extra as u64) {
                if let Ok(LobbyEvent::Full) = queue.add(player(id)) {
                    full_events += 1;
                }
            }
            prop_assert_eq!(full_events, 1);
            prop_assert_eq!(queue.len(), 6);
        }
    }
}
