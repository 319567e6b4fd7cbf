//! Fixed set of match slots

use crate::config::MatchmakingSettings;
use crate::error::{MatchmakingError, Result};
use crate::matches::instance::Match;
use crate::types::MatchId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

pub type SharedMatch = Arc<Mutex<Match>>;

#[derive(Debug)]
struct Slot {
    id: MatchId,
    shared: SharedMatch,
    free: Arc<AtomicBool>,
}

/// The configured match slots. Slots are never created or destroyed at runtime.
#[derive(Debug, Clone)]
pub struct MatchRegistry {
    slots: Arc<Vec<Slot>>,
}

impl MatchRegistry {
    pub fn new(settings: &MatchmakingSettings) -> Self {
        let slots = settings
            .match_ids
            .iter()
            .map(|&id| {
                let m = Match::new(id, settings);
                Slot {
                    id,
                    free: m.free_marker(),
                    shared: Arc::new(Mutex::new(m)),
                }
            })
            .collect();
        Self {
            slots: Arc::new(slots),
        }
    }

    /// Slot with the given id, `ElementNotFound` otherwise
    pub fn get(&self, id: MatchId) -> Result<SharedMatch> {
        self.slots
            .iter()
            .find(|slot| slot.id == id)
            .map(|slot| slot.shared.clone())
            .ok_or_else(|| MatchmakingError::not_found("Match", id).into())
    }

    /// Whether any slot is FREE. Never waits on a match lock.
    pub fn has_free(&self) -> bool {
        self.slots.iter().any(|slot| slot.free.load(Ordering::Acquire))
    }

    /// First slot in FREE status, locked.
    ///
    /// Only slots flagged FREE are locked, so a match busy with a round is
    /// never waited on. A FREE slot held for a query is awaited.
    pub async fn find_free(&self) -> Option<OwnedMutexGuard<Match>> {
        for slot in self.slots.iter() {
            if !slot.free.load(Ordering::Acquire) {
                continue;
            }
            let guard = slot.shared.clone().lock_owned().await;
            if guard.status().is_free() {
                return Some(guard);
            }
            debug!("Match slot {} taken while waiting for its lock", slot.id);
        }
        None
    }

    pub fn ids(&self) -> Vec<MatchId> {
        self.slots.iter().map(|slot| slot.id).collect()
    }

    pub fn slots(&self) -> impl Iterator<Item = &SharedMatch> {
        self.slots.iter().map(|slot| &slot.shared)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
