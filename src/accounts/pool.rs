//! In-memory account pool

use crate::accounts::AccountAllocator;
use crate::error::{MatchmakingError, Result};
use crate::types::{AccountAssignment, AccountId, MatchId, PlayerId};
use crate::utils::load_json_file;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// A lendable game account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameAccount {
    pub id: AccountId,
    pub username: String,
}

#[derive(Debug, Default)]
struct PoolState {
    free: VecDeque<GameAccount>,
    lent: HashMap<MatchId, Vec<GameAccount>>,
    /// Completed lendings per account
    usage: HashMap<AccountId, u32>,
}

/// Accounts lent first-in first-out and returned when a match is updated
#[derive(Debug, Default)]
pub struct AccountPool {
    state: Mutex<PoolState>,
}

impl AccountPool {
    pub fn new(accounts: Vec<GameAccount>) -> Self {
        Self {
            state: Mutex::new(PoolState {
                free: accounts.into(),
                ..PoolState::default()
            }),
        }
    }

    /// Load a JSON array of accounts
    pub fn load(path: &Path) -> Result<Self> {
        let accounts: Vec<GameAccount> = load_json_file(path)?;
        info!("Loaded {} game accounts from {}", accounts.len(), path.display());
        Ok(Self::new(accounts))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PoolState>> {
        self.state.lock().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire account pool lock".to_string(),
            }
            .into()
        })
    }

    /// Times an account was lent to a completed match
    pub fn usage(&self, account_id: AccountId) -> u32 {
        self.lock()
            .map(|state| state.usage.get(&account_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Accounts currently lent to `match_id`
    pub fn lent_to(&self, match_id: MatchId) -> usize {
        self.lock()
            .map(|state| state.lent.get(&match_id).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl AccountAllocator for AccountPool {
    async fn give_accounts(
        &self,
        match_id: MatchId,
        players: Vec<PlayerId>,
    ) -> Result<Vec<(PlayerId, AccountAssignment)>> {
        let mut state = self.lock()?;

        if players.len() > state.free.len() {
            warn!(
                "Not enough accounts for match {} - needed: {}, available: {}",
                match_id,
                players.len(),
                state.free.len()
            );
            return Err(MatchmakingError::ResourceExhausted {
                needed: players.len(),
                available: state.free.len(),
            }
            .into());
        }

        let mut assignments = Vec::with_capacity(players.len());
        for player_id in players {
            let Some(account) = state.free.pop_front() else {
                return Err(MatchmakingError::invariant("account pool drained while lending").into());
            };
            assignments.push((
                player_id,
                AccountAssignment {
                    account_id: account.id,
                    username: account.username.clone(),
                    validated: false,
                },
            ));
            state.lent.entry(match_id).or_default().push(account);
        }

        debug!(
            "Lent {} accounts to match {}, {} left",
            assignments.len(),
            match_id,
            state.free.len()
        );
        Ok(assignments)
    }

    async fn do_update(&self, match_id: MatchId) -> Result<()> {
        let mut state = self.lock()?;
        let returned = state.lent.remove(&match_id).unwrap_or_default();
        let count = returned.len();

        for account in returned {
            *state.usage.entry(account.id).or_insert(0) += 1;
            state.free.push_back(account);
        }

        if count > 0 {
            info!("Match {} returned {} accounts", match_id, count);
        }
        Ok(())
    }

    fn available(&self) -> usize {
        self.lock().map(|state| state.free.len()).unwrap_or(0)
    }
}
