//! Game account lending
//!
//! Players without a personal game account borrow one from a shared pool for
//! the duration of a match.

pub mod pool;

pub use pool::{AccountPool, GameAccount};

use crate::error::Result;
use crate::types::{AccountAssignment, MatchId, PlayerId};
use async_trait::async_trait;

/// Lends game accounts to matches
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountAllocator: Send + Sync {
    /// Lend one account per player. Fails with `ResourceExhausted` when the pool
    /// cannot cover everyone, in which case nothing is lent.
    async fn give_accounts(
        &self,
        match_id: MatchId,
        players: Vec<PlayerId>,
    ) -> Result<Vec<(PlayerId, AccountAssignment)>>;

    /// Record the usage of a finished match and take its accounts back
    async fn do_update(&self, match_id: MatchId) -> Result<()>;

    /// Accounts currently free
    fn available(&self) -> usize;
}
