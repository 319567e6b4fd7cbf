//! Roster entries: a player bound to a team slot under a role

use crate::types::{AccountAssignment, Player};
use serde::Serialize;

/// Role of a roster entry. Only captains carry the `turn` handshake flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Role {
    Captain { turn: bool },
    Regular,
}

/// A player occupying a team slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterEntry {
    player: Player,
    role: Role,
    account: Option<AccountAssignment>,
}

impl RosterEntry {
    pub fn captain(player: Player) -> Self {
        Self {
            player,
            role: Role::Captain { turn: false },
            account: None,
        }
    }

    pub fn regular(player: Player) -> Self {
        Self {
            player,
            role: Role::Regular,
            account: None,
        }
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn into_player(self) -> Player {
        self.player
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_captain(&self) -> bool {
        matches!(self.role, Role::Captain { .. })
    }

    pub fn turn(&self) -> bool {
        matches!(self.role, Role::Captain { turn: true })
    }

    /// Returns false (and does nothing) for regular entries
    pub fn set_turn(&mut self, value: bool) -> bool {
        match &mut self.role {
            Role::Captain { turn } => {
                *turn = value;
                true
            }
            Role::Regular => false,
        }
    }

    pub fn promote(&mut self) {
        if let Role::Regular = self.role {
            self.role = Role::Captain { turn: false };
        }
    }

    pub fn demote(&mut self) {
        self.role = Role::Regular;
    }

    /// Swap the player for another one, keeping the role and dropping the account
    pub(crate) fn replace_player(&mut self, player: Player) -> Player {
        self.account = None;
        std::mem::replace(&mut self.player, player)
    }

    pub fn account(&self) -> Option<&AccountAssignment> {
        self.account.as_ref()
    }

    pub fn account_mut(&mut self) -> Option<&mut AccountAssignment> {
        self.account.as_mut()
    }

    pub fn set_account(&mut self, account: Option<AccountAssignment>) {
        self.account = account;
    }

    /// True if the player has to borrow an account from the pool
    pub fn needs_account(&self) -> bool {
        !self.player.has_own_account
    }

    /// True once the player can actually play
    pub fn is_account_ready(&self) -> bool {
        self.player.has_own_account || self.account.as_ref().is_some_and(|a| a.validated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_only_applies_to_captains() {
        let mut regular = RosterEntry::regular(Player::new(1, "alpha", 10));
        assert!(!regular.set_turn(true));
        assert!(!regular.turn());

        let mut captain = RosterEntry::captain(Player::new(2, "bravo", 20));
        assert!(captain.set_turn(true));
        assert!(captain.turn());
    }

    #[test]
    fn test_promote_and_demote() {
        let mut entry = RosterEntry::regular(Player::new(1, "alpha", 10));
        entry.promote();
        assert_eq!(entry.role(), Role::Captain { turn: false });

        entry.set_turn(true);
        entry.promote();
        assert!(entry.turn(), "promoting a captain keeps the turn");

        entry.demote();
        assert_eq!(entry.role(), Role::Regular);
    }

    #[test]
    fn test_account_readiness() {
        let mut entry = RosterEntry::regular(Player::new(1, "alpha", 10));
        assert!(entry.needs_account());
        assert!(!entry.is_account_ready());

        entry.set_account(Some(AccountAssignment {
            account_id: 4,
            username: "pool4".to_string(),
            validated: false,
        }));
        assert!(!entry.is_account_ready());

        if let Some(account) = entry.account_mut() {
            account.validated = true;
        }
        assert!(entry.is_account_ready());

        let owner = RosterEntry::regular(Player::new(2, "bravo", 20).with_own_account());
        assert!(!owner.needs_account());
        assert!(owner.is_account_ready());
    }
}
