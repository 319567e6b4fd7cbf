//! Common types used throughout the match lifecycle service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for players
pub type PlayerId = u64;

/// Identifier of a match slot
pub type MatchId = u32;

/// Identity of a player in the external telemetry stream
pub type TelemetryId = u64;

pub type WeaponId = u32;
pub type LoadoutId = u32;
pub type FacilityId = u32;
pub type AccountId = u32;

/// Player information for matchmaking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub telemetry_id: TelemetryId,
    /// Players with their own game account don't need one from the pool
    #[serde(default)]
    pub has_own_account: bool,
}

impl Player {
    pub fn new(id: PlayerId, name: impl Into<String>, telemetry_id: TelemetryId) -> Self {
        Self {
            id,
            name: name.into(),
            telemetry_id,
            has_own_account: false,
        }
    }

    pub fn with_own_account(mut self) -> Self {
        self.has_own_account = true;
        self
    }
}

/// In-game faction a team plays as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Faction {
    #[serde(rename = "VS")]
    Vanu,
    #[serde(rename = "NC")]
    NewConglomerate,
    #[serde(rename = "TR")]
    TerranRepublic,
}

impl Faction {
    pub const ALL: [Faction; 3] = [
        Faction::Vanu,
        Faction::NewConglomerate,
        Faction::TerranRepublic,
    ];

    /// Numeric id used by the telemetry API
    pub fn id(self) -> u8 {
        match self {
            Faction::Vanu => 1,
            Faction::NewConglomerate => 2,
            Faction::TerranRepublic => 3,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.id() == id)
    }
}

impl fmt::Display for Faction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Faction::Vanu => write!(f, "VS"),
            Faction::NewConglomerate => write!(f, "NC"),
            Faction::TerranRepublic => write!(f, "TR"),
        }
    }
}

impl FromStr for Faction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "vs" | "vanu" => Ok(Faction::Vanu),
            "nc" | "new conglomerate" => Ok(Faction::NewConglomerate),
            "tr" | "terran republic" => Ok(Faction::TerranRepublic),
            other => Err(format!("Unknown faction: {}", other)),
        }
    }
}

/// One of the two sides of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamId {
    First,
    Second,
}

impl TeamId {
    pub const BOTH: [TeamId; 2] = [TeamId::First, TeamId::Second];

    pub fn index(self) -> usize {
        match self {
            TeamId::First => 0,
            TeamId::Second => 1,
        }
    }

    pub fn opponent(self) -> TeamId {
        match self {
            TeamId::First => TeamId::Second,
            TeamId::Second => TeamId::First,
        }
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "team {}", self.index())
    }
}

/// Half-open `[start, end)` interval in unix seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundWindow {
    pub start: i64,
    pub end: i64,
}

impl RoundWindow {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }
}

/// A playable map bound to a capturable facility
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameMap {
    pub id: u32,
    pub name: String,
    pub facility_id: FacilityId,
}

/// Weapon catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Weapon {
    pub id: WeaponId,
    pub name: String,
    pub points: i32,
    #[serde(default)]
    pub banned: bool,
}

/// Game account lent to a player for the duration of a match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountAssignment {
    pub account_id: AccountId,
    pub username: String,
    /// Set once the player confirms they logged into the account
    pub validated: bool,
}

/// Template key of an outbound notice; formatting is the consumer's concern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NoticeKey {
    LobbyJoined,
    LobbyLeft,
    LobbyNotify,
    LobbyStuck,
    LobbyMatchStarting,
    LobbyCleared,
    MatchInit,
    PickOk,
    PickAuto,
    PickFactionTurn,
    FactionPicked,
    FactionTaken,
    MapTurn,
    MapSelected,
    MapConfirmed,
    AccountsNotEnough,
    AccountsGiven,
    MatchConfirm,
    MatchReady,
    MatchNotReady,
    MatchStarting,
    MatchStarted,
    RoundOver,
    MatchSwap,
    MatchOver,
    MatchCleared,
    CaptainResigned,
    PlayerSubstituted,
    PlayersSwapped,
    IllegalWeapon,
    /// A command could not be applied; args are the command name and the reason
    CommandRejected,
}

/// Where a notice should be delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum NoticeTarget {
    Lobby,
    Match(MatchId),
    Staff,
    Player(PlayerId),
}

impl NoticeTarget {
    /// Routing key suffix used when publishing
    pub fn routing_suffix(&self) -> String {
        match self {
            NoticeTarget::Lobby => "lobby".to_string(),
            NoticeTarget::Match(id) => format!("match.{}", id),
            NoticeTarget::Staff => "staff".to_string(),
            NoticeTarget::Player(id) => format!("player.{}", id),
        }
    }
}

/// Outbound notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub key: NoticeKey,
    pub target: NoticeTarget,
    pub args: Vec<String>,
}

impl Notice {
    pub fn new(key: NoticeKey, target: NoticeTarget) -> Self {
        Self {
            key,
            target,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl ToString) -> Self {
        self.args.push(value.to_string());
        self
    }

    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.args.extend(values.into_iter().map(|v| v.to_string()));
        self
    }
}

/// Inbound human decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Join {
        player: Player,
    },
    Leave {
        player_id: PlayerId,
    },
    ClearLobby,
    Pick {
        match_id: MatchId,
        captain_id: PlayerId,
        player_id: PlayerId,
    },
    PickFaction {
        match_id: MatchId,
        captain_id: PlayerId,
        faction: Faction,
    },
    SelectMap {
        match_id: MatchId,
        captain_id: PlayerId,
        query: String,
    },
    ConfirmMap {
        match_id: MatchId,
        captain_id: PlayerId,
    },
    ValidateAccount {
        match_id: MatchId,
        player_id: PlayerId,
    },
    Ready {
        match_id: MatchId,
        captain_id: PlayerId,
    },
    Resign {
        match_id: MatchId,
        captain_id: PlayerId,
    },
    Substitute {
        match_id: MatchId,
        player_id: PlayerId,
        replacement: Player,
    },
    Swap {
        match_id: MatchId,
        first: PlayerId,
        second: PlayerId,
    },
    ClearMatch {
        match_id: MatchId,
    },
}

impl Command {
    /// Short name used in logs and metrics labels
    pub fn name(&self) -> &'static str {
        match self {
            Command::Join { .. } => "join",
            Command::Leave { .. } => "leave",
            Command::ClearLobby => "clear_lobby",
            Command::Pick { .. } => "pick",
            Command::PickFaction { .. } => "pick_faction",
            Command::SelectMap { .. } => "select_map",
            Command::ConfirmMap { .. } => "confirm_map",
            Command::ValidateAccount { .. } => "validate_account",
            Command::Ready { .. } => "ready",
            Command::Resign { .. } => "resign",
            Command::Substitute { .. } => "substitute",
            Command::Swap { .. } => "swap",
            Command::ClearMatch { .. } => "clear_match",
        }
    }

    /// Player who issued the command. Staff commands have none.
    pub fn issuer(&self) -> Option<PlayerId> {
        match self {
            Command::Join { player } => Some(player.id),
            Command::Leave { player_id } | Command::ValidateAccount { player_id, .. } => {
                Some(*player_id)
            }
            Command::Pick { captain_id, .. }
            | Command::PickFaction { captain_id, .. }
            | Command::SelectMap { captain_id, .. }
            | Command::ConfirmMap { captain_id, .. }
            | Command::Ready { captain_id, .. }
            | Command::Resign { captain_id, .. } => Some(*captain_id),
            Command::ClearLobby
            | Command::Substitute { .. }
            | Command::Swap { .. }
            | Command::ClearMatch { .. } => None,
        }
    }
}

/// Request wrapper carrying the issuing time of a command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: Command,
    pub timestamp: DateTime<Utc>,
}
