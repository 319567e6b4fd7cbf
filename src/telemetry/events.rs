//! Telemetry event records and their census wire format

use crate::error::{MatchmakingError, Result};
use crate::types::{Faction, FacilityId, LoadoutId, TelemetryId, WeaponId};
use serde::{Deserialize, Serialize};

/// A kill reported by the telemetry stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillEvent {
    pub attacker: TelemetryId,
    pub victim: TelemetryId,
    pub attacker_loadout: LoadoutId,
    pub victim_loadout: LoadoutId,
    /// 0 when the stream did not report a weapon
    pub weapon: WeaponId,
    pub timestamp: i64,
}

/// A facility changing hands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureEvent {
    pub facility_id: FacilityId,
    pub faction: Faction,
    pub timestamp: i64,
}

/// List response of the census API. `returned` is absent on error bodies.
#[derive(Debug, Deserialize)]
pub(crate) struct CensusList<T> {
    #[serde(
        default = "Vec::new",
        alias = "characters_event_list",
        alias = "world_event_list"
    )]
    pub items: Vec<T>,
    pub returned: Option<u32>,
    pub error: Option<String>,
}

/// Census encodes every number as a string
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawKillEvent {
    pub attacker_character_id: String,
    pub character_id: String,
    #[serde(default)]
    pub attacker_loadout_id: Option<String>,
    #[serde(default)]
    pub character_loadout_id: Option<String>,
    #[serde(default)]
    pub attacker_weapon_id: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawWorldEvent {
    #[serde(default)]
    pub facility_id: Option<String>,
    #[serde(default)]
    pub faction_new: Option<String>,
    pub timestamp: String,
}

fn parse_field<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        MatchmakingError::InvalidCommand {
            reason: format!("Malformed telemetry field {}: '{}'", field, value),
        }
        .into()
    })
}

fn parse_or_zero<T: std::str::FromStr + Default>(value: Option<&str>) -> T {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or_default()
}

impl TryFrom<RawKillEvent> for KillEvent {
    type Error = anyhow::Error;

    fn try_from(raw: RawKillEvent) -> Result<Self> {
        Ok(Self {
            attacker: parse_field("attacker_character_id", &raw.attacker_character_id)?,
            victim: parse_field("character_id", &raw.character_id)?,
            attacker_loadout: parse_or_zero(raw.attacker_loadout_id.as_deref()),
            victim_loadout: parse_or_zero(raw.character_loadout_id.as_deref()),
            weapon: parse_or_zero(raw.attacker_weapon_id.as_deref()),
            timestamp: parse_field("timestamp", &raw.timestamp)?,
        })
    }
}

impl TryFrom<RawWorldEvent> for CaptureEvent {
    type Error = anyhow::Error;

    /// Fails for world events that are not facility ownership changes
    fn try_from(raw: RawWorldEvent) -> Result<Self> {
        let facility = raw.facility_id.as_deref().ok_or_else(|| {
            MatchmakingError::InvalidCommand {
                reason: "World event without facility".to_string(),
            }
        })?;
        let faction_id: u8 = parse_field("faction_new", raw.faction_new.as_deref().unwrap_or(""))?;
        let faction = Faction::from_id(faction_id).ok_or_else(|| MatchmakingError::InvalidCommand {
            reason: format!("Unknown faction id {}", faction_id),
        })?;

        Ok(Self {
            facility_id: parse_field("facility_id", facility)?,
            faction,
            timestamp: parse_field("timestamp", &raw.timestamp)?,
        })
    }
}
