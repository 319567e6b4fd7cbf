//! Read-only weapon catalog

use crate::error::Result;
use crate::types::{Weapon, WeaponId};
use crate::utils::load_json_file;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Id of the placeholder returned for unknown weapons
pub const UNKNOWN_WEAPON_ID: WeaponId = 0;

#[derive(Debug, Clone, Default)]
pub struct WeaponCatalog {
    weapons: HashMap<WeaponId, Weapon>,
}

impl WeaponCatalog {
    pub fn from_weapons(weapons: impl IntoIterator<Item = Weapon>) -> Self {
        Self {
            weapons: weapons.into_iter().map(|w| (w.id, w)).collect(),
        }
    }

    /// Load a JSON array of weapons
    pub fn load(path: &Path) -> Result<Self> {
        let weapons: Vec<Weapon> = load_json_file(path)?;
        info!(
            "Loaded {} weapons ({} banned) from {}",
            weapons.len(),
            weapons.iter().filter(|w| w.banned).count(),
            path.display()
        );
        Ok(Self::from_weapons(weapons))
    }

    pub fn get(&self, id: WeaponId) -> Option<&Weapon> {
        self.weapons.get(&id)
    }

    /// Catalog entry, or a zero-point placeholder when the id is unknown
    pub fn get_or_unknown(&self, id: WeaponId) -> Weapon {
        match self.weapons.get(&id) {
            Some(weapon) => weapon.clone(),
            None => {
                warn!("Weapon not found in catalog: id={}", id);
                self.weapons
                    .get(&UNKNOWN_WEAPON_ID)
                    .cloned()
                    .unwrap_or_else(unknown_weapon)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.weapons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weapons.is_empty()
    }
}

fn unknown_weapon() -> Weapon {
    Weapon {
        id: UNKNOWN_WEAPON_ID,
        name: "Unknown weapon".to_string(),
        points: 0,
        banned: false,
    }
}
