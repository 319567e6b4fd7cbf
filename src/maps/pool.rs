//! Map pool and its selector

use crate::error::Result;
use crate::maps::{MapSelector, MapSelectorFactory, MapStatus};
use crate::types::{GameMap, MatchId};
use crate::utils::load_json_file;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// The maps matches are played on
#[derive(Debug, Clone, Default)]
pub struct MapPool {
    maps: Arc<Vec<GameMap>>,
}

impl MapPool {
    pub fn new(maps: Vec<GameMap>) -> Self {
        Self {
            maps: Arc::new(maps),
        }
    }

    /// Load a JSON array of maps
    pub fn load(path: &Path) -> Result<Self> {
        let maps: Vec<GameMap> = load_json_file(path)?;
        info!("Loaded {} maps from {}", maps.len(), path.display());
        Ok(Self::new(maps))
    }

    pub fn maps(&self) -> &[GameMap] {
        &self.maps
    }
}

impl MapSelectorFactory for MapPool {
    fn create(&self, match_id: MatchId) -> Box<dyn MapSelector> {
        Box::new(PoolMapSelector::new(match_id, self.maps.clone()))
    }
}

/// Selector over a shared map pool. A pool of a single map is confirmed
/// from the start.
#[derive(Debug)]
pub struct PoolMapSelector {
    match_id: MatchId,
    maps: Arc<Vec<GameMap>>,
    selected: Option<GameMap>,
    status: MapStatus,
}

impl PoolMapSelector {
    pub fn new(match_id: MatchId, maps: Arc<Vec<GameMap>>) -> Self {
        let mut selector = Self {
            match_id,
            maps,
            selected: None,
            status: MapStatus::Unconfirmed,
        };
        if let [only] = selector.maps.as_slice() {
            selector.selected = Some(only.clone());
            selector.status = MapStatus::Confirmed;
        }
        selector
    }

    fn matching(&self, query: &str) -> Vec<&GameMap> {
        let query = query.trim().to_lowercase();
        if let Ok(id) = query.parse::<u32>() {
            return self.maps.iter().filter(|m| m.id == id).collect();
        }

        // An exact name wins over partial matches
        if let Some(exact) = self.maps.iter().find(|m| m.name.to_lowercase() == query) {
            return vec![exact];
        }
        self.maps
            .iter()
            .filter(|m| m.name.to_lowercase().contains(&query))
            .collect()
    }
}

impl MapSelector for PoolMapSelector {
    fn status(&self) -> MapStatus {
        self.status
    }

    fn select(&mut self, query: &str) -> Option<GameMap> {
        if self.status == MapStatus::Confirmed {
            return None;
        }

        let candidates: Vec<GameMap> = self.matching(query).into_iter().cloned().collect();
        match candidates.as_slice() {
            [map] => {
                let map = map.clone();
                debug!("Match {} map selected: {}", self.match_id, map.name);
                self.selected = Some(map.clone());
                self.status = MapStatus::Selected;
                Some(map)
            }
            candidates => {
                debug!(
                    "Match {} map query '{}' matched {} maps",
                    self.match_id,
                    query,
                    candidates.len()
                );
                None
            }
        }
    }

    fn confirm(&mut self) -> bool {
        match self.status {
            MapStatus::Selected => {
                self.status = MapStatus::Confirmed;
                true
            }
            MapStatus::Confirmed => true,
            MapStatus::Unconfirmed => false,
        }
    }

    fn map(&self) -> Option<&GameMap> {
        match self.status {
            MapStatus::Confirmed => self.selected.as_ref(),
            _ => None,
        }
    }

    fn selection(&self) -> Option<&GameMap> {
        self.selected.as_ref()
    }

    fn release(&mut self) {
        self.selected = None;
        self.status = MapStatus::Unconfirmed;
    }
}
