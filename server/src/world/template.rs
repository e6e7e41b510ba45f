// world_map_core/server/src/world/template.rs
use super::coords::GridCoord;
use crate::core::constants::{CONTINENT_INSTANCE_ID, MAX_NUMBER_OF_GRIDS};
use crate::core::error::{WorldError, WorldResult};
use crate::core::types::{InstanceId, MapId, Team};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapKind {
    Continent,
    Dungeon,
    Raid,
    Battleground,
    Arena,
}

/// Inclusive rectangle of grids that carry terrain for a map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct GridBounds {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl GridBounds {
    pub fn grids(&self) -> impl Iterator<Item = GridCoord> {
        let last = MAX_NUMBER_OF_GRIDS - 1;
        let (min_x, max_x) = (self.min_x.min(last), self.max_x.min(last));
        let (min_y, max_y) = (self.min_y.min(last), self.max_y.min(last));
        (min_y..=max_y).flat_map(move |y| (min_x..=max_x).map(move |x| GridCoord { x, y }))
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct MapTemplate {
    pub id: MapId,
    #[serde(default)]
    pub name: String,
    pub kind: MapKind,
    /// Map whose navigation data this map falls back to.
    #[serde(default)]
    pub parent_map_id: Option<MapId>,
    /// Instance ids of lock-bound maps stay reserved after the map is destroyed.
    #[serde(default)]
    pub lock_bound: bool,
    /// Continents split per team get one copy per team.
    #[serde(default)]
    pub team_partitioned: bool,
    #[serde(default)]
    pub grid_bounds: Option<GridBounds>,
}

impl MapTemplate {
    pub fn new(id: MapId, kind: MapKind) -> Self {
        MapTemplate {
            id,
            name: String::new(),
            kind,
            parent_map_id: None,
            lock_bound: false,
            team_partitioned: false,
            grid_bounds: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_parent(mut self, parent: MapId) -> Self {
        self.parent_map_id = Some(parent);
        self
    }

    pub fn lock_bound(mut self) -> Self {
        self.lock_bound = true;
        self
    }

    pub fn team_partitioned(mut self) -> Self {
        self.team_partitioned = true;
        self
    }

    pub fn with_grid_bounds(mut self, bounds: GridBounds) -> Self {
        self.grid_bounds = Some(bounds);
        self
    }

    pub fn is_battleground_or_arena(&self) -> bool {
        matches!(self.kind, MapKind::Battleground | MapKind::Arena)
    }

    pub fn is_instanceable(&self) -> bool {
        matches!(self.kind, MapKind::Dungeon | MapKind::Raid)
    }

    pub fn is_continent(&self) -> bool {
        self.kind == MapKind::Continent
    }

    /// Any map that is not a continent comes and goes with its participants.
    pub fn is_instanced(&self) -> bool {
        !self.is_continent()
    }

    /// Instance id of a continent copy; team partitioned continents key by team.
    pub fn continent_instance_id(&self, team: Team) -> InstanceId {
        if !self.team_partitioned {
            return CONTINENT_INSTANCE_ID;
        }
        match team {
            Team::Alliance => 1,
            Team::Horde => 2,
        }
    }

    /// Whether the instance id must be released when the map is destroyed.
    pub fn frees_instance_id_on_destroy(&self) -> bool {
        self.is_battleground_or_arena() || (self.is_instanceable() && !self.lock_bound)
    }

    /// Map id whose navigation files this map reads.
    pub fn navigation_map_id(&self) -> MapId {
        self.parent_map_id.unwrap_or(self.id)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    maps: Vec<MapTemplate>,
}

/// Static map definitions, keyed by map id.
#[derive(Debug, Default, Clone)]
pub struct MapCatalog {
    templates: HashMap<MapId, MapTemplate>,
}

impl MapCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_templates<I: IntoIterator<Item = MapTemplate>>(templates: I) -> Self {
        let mut catalog = MapCatalog::new();
        for template in templates {
            catalog.insert(template);
        }
        catalog
    }

    pub fn from_yaml_str(source: &str) -> WorldResult<Self> {
        let doc: CatalogDocument = serde_yaml::from_str(source)
            .map_err(|e| WorldError::ConfigError(format!("invalid map catalog: {}", e)))?;
        let mut catalog = MapCatalog::new();
        for template in doc.maps {
            if catalog.templates.contains_key(&template.id) {
                return Err(WorldError::ConfigError(format!("map {} is defined twice", template.id)));
            }
            catalog.insert(template);
        }
        Ok(catalog)
    }

    pub fn load(path: &Path) -> WorldResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&source)
    }

    pub fn insert(&mut self, template: MapTemplate) {
        self.templates.insert(template.id, template);
    }

    pub fn get(&self, map_id: MapId) -> Option<&MapTemplate> {
        self.templates.get(&map_id)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MapTemplate> {
        self.templates.values()
    }

    /// Child map id to parent map id, for navigation tile fallback.
    pub fn parent_map_links(&self) -> HashMap<MapId, MapId> {
        self.templates
            .values()
            .filter_map(|t| t.parent_map_id.map(|parent| (t.id, parent)))
            .collect()
    }
}
