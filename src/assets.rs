//! Static reference assets loaded once per run: the map id -> floor mapping,
//! the movement table and the floor plan.
//!
//! Any failure here is fatal; the pipeline never runs on partial reference data.

use crate::config::AssetsSection;
use crate::estimation::movement::MovementTable;
use crate::spatial::{FloorId, FloorPlan};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid asset {}: {reason}", .path.display())]
    Invalid { path: PathBuf, reason: String },
}

impl AssetError {
    pub fn invalid(path: &Path, reason: impl Display) -> Self {
        Self::Invalid {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Read { path, .. } | Self::Parse { path, .. } | Self::Invalid { path, .. } => path,
        }
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, AssetError> {
    let contents = std::fs::read_to_string(path).map_err(|source| AssetError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| AssetError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// One-to-one mapping between positioning-vendor map ids and floor ids.
#[derive(Debug, Clone, Default)]
pub struct FloorMapping {
    map_to_floor: HashMap<String, FloorId>,
    floor_to_map: HashMap<FloorId, String>,
}

impl FloorMapping {
    /// Fails with the offending floor id if two map ids share a floor.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, FloorId>
    where
        I: IntoIterator<Item = (S, FloorId)>,
        S: Into<String>,
    {
        let mut mapping = Self::default();
        for (map_id, floor_id) in pairs {
            let map_id = map_id.into();
            if mapping.floor_to_map.contains_key(&floor_id) {
                return Err(floor_id);
            }
            mapping.floor_to_map.insert(floor_id, map_id.clone());
            mapping.map_to_floor.insert(map_id, floor_id);
        }
        Ok(mapping)
    }

    /// Load a `{"<map_id>": <floor_id>, ...}` JSON object.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AssetError> {
        let path = path.as_ref();
        let raw: HashMap<String, FloorId> = read_json(path)?;
        Self::from_pairs(raw).map_err(|floor_id| {
            AssetError::invalid(path, format!("floor {floor_id} is mapped by more than one map id"))
        })
    }

    pub fn floor_id(&self, map_id: &str) -> Option<FloorId> {
        self.map_to_floor.get(map_id).copied()
    }

    pub fn map_id(&self, floor_id: FloorId) -> Option<&str> {
        self.floor_to_map.get(&floor_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map_to_floor.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map_to_floor.is_empty()
    }
}

/// Read-only tables shared by every batch of a run.
#[derive(Debug)]
pub struct ReferenceTables {
    pub floor_mapping: FloorMapping,
    pub movement_table: MovementTable,
    pub floor_plan: FloorPlan,
}

impl ReferenceTables {
    pub fn load(assets: &AssetsSection) -> Result<Self, AssetError> {
        let floor_mapping = FloorMapping::load(&assets.floor_mapping)?;
        let movement_table = match assets.movement_table.as_deref() {
            Some(path) if !path.as_os_str().is_empty() => MovementTable::load(path)?,
            _ => {
                info!("No movement table configured, using standard normal table");
                MovementTable::default()
            }
        };
        let floor_plan = FloorPlan::load(&assets.floor_plan)?;

        info!(
            map_ids = floor_mapping.len(),
            z_values = movement_table.len(),
            floors = floor_plan.floor_count(),
            rooms = floor_plan.room_count(),
            "Reference assets loaded"
        );

        Ok(Self {
            floor_mapping,
            movement_table,
            floor_plan,
        })
    }
}
