//! Per-room device counts joined with site metadata.

use crate::assets::{AssetError, read_json};
use crate::pipeline::RefinedRecord;
use crate::spatial::{FloorId, NO_ROOM, RoomId};
use crate::timestamp::{TimestampError, format_unix_timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub floor_id: FloorId,
    pub name: String,
    #[serde(default)]
    pub popular_name: Option<String>,
    #[serde(default)]
    pub gross_area: Option<f64>,
    #[serde(default)]
    pub net_area: Option<f64>,
    #[serde(default)]
    pub type_id: Option<u32>,
    #[serde(default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub department_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloorInfo {
    pub name: String,
    #[serde(default)]
    pub popular_name: Option<String>,
    pub building_id: u32,
    pub building_name: String,
    #[serde(default)]
    pub building_popular_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Department {
    pub name: String,
    pub code: String,
    pub tree_level: u32,
    pub path: String,
}

/// Room, floor and department descriptions keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SiteMetadata {
    #[serde(default)]
    pub rooms: HashMap<RoomId, RoomInfo>,
    #[serde(default)]
    pub floors: HashMap<FloorId, FloorInfo>,
    #[serde(default)]
    pub departments: HashMap<String, Department>,
}

impl SiteMetadata {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AssetError> {
        read_json(path.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OccupancyRow {
    pub timestamp: i64,
    pub observed_at: String,
    pub count: usize,
    pub room_id: RoomId,
    pub room_name: String,
    pub room_popular_name: Option<String>,
    pub room_gross_area: Option<f64>,
    pub room_net_area: Option<f64>,
    pub room_type_id: Option<u32>,
    pub room_type_name: Option<String>,
    pub floor_id: FloorId,
    pub floor_name: String,
    pub floor_popular_name: Option<String>,
    pub building_id: u32,
    pub building_name: String,
    pub building_popular_name: Option<String>,
    pub department: Option<Department>,
}

/// Count devices per `(timestamp, room)` and describe each room.
///
/// Records outside every room are ignored. Rooms or floors missing from the
/// metadata are skipped with a warning. Rows come out ordered by timestamp,
/// then room id.
pub fn aggregate_occupancy(
    records: &[RefinedRecord],
    metadata: &SiteMetadata,
) -> Result<Vec<OccupancyRow>, TimestampError> {
    let mut groups: BTreeMap<(i64, &str), (usize, FloorId)> = BTreeMap::new();
    for record in records.iter().filter(|record| record.room_id != NO_ROOM) {
        groups
            .entry((record.timestamp, record.room_id.as_str()))
            .or_insert((0, record.floor_id))
            .0 += 1;
    }

    let mut rows = Vec::with_capacity(groups.len());
    for ((timestamp, room_id), (count, floor_id)) in groups {
        let Some(room) = metadata.rooms.get(room_id) else {
            warn!(room_id, "Skipping room without metadata");
            continue;
        };
        let Some(floor) = metadata.floors.get(&floor_id) else {
            warn!(room_id, floor_id, "Skipping room on floor without metadata");
            continue;
        };
        let department = room
            .department_id
            .as_ref()
            .and_then(|id| metadata.departments.get(id))
            .cloned();

        rows.push(OccupancyRow {
            timestamp,
            observed_at: format_unix_timestamp(timestamp)?,
            count,
            room_id: room_id.to_string(),
            room_name: room.name.clone(),
            room_popular_name: room.popular_name.clone(),
            room_gross_area: room.gross_area,
            room_net_area: room.net_area,
            room_type_id: room.type_id,
            room_type_name: room.type_name.clone(),
            floor_id,
            floor_name: floor.name.clone(),
            floor_popular_name: floor.popular_name.clone(),
            building_id: floor.building_id,
            building_name: floor.building_name.clone(),
            building_popular_name: floor.building_popular_name.clone(),
            department,
        });
    }
    Ok(rows)
}
