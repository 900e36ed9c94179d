//! Room resolution against precomputed floor geometry.
//!
//! Each floor keeps its room polygons plus an R-tree over their bounding
//! boxes. A lookup narrows candidates with the tree and then runs an exact
//! point-in-polygon test.

use crate::assets::{AssetError, read_json};
use geo::coordinate_position::{CoordPos, CoordinatePosition};
use geo::{Coord, LineString, Polygon, Rect};
use rstar::{AABB, Envelope, RTree, RTreeObject};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

pub mod density;

pub type FloorId = u32;
pub type RoomId = String;

/// Sentinel written in place of a room id when a point resolves to no room.
pub const NO_ROOM: &str = "none";

#[derive(Debug, Clone)]
pub struct RoomPolygon {
    pub room_id: RoomId,
    pub polygon: Polygon<f64>,
}

impl RoomPolygon {
    pub fn new(room_id: impl Into<RoomId>, outline: &[[f64; 2]]) -> Self {
        let exterior: LineString<f64> = outline.iter().map(|&[x, y]| Coord { x, y }).collect();
        Self {
            room_id: room_id.into(),
            polygon: Polygon::new(exterior, vec![]),
        }
    }

    /// Boundary-inclusive containment.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        self.polygon.coordinate_position(&Coord { x, y }) != CoordPos::Outside
    }
}

/// Bounding box of one room, tagged with the room's position in the floor list.
#[derive(Debug, Clone, Copy)]
struct IndexedEnvelope {
    order: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Rooms of one floor and their bounding-box index.
#[derive(Debug)]
pub struct FloorIndex {
    rooms: Vec<RoomPolygon>,
    tree: RTree<IndexedEnvelope>,
}

impl FloorIndex {
    pub fn new(rooms: Vec<RoomPolygon>) -> Self {
        let envelopes = rooms
            .iter()
            .enumerate()
            .filter_map(|(order, room)| {
                compute_envelope(&room.polygon).map(|envelope| IndexedEnvelope { order, envelope })
            })
            .collect();

        Self {
            rooms,
            tree: RTree::bulk_load(envelopes),
        }
    }

    pub fn rooms(&self) -> &[RoomPolygon] {
        &self.rooms
    }

    /// Rooms whose bounding box contains the point, in insertion order.
    ///
    /// Bounding boxes admit false positives; callers still need an exact test.
    pub fn candidates(&self, x: f64, y: f64) -> Vec<&RoomPolygon> {
        let query = AABB::from_point([x, y]);
        let mut orders: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&query)
            .map(|indexed| indexed.order)
            .collect();
        orders.sort_unstable();
        orders.into_iter().map(|order| &self.rooms[order]).collect()
    }

    /// First candidate room that contains the point.
    pub fn room_at(&self, x: f64, y: f64) -> Option<&RoomPolygon> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        self.candidates(x, y)
            .into_iter()
            .find(|room| room.contains_point(x, y))
    }

    /// Bounding rectangle of all rooms on the floor.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        let mut envelopes = self.tree.iter().map(|indexed| indexed.envelope);
        let first = envelopes.next()?;
        let merged = envelopes.fold(first, |acc, envelope| acc.merged(&envelope));
        let [min_x, min_y] = merged.lower();
        let [max_x, max_y] = merged.upper();
        Some(Rect::new(
            Coord { x: min_x, y: min_y },
            Coord { x: max_x, y: max_y },
        ))
    }
}

#[derive(Debug, Deserialize)]
struct RoomOutline {
    room_id: RoomId,
    outline: Vec<[f64; 2]>,
}

/// Room geometry for every instrumented floor. Read-only once loaded.
#[derive(Debug, Default)]
pub struct FloorPlan {
    floors: HashMap<FloorId, FloorIndex>,
}

impl FloorPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_floor(&mut self, floor_id: FloorId, rooms: Vec<RoomPolygon>) {
        self.floors.insert(floor_id, FloorIndex::new(rooms));
    }

    pub fn floor(&self, floor_id: FloorId) -> Option<&FloorIndex> {
        self.floors.get(&floor_id)
    }

    pub fn floor_count(&self) -> usize {
        self.floors.len()
    }

    pub fn room_count(&self) -> usize {
        self.floors.values().map(|floor| floor.rooms.len()).sum()
    }

    /// Load `{"<floor_id>": [{"room_id": "...", "outline": [[x, y], ...]}, ...]}`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AssetError> {
        let path = path.as_ref();
        let raw: HashMap<String, Vec<RoomOutline>> = read_json(path)?;

        let mut plan = Self::new();
        for (key, outlines) in raw {
            let floor_id: FloorId = key
                .trim()
                .parse()
                .map_err(|_| AssetError::invalid(path, format!("floor id {key:?} is not an integer")))?;
            if plan.floors.contains_key(&floor_id) {
                return Err(AssetError::invalid(path, format!("duplicate floor id {floor_id}")));
            }
            let mut rooms = Vec::with_capacity(outlines.len());
            for outline in outlines {
                if outline.outline.len() < 3 {
                    return Err(AssetError::invalid(
                        path,
                        format!(
                            "room {} on floor {floor_id} has fewer than 3 vertices",
                            outline.room_id
                        ),
                    ));
                }
                if outline.outline.iter().flatten().any(|v| !v.is_finite()) {
                    return Err(AssetError::invalid(
                        path,
                        format!("room {} on floor {floor_id} has non-finite vertices", outline.room_id),
                    ));
                }
                rooms.push(RoomPolygon::new(outline.room_id, &outline.outline));
            }
            plan.insert_floor(floor_id, rooms);
        }
        Ok(plan)
    }

    /// Room containing `(x, y)` on `floor_id`, or `None` for corridors,
    /// unmapped space and unknown floors.
    pub fn resolve_room(&self, x: f64, y: f64, floor_id: FloorId) -> Option<&RoomId> {
        self.floor(floor_id)?
            .room_at(x, y)
            .map(|room| &room.room_id)
    }
}

fn compute_envelope(polygon: &Polygon<f64>) -> Option<AABB<[f64; 2]>> {
    let mut coords = polygon.exterior().coords();
    let first = coords.next()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for coord in coords {
        min_x = min_x.min(coord.x);
        max_x = max_x.max(coord.x);
        min_y = min_y.min(coord.y);
        max_y = max_y.max(coord.y);
    }
    Some(AABB::from_corners([min_x, min_y], [max_x, max_y]))
}
