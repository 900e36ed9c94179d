//! Batch refinement: drive the estimator over a batch of raw fixes, resolve
//! rooms for active devices, and keep the working set bounded.

use crate::assets::ReferenceTables;
use crate::error::AppError;
use crate::estimation::device::EstimatorParams;
use crate::spatial::{FloorId, NO_ROOM};
use crate::timestamp::display_unix_timestamp;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

pub mod batch;
pub mod sink;
pub mod working_set;

use sink::RecordSink;
use working_set::WorkingSet;

/// One inbound fix as delivered by the positioning feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    pub timestamp: i64,
    pub mac: String,
    pub map_id: String,
    pub x: f64,
    pub y: f64,
    pub rssi: f64,
}

/// Smoothed, room-resolved position of one device at a batch's reference time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedRecord {
    pub timestamp: i64,
    pub mac: String,
    pub x: f64,
    pub y: f64,
    pub error: f64,
    pub rssi: f64,
    pub floor_id: FloorId,
    /// Resolved room, or `"none"` outside every room.
    pub room_id: String,
}

/// Which recency test gates activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecencyCheck {
    /// Latest fix compared against itself; never filters.
    #[default]
    Device,
    /// Latest fix compared against the batch reference timestamp.
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineParams {
    pub estimator: EstimatorParams,
    pub active_time_secs: i64,
    pub active_count: usize,
    pub retention_secs: i64,
    pub recency: RecencyCheck,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            estimator: EstimatorParams::default(),
            active_time_secs: crate::config::DEFAULT_ACTIVE_TIME_SECS,
            active_count: crate::config::DEFAULT_ACTIVE_COUNT,
            retention_secs: crate::config::DEFAULT_RETENTION_SECS,
            recency: RecencyCheck::Device,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutput {
    pub records: Vec<RefinedRecord>,
    /// Last row's timestamp; `None` for an empty batch.
    pub reference: Option<i64>,
    pub skipped_rows: usize,
    pub inactive_devices: usize,
    pub evicted: usize,
    pub tracked_devices: usize,
}

/// Fold one batch into the working set and emit a record per active device.
pub fn refine_batch(
    rows: &[RawRow],
    working_set: &mut WorkingSet,
    is_first_batch: bool,
    tables: &ReferenceTables,
    params: &PipelineParams,
) -> BatchOutput {
    if is_first_batch {
        working_set.clear();
    }

    let mut output = BatchOutput {
        reference: rows.last().map(|row| row.timestamp),
        ..BatchOutput::default()
    };

    let mut touched: Vec<&str> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for row in rows {
        let Some(floor_id) = tables.floor_mapping.floor_id(&row.map_id) else {
            warn!(mac = %row.mac, map_id = %row.map_id, "Skipping row with unmapped map id");
            output.skipped_rows += 1;
            continue;
        };
        working_set
            .device_mut(&row.mac)
            .add_observation(row.x, row.y, row.rssi, row.timestamp, floor_id);
        if seen.insert(row.mac.as_str()) {
            touched.push(row.mac.as_str());
        }
    }

    let Some(reference) = output.reference else {
        output.tracked_devices = working_set.len();
        return output;
    };

    for mac in touched {
        let Some(device) = working_set.get_mut(mac) else {
            continue;
        };
        let active = device.is_active(params.active_time_secs, params.active_count)
            && (params.recency == RecencyCheck::Device
                || device.is_recent(reference, params.active_time_secs));
        if !active {
            output.inactive_devices += 1;
            continue;
        }

        let Some(estimate) = device.update_position(&tables.movement_table, &params.estimator)
        else {
            continue;
        };
        let (Some(floor_id), Some(rssi)) = (device.current_floor(), device.last_rssi()) else {
            continue;
        };
        let room = tables
            .floor_plan
            .resolve_room(estimate.x, estimate.y, floor_id)
            .cloned();
        device.set_room_id(room.clone());

        output.records.push(RefinedRecord {
            timestamp: reference,
            mac: mac.to_string(),
            x: estimate.x,
            y: estimate.y,
            error: estimate.error,
            rssi,
            floor_id,
            room_id: room.unwrap_or_else(|| NO_ROOM.to_string()),
        });
    }

    output.evicted = working_set.prune(reference, params.retention_secs);
    output.tracked_devices = working_set.len();
    debug!(
        reference = %display_unix_timestamp(reference),
        records = output.records.len(),
        inactive = output.inactive_devices,
        evicted = output.evicted,
        "Batch refined"
    );
    output
}

/// Full lifecycle of one batch: load the snapshot, refine, append the records
/// to `sink` and persist the snapshot.
///
/// On the first batch the snapshot is not read; otherwise a missing snapshot
/// is an error rather than a silent restart.
pub fn run_batch(
    rows: &[RawRow],
    is_first_batch: bool,
    tables: &ReferenceTables,
    params: &PipelineParams,
    snapshot_path: &Path,
    sink: &mut dyn RecordSink,
) -> Result<BatchOutput, AppError> {
    let mut working_set = if is_first_batch {
        WorkingSet::new()
    } else if snapshot_path.exists() {
        WorkingSet::load(snapshot_path)?
    } else {
        return Err(AppError::MissingSnapshot(snapshot_path.to_path_buf()));
    };

    let output = refine_batch(rows, &mut working_set, is_first_batch, tables, params);
    sink.append(&output.records)?;
    working_set.persist(snapshot_path)?;

    info!(
        rows = rows.len(),
        skipped = output.skipped_rows,
        records = output.records.len(),
        evicted = output.evicted,
        tracked = output.tracked_devices,
        "Batch complete"
    );
    Ok(output)
}
