//! Per-device fix history and the recursive position estimator.

use crate::estimation::movement::{MovementTable, probability_moved};
use crate::estimation::signal;
use crate::spatial::{FloorId, RoomId};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Nominal positioning error of WiFi fixes, in floor-plan units.
pub const WIFI_ERROR: f64 = 10.0;
/// Movement probability above which older fixes are no longer averaged in.
pub const MOVEMENT_THRESHOLD: f64 = 0.8;

/// One raw fix as recorded for a device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub x: f64,
    pub y: f64,
    pub rssi: f64,
    pub timestamp: i64,
    pub floor_id: FloorId,
}

/// Smoothed location with its uncertainty radius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionEstimate {
    pub x: f64,
    pub y: f64,
    pub error: f64,
}

impl PositionEstimate {
    /// Unnormalised Gaussian bump around the estimate,
    /// `exp(-(dx² + dy²) / (2π·e²))`, with `e` floored at `min_error`.
    pub fn density_at(&self, x: f64, y: f64, min_error: f64) -> f64 {
        let error = self.error.max(min_error);
        let (dx, dy) = (x - self.x, y - self.y);
        (-(dx * dx + dy * dy) / (2.0 * std::f64::consts::PI * error * error)).exp()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorParams {
    /// Fallback (and upper bound) for the error radius.
    pub wifi_error: f64,
    pub movement_threshold: f64,
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            wifi_error: WIFI_ERROR,
            movement_threshold: MOVEMENT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    mac: String,
    observations: Vec<Observation>,
    /// One confidence weight per observation, derived from its RSSI on insert.
    weights: Vec<f64>,
    estimate: Option<PositionEstimate>,
    room_id: Option<RoomId>,
}

impl DeviceState {
    pub fn new(mac: impl Into<String>) -> Self {
        Self {
            mac: mac.into(),
            observations: Vec::new(),
            weights: Vec::new(),
            estimate: None,
            room_id: None,
        }
    }

    pub fn mac(&self) -> &str {
        &self.mac
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn estimate(&self) -> Option<PositionEstimate> {
        self.estimate
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn set_room_id(&mut self, room_id: Option<RoomId>) {
        self.room_id = room_id;
    }

    pub fn last_observation(&self) -> Option<&Observation> {
        self.observations.last()
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.last_observation().map(|obs| obs.timestamp)
    }

    pub fn last_rssi(&self) -> Option<f64> {
        self.last_observation().map(|obs| obs.rssi)
    }

    pub fn current_floor(&self) -> Option<FloorId> {
        self.last_observation().map(|obs| obs.floor_id)
    }

    /// Whether the parallel history sequences line up.
    pub fn is_consistent(&self) -> bool {
        self.observations.len() == self.weights.len()
    }

    pub fn add_observation(&mut self, x: f64, y: f64, rssi: f64, timestamp: i64, floor_id: FloorId) {
        self.observations.push(Observation {
            x,
            y,
            rssi,
            timestamp,
            floor_id,
        });
        self.weights.push(signal::weight(rssi));
    }

    /// Recompute the estimate from the most recent fix backwards, stopping at
    /// the first older fix the device appears to have moved away from.
    ///
    /// Returns `None` when the device has no history.
    pub fn update_position(
        &mut self,
        table: &MovementTable,
        params: &EstimatorParams,
    ) -> Option<PositionEstimate> {
        let newest = self.observations.len().checked_sub(1)?;
        let seed = self.observations[newest];
        let mut estimate = PositionEstimate {
            x: seed.x,
            y: seed.y,
            error: params.wifi_error,
        };

        for index in (0..newest).rev() {
            let older = self.observations[index];
            let z = normalized_displacement(older.x - estimate.x, older.y - estimate.y, estimate.error);
            let moved = probability_moved(z, table, self.weights[index + 1]);
            if moved > params.movement_threshold {
                trace!(
                    mac = %self.mac,
                    window = newest - index,
                    z,
                    p_moved = moved,
                    "Movement detected, closing estimation window"
                );
                break;
            }

            estimate = weighted_estimate(
                &self.observations[index..],
                &self.weights[index..],
                params.wifi_error,
            );
        }

        self.estimate = Some(estimate);
        Some(estimate)
    }

    /// Activity filter applied before room resolution.
    ///
    /// The recency term compares the latest fix against itself and therefore
    /// always holds; use [`DeviceState::is_recent`] for a check against a
    /// batch reference time.
    pub fn is_active(&self, active_time_window: i64, min_observation_count: usize) -> bool {
        let Some(last) = self.last_timestamp() else {
            return false;
        };
        let recent = last >= last.saturating_sub(active_time_window);

        recent && self.observations.len() >= min_observation_count && !self.is_changing_floor()
    }

    /// Whether the latest fix is within `window` seconds of `reference`.
    pub fn is_recent(&self, reference: i64, window: i64) -> bool {
        self.last_timestamp()
            .is_some_and(|last| last >= reference.saturating_sub(window))
    }

    /// The two latest fixes report different floors.
    pub fn is_changing_floor(&self) -> bool {
        match self.observations.as_slice() {
            [.., previous, latest] => previous.floor_id != latest.floor_id,
            _ => false,
        }
    }
}

fn normalized_displacement(dx: f64, dy: f64, error: f64) -> f64 {
    let distance = dx.hypot(dy);
    if error > 0.0 {
        distance / error
    } else if distance == 0.0 {
        0.0
    } else {
        f64::INFINITY
    }
}

fn weighted_estimate(window: &[Observation], weights: &[f64], wifi_error: f64) -> PositionEstimate {
    let total: f64 = weights.iter().sum();
    // All-zero weights (extremely weak signals) fall back to a plain mean.
    let weight_of = |i: usize| if total > 0.0 { weights[i] } else { 1.0 };
    let norm = if total > 0.0 { total } else { window.len() as f64 };

    let (sum_x, sum_y) = window
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(sx, sy), (i, obs)| {
            (sx + weight_of(i) * obs.x, sy + weight_of(i) * obs.y)
        });
    let x = sum_x / norm;
    let y = sum_y / norm;

    let mut error = wifi_error;
    if window.len() > 1 {
        let (var_x, var_y) = window
            .iter()
            .enumerate()
            .fold((0.0, 0.0), |(vx, vy), (i, obs)| {
                (
                    vx + weight_of(i) * (obs.x - x).powi(2),
                    vy + weight_of(i) * (obs.y - y).powi(2),
                )
            });
        error = (var_x / norm + var_y / norm).sqrt();
    }
    if error.is_nan() || error > wifi_error {
        error = wifi_error;
    }

    PositionEstimate { x, y, error }
}
