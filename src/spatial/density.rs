//! Per-floor device density grid built from refined records.
//!
//! The grid spans the floor's rooms (and the origin), sums a Gaussian bump per
//! device, suppresses faint cells and masks out everything outside a room.
//! Values are normalised to [0, 1]; turning them into pixels is left to callers.

use crate::estimation::device::PositionEstimate;
use crate::pipeline::RefinedRecord;
use crate::spatial::{FloorId, FloorPlan};

/// Lower bound on the error radius used when spreading a device over the grid.
pub const MIN_DISPLAY_ERROR: f64 = 3.0;
/// Summed density below this is treated as noise.
pub const DENSITY_FLOOR: f64 = 1.5;
pub const DEFAULT_CELLS_PER_UNIT: f64 = 4.0;

#[derive(Debug, Clone, PartialEq)]
pub struct DensityGrid {
    pub floor_id: FloorId,
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub columns: usize,
    pub rows: usize,
    /// Row-major, `rows * columns` values in [0, 1].
    values: Vec<f64>,
}

impl DensityGrid {
    /// Build the grid for `floor_id`, or `None` when the floor has no rooms.
    pub fn for_floor(
        floor_plan: &FloorPlan,
        floor_id: FloorId,
        records: &[RefinedRecord],
        cells_per_unit: f64,
    ) -> Option<Self> {
        let floor = floor_plan.floor(floor_id)?;
        let bounds = floor.bounds()?;
        let min_x = bounds.min().x.min(0.0);
        let min_y = bounds.min().y.min(0.0);
        let max_x = bounds.max().x.max(0.0);
        let max_y = bounds.max().y.max(0.0);

        let columns = axis_samples(max_x - min_x, cells_per_unit);
        let rows = axis_samples(max_y - min_y, cells_per_unit);
        let mut grid = Self {
            floor_id,
            min_x,
            min_y,
            max_x,
            max_y,
            columns,
            rows,
            values: vec![0.0; rows * columns],
        };

        let estimates: Vec<PositionEstimate> = records
            .iter()
            .filter(|record| record.floor_id == floor_id)
            .filter(|record| record.x.is_finite() && record.y.is_finite() && record.error.is_finite())
            .map(|record| PositionEstimate {
                x: record.x,
                y: record.y,
                error: record.error,
            })
            .collect();

        for row in 0..rows {
            let y = grid.y_at(row);
            for column in 0..columns {
                let x = grid.x_at(column);
                if floor.room_at(x, y).is_none() {
                    continue;
                }
                let density: f64 = estimates
                    .iter()
                    .map(|estimate| estimate.density_at(x, y, MIN_DISPLAY_ERROR))
                    .sum();
                if density >= DENSITY_FLOOR {
                    grid.values[row * columns + column] = density;
                }
            }
        }

        let peak = grid.values.iter().copied().fold(0.0, f64::max);
        if peak > 0.0 {
            grid.values.iter_mut().for_each(|value| *value /= peak);
        }
        Some(grid)
    }

    pub fn x_at(&self, column: usize) -> f64 {
        sample(self.min_x, self.max_x, column, self.columns)
    }

    pub fn y_at(&self, row: usize) -> f64 {
        sample(self.min_y, self.max_y, row, self.rows)
    }

    pub fn value(&self, row: usize, column: usize) -> Option<f64> {
        if row >= self.rows || column >= self.columns {
            return None;
        }
        self.values.get(row * self.columns + column).copied()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn peak(&self) -> f64 {
        self.values.iter().copied().fold(0.0, f64::max)
    }
}

fn axis_samples(extent: f64, cells_per_unit: f64) -> usize {
    let cells_per_unit = if cells_per_unit > 0.0 {
        cells_per_unit
    } else {
        DEFAULT_CELLS_PER_UNIT
    };
    ((extent * cells_per_unit) as usize).max(2)
}

// Evenly spaced samples including both endpoints.
fn sample(min: f64, max: f64, index: usize, count: usize) -> f64 {
    if count < 2 {
        return min;
    }
    min + (max - min) * index as f64 / (count - 1) as f64
}
