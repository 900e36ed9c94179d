//! Movement classification from a precomputed z -> tail probability table.
//!
//! The table replaces a live normal-CDF evaluation: lookups snap to the nearest
//! tabulated z-score instead of interpolating.

use crate::assets::{AssetError, read_json};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_TABLE_STEP: f64 = 0.01;
pub const DEFAULT_TABLE_MAX_Z: f64 = 5.0;

#[derive(Debug, Error, PartialEq)]
pub enum TableError {
    #[error("movement table is empty")]
    Empty,
    #[error("z-score {0} is negative or not finite")]
    InvalidKey(f64),
    #[error("z-score key {0:?} is not a number")]
    UnparsableKey(String),
    #[error("duplicate z-score {0}")]
    DuplicateKey(f64),
    #[error("probability {probability} for z={z} is outside [0, 0.5]")]
    InvalidProbability { z: f64, probability: f64 },
    #[error("probability increases between z={lower} and z={upper}")]
    NotDecreasing { lower: f64, upper: f64 },
}

/// Ascending z-scores paired with one-sided standard normal tail probabilities.
#[derive(Debug, Clone, PartialEq)]
pub struct MovementTable {
    z_values: Vec<f64>,
    tail_probabilities: Vec<f64>,
}

impl MovementTable {
    /// Build a table from unordered `(z, p)` pairs, sorting by z.
    pub fn from_pairs(mut pairs: Vec<(f64, f64)>) -> Result<Self, TableError> {
        if pairs.is_empty() {
            return Err(TableError::Empty);
        }
        for &(z, probability) in &pairs {
            if !z.is_finite() || z < 0.0 {
                return Err(TableError::InvalidKey(z));
            }
            if !(0.0..=0.5).contains(&probability) {
                return Err(TableError::InvalidProbability { z, probability });
            }
        }
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        for window in pairs.windows(2) {
            let (lower, upper) = (window[0], window[1]);
            if lower.0 == upper.0 {
                return Err(TableError::DuplicateKey(lower.0));
            }
            if upper.1 > lower.1 {
                return Err(TableError::NotDecreasing {
                    lower: lower.0,
                    upper: upper.0,
                });
            }
        }

        let (z_values, tail_probabilities) = pairs.into_iter().unzip();
        Ok(Self {
            z_values,
            tail_probabilities,
        })
    }

    /// Tabulate `P(Z > z)` for `z = 0, step, 2*step, ..., max_z`.
    pub fn standard_normal(step: f64, max_z: f64) -> Self {
        let step = if step.is_finite() && step > 0.0 {
            step
        } else {
            DEFAULT_TABLE_STEP
        };
        let count = (max_z.max(0.0) / step).round() as usize;
        let mut z_values = Vec::with_capacity(count + 1);
        let mut tail_probabilities: Vec<f64> = Vec::with_capacity(count + 1);
        for i in 0..=count {
            let z = i as f64 * step;
            // Approximation wiggle must not break monotonicity.
            let previous = tail_probabilities.last().copied().unwrap_or(0.5);
            z_values.push(z);
            tail_probabilities.push(standard_normal_tail(z).min(previous));
        }
        Self {
            z_values,
            tail_probabilities,
        }
    }

    /// Load a `{"z": p, ...}` JSON object.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AssetError> {
        let path = path.as_ref();
        let raw: HashMap<String, f64> = read_json(path)?;
        let mut pairs = Vec::with_capacity(raw.len());
        for (key, probability) in raw {
            let z = key
                .trim()
                .parse::<f64>()
                .map_err(|_| AssetError::invalid(path, TableError::UnparsableKey(key.clone())))?;
            pairs.push((z, probability));
        }
        Self::from_pairs(pairs).map_err(|err| AssetError::invalid(path, err))
    }

    pub fn len(&self) -> usize {
        self.z_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.z_values.is_empty()
    }

    /// Tail probability of the tabulated z-score nearest to `z`.
    ///
    /// Ties go to the lower key. Values outside the table (and NaN) clamp to
    /// the first or last entry.
    pub fn probability_stationary(&self, z: f64) -> f64 {
        let (Some(&first), Some(&last)) = (
            self.tail_probabilities.first(),
            self.tail_probabilities.last(),
        ) else {
            return 0.5;
        };

        let index = self.z_values.partition_point(|&key| key < z);
        if index == 0 {
            return first;
        }
        if index == self.z_values.len() {
            return last;
        }

        let lower = self.z_values[index - 1];
        let upper = self.z_values[index];
        if (z - lower).abs() <= (z - upper).abs() {
            self.tail_probabilities[index - 1]
        } else {
            self.tail_probabilities[index]
        }
    }
}

impl Default for MovementTable {
    fn default() -> Self {
        Self::standard_normal(DEFAULT_TABLE_STEP, DEFAULT_TABLE_MAX_Z)
    }
}

/// Probability that a device moved, given a displacement z-score and the
/// confidence weight of the newer observation.
///
/// Doubling the one-sided tail gives a two-sided test.
pub fn probability_moved(z: f64, table: &MovementTable, weight: f64) -> f64 {
    (1.0 - 2.0 * table.probability_stationary(z)) * weight
}

/// `P(Z > z)` for a standard normal, via the Abramowitz-Stegun 7.1.26 erfc
/// approximation (absolute error below 1.5e-7).
fn standard_normal_tail(z: f64) -> f64 {
    const P: f64 = 0.327_591_1;
    const A: [f64; 5] = [
        0.254_829_592,
        -0.284_496_736,
        1.421_413_741,
        -1.453_152_027,
        1.061_405_429,
    ];

    let x = z.abs() / std::f64::consts::SQRT_2;
    let t = 1.0 / (1.0 + P * x);
    let polynomial = A.iter().rev().fold(0.0, |acc, a| acc * t + a) * t;
    let erfc = polynomial * (-x * x).exp();
    let tail = 0.5 * erfc;
    if z >= 0.0 {
        tail.clamp(0.0, 0.5)
    } else {
        (1.0 - tail).clamp(0.5, 1.0)
    }
}
