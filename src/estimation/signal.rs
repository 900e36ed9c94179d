//! RSSI confidence weighting.
//!
//! Formula: weight = 0.5 * tanh(steepness * (rssi - midpoint)) + 0.5

/// Signal strength (dBm) that maps to a weight of exactly 0.5.
pub const RSSI_MIDPOINT_DBM: f64 = -70.0;
/// Slope of the tanh curve; saturates about 10 dBm either side of the midpoint.
pub const RSSI_STEEPNESS: f64 = 0.2;

/// Confidence weight in [0, 1] for a raw RSSI reading, monotonically increasing.
///
/// Roughly 0 below -80 dBm, 0.5 at -70 dBm and 1 above -60 dBm.
pub fn weight(rssi: f64) -> f64 {
    0.5 * (RSSI_STEEPNESS * (rssi - RSSI_MIDPOINT_DBM)).tanh() + 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midpoint_is_exactly_half() {
        assert_eq!(weight(-70.0), 0.5);
    }

    #[test]
    fn strong_signals_saturate_high() {
        for rssi in [-60.0, -55.0, -40.0, -10.0, 0.0] {
            assert!(weight(rssi) > 0.95, "rssi {rssi} gave {}", weight(rssi));
        }
    }

    #[test]
    fn weak_signals_saturate_low() {
        for rssi in [-80.0, -85.0, -95.0, -120.0] {
            assert!(weight(rssi) < 0.05, "rssi {rssi} gave {}", weight(rssi));
        }
    }

    #[test]
    fn weight_is_monotonic() {
        let mut previous = weight(-130.0);
        let mut rssi = -129.5;
        while rssi <= 0.0 {
            let current = weight(rssi);
            assert!(current >= previous);
            previous = current;
            rssi += 0.5;
        }
    }
}
