//! Fuzzy green-duration rule used by the signal controller

use std::time::Duration;

/// Hours (local, inclusive) that use the longer durations
pub fn is_rush_hour(hour: u32) -> bool {
    (7..=9).contains(&hour) || (17..=19).contains(&hour)
}

fn light(vehicles: f64) -> f64 {
    if vehicles <= 3.0 {
        1.0
    } else if vehicles < 5.0 {
        (5.0 - vehicles) / 2.0
    } else {
        0.0
    }
}

fn medium(vehicles: f64) -> f64 {
    if vehicles <= 3.0 || vehicles >= 10.0 {
        0.0
    } else if vehicles <= 5.0 {
        (vehicles - 3.0) / 2.0
    } else {
        (10.0 - vehicles) / 5.0
    }
}

fn heavy(vehicles: f64) -> f64 {
    if vehicles <= 5.0 {
        0.0
    } else if vehicles < 10.0 {
        (vehicles - 5.0) / 5.0
    } else {
        1.0
    }
}

/// Weighted mean of the light/medium/heavy durations for a vehicle count
pub fn green_duration(vehicles: f64, rush_hour: bool) -> Duration {
    let (short, mid, long) = if rush_hour { (15.0, 30.0, 60.0) } else { (10.0, 20.0, 40.0) };
    let weights = [light(vehicles), medium(vehicles), heavy(vehicles)];
    let denominator: f64 = weights.iter().sum();
    let secs = if denominator == 0.0 {
        mid
    } else {
        (weights[0] * short + weights[1] * mid + weights[2] * long) / denominator
    };
    Duration::from_secs_f64(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rush_hours() {
        assert!(is_rush_hour(7));
        assert!(is_rush_hour(9));
        assert!(is_rush_hour(19));
        assert!(!is_rush_hour(10));
        assert!(!is_rush_hour(16));
        assert!(!is_rush_hour(0));
    }

    #[test]
    fn test_anchor_points() {
        assert_eq!(green_duration(0.0, false), Duration::from_secs(10));
        assert_eq!(green_duration(5.0, false), Duration::from_secs(20));
        assert_eq!(green_duration(12.0, false), Duration::from_secs(40));
        assert_eq!(green_duration(12.0, true), Duration::from_secs(60));
    }

    #[test]
    fn test_blend_between_sets() {
        // light 0.5, medium 0.5
        assert_eq!(green_duration(4.0, false), Duration::from_secs(15));
    }

    proptest! {
        #[test]
        fn duration_stays_within_bounds(vehicles in 0.0f64..200.0, rush in any::<bool>()) {
            let (lo, hi) = if rush { (15.0, 60.0) } else { (10.0, 40.0) };
            let secs = green_duration(vehicles, rush).as_secs_f64();
            prop_assert!(secs >= lo - 1e-9 && secs <= hi + 1e-9);
        }

        #[test]
        fn more_traffic_never_shortens_green(a in 0.0f64..50.0, b in 0.0f64..50.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(green_duration(lo, false) <= green_duration(hi, false) + Duration::from_micros(1));
        }
    }
}
