// Geo calculations - haversine distance, speed derivation, geofence checks
use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Rectangular geofence. Points on the edge are inside.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct GeofenceBounds {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lng_min: f64,
    pub lng_max: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    #[default]
    Safe,
    OutOfBounds,
}

/// Thresholds below which consecutive fixes are treated as GPS noise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseFloor {
    pub min_elapsed_secs: f64,
    pub min_displacement_m: f64,
}

impl Default for NoiseFloor {
    fn default() -> Self {
        Self {
            min_elapsed_secs: 1.0,
            min_displacement_m: 2.0,
        }
    }
}

/// Outcome of comparing two consecutive fixes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeedEstimate {
    /// Fixes arrived closer together than the elapsed floor; nothing was divided.
    TooSoon,
    /// Displacement under the drift floor.
    Stationary,
    Moving(f64),
}

impl SpeedEstimate {
    pub fn kmh(&self) -> f64 {
        match self {
            SpeedEstimate::Moving(kmh) => *kmh,
            SpeedEstimate::TooSoon | SpeedEstimate::Stationary => 0.0,
        }
    }
}

/// Great-circle distance in kilometres.
pub fn distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Classify the movement between two fixes. `elapsed_secs` may be negative
/// for out-of-order fixes, which counts as too soon.
pub fn estimate_speed(prev: GeoPoint, curr: GeoPoint, elapsed_secs: f64, floor: &NoiseFloor) -> SpeedEstimate {
    if elapsed_secs < floor.min_elapsed_secs {
        return SpeedEstimate::TooSoon;
    }

    let km = distance_km(prev, curr);
    if km * 1000.0 < floor.min_displacement_m {
        return SpeedEstimate::Stationary;
    }

    SpeedEstimate::Moving(km / (elapsed_secs / 3600.0))
}

/// Speed in km/h between two fixes, unrounded. Zero when the fixes are too
/// close in time or space.
pub fn speed_kmh(prev: GeoPoint, curr: GeoPoint, elapsed_secs: f64, floor: &NoiseFloor) -> f64 {
    estimate_speed(prev, curr, elapsed_secs, floor).kmh()
}

pub fn geofence_status(point: GeoPoint, bounds: &GeofenceBounds) -> AlertStatus {
    if point.lat < bounds.lat_min
        || point.lat > bounds.lat_max
        || point.lng < bounds.lng_min
        || point.lng > bounds.lng_max
    {
        AlertStatus::OutOfBounds
    } else {
        AlertStatus::Safe
    }
}

pub fn is_over_speed(speed_kmh: f64, threshold_kmh: f64) -> bool {
    speed_kmh > threshold_kmh
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jakarta() -> GeofenceBounds {
        GeofenceBounds {
            lat_min: -6.4,
            lat_max: -6.0,
            lng_min: 106.6,
            lng_max: 107.0,
        }
    }

    #[test]
    fn test_distance_of_small_latitude_step() {
        let km = distance_km(GeoPoint::new(-6.2, 106.8), GeoPoint::new(-6.2009, 106.8));
        assert!((km - 0.1).abs() < 0.001, "got {}", km);
    }

    #[test]
    fn test_distance_is_symmetric_and_zero_for_same_point() {
        let a = GeoPoint::new(-6.2, 106.8);
        let b = GeoPoint::new(-6.3, 106.9);
        assert_eq!(distance_km(a, a), 0.0);
        assert!((distance_km(a, b) - distance_km(b, a)).abs() < 1e-12);
    }

    #[test]
    fn test_speed_for_scenario_fix_pair() {
        let speed = speed_kmh(
            GeoPoint::new(-6.2, 106.8),
            GeoPoint::new(-6.2009, 106.8),
            2.0,
            &NoiseFloor::default(),
        );
        assert!((speed - 180.0).abs() < 1.0, "got {}", speed);
    }

    #[test]
    fn test_speed_is_zero_below_elapsed_floor() {
        let floor = NoiseFloor::default();
        let a = GeoPoint::new(-6.2, 106.8);
        let b = GeoPoint::new(-6.25, 106.8);
        assert_eq!(estimate_speed(a, b, 0.5, &floor), SpeedEstimate::TooSoon);
        assert_eq!(speed_kmh(a, b, 0.5, &floor), 0.0);
        assert_eq!(speed_kmh(a, b, -3.0, &floor), 0.0);
    }

    #[test]
    fn test_speed_is_zero_for_gps_drift() {
        let floor = NoiseFloor::default();
        // ~1.1 m north
        let a = GeoPoint::new(-6.2, 106.8);
        let b = GeoPoint::new(-6.19999, 106.8);
        assert_eq!(estimate_speed(a, b, 10.0, &floor), SpeedEstimate::Stationary);
        assert_eq!(speed_kmh(a, b, 10.0, &floor), 0.0);
    }

    #[test]
    fn test_speed_never_negative_over_a_track() {
        let floor = NoiseFloor::default();
        let mut prev = GeoPoint::new(-6.2, 106.8);
        for step in 1..50 {
            let curr = GeoPoint::new(-6.2 - step as f64 * 0.00003, 106.8 + (step % 7) as f64 * 0.00001);
            let speed = speed_kmh(prev, curr, (step % 4) as f64 * 0.6, &floor);
            assert!(speed >= 0.0);
            prev = curr;
        }
    }

    #[test]
    fn test_geofence_status() {
        let bounds = jakarta();
        assert_eq!(geofence_status(GeoPoint::new(-6.2, 106.8), &bounds), AlertStatus::Safe);
        assert_eq!(geofence_status(GeoPoint::new(-6.4, 107.0), &bounds), AlertStatus::Safe);
        assert_eq!(geofence_status(GeoPoint::new(-6.5, 106.8), &bounds), AlertStatus::OutOfBounds);
        assert_eq!(geofence_status(GeoPoint::new(-6.2, 107.1), &bounds), AlertStatus::OutOfBounds);
    }

    #[test]
    fn test_over_speed_is_strict() {
        assert!(!is_over_speed(100.0, 100.0));
        assert!(is_over_speed(100.01, 100.0));
    }

    #[test]
    fn test_point_validation() {
        assert!(GeoPoint::new(-6.2, 106.8).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 106.8).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, f64::INFINITY).is_valid());
    }
}
