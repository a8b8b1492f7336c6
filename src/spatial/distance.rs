use haversine::{distance, Location as HaversineLocation, Units};
use serde::{Deserialize, Serialize};

/// How separation between two `(x, y)` locations is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Planar distance on the raw coordinates (degrees for lon/lat input).
    #[default]
    Euclidean,
    /// Great-circle distance in kilometres, with `x` = longitude, `y` = latitude.
    Haversine,
}

impl DistanceMetric {
    pub fn distance(&self, a: [f64; 2], b: [f64; 2]) -> f64 {
        match self {
            DistanceMetric::Euclidean => ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt(),
            DistanceMetric::Haversine => distance(
                HaversineLocation {
                    latitude: a[1],
                    longitude: a[0],
                },
                HaversineLocation {
                    latitude: b[1],
                    longitude: b[0],
                },
                Units::Kilometers,
            ),
        }
    }

    /// Planar coordinates whose straight-line distances rank neighbours near
    /// `reference_latitude` the way this metric does.
    pub fn project(&self, p: [f64; 2], reference_latitude: f64) -> [f64; 2] {
        match self {
            DistanceMetric::Euclidean => p,
            DistanceMetric::Haversine => [p[0] * reference_latitude.to_radians().cos(), p[1]],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean() {
        assert_eq!(DistanceMetric::Euclidean.distance([0.0, 0.0], [3.0, 4.0]), 5.0);
    }

    #[test]
    fn test_haversine_one_degree_of_latitude() {
        let d = DistanceMetric::Haversine.distance([-120.0, 37.0], [-120.0, 38.0]);
        assert!((d - 111.2).abs() < 0.5, "{d}");
    }

    #[test]
    fn test_projection_shrinks_longitude_only_for_haversine() {
        let p = [10.0, 60.0];
        assert_eq!(DistanceMetric::Euclidean.project(p, 60.0), p);
        let projected = DistanceMetric::Haversine.project(p, 60.0);
        assert!((projected[0] - 5.0).abs() < 1e-9);
        assert_eq!(projected[1], 60.0);
    }
}
