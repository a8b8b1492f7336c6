use crate::spatial::distance::DistanceMetric;
use crate::spatial::error::SpatialError;
use crate::spatial::SamplePoint;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Smallest box containing every point; `None` for no points or
    /// non-finite coordinates.
    pub fn of_points(points: &[SamplePoint]) -> Option<Self> {
        let first = points.first()?;
        let bbox = points.iter().fold(
            BoundingBox::new(first.x, first.y, first.x, first.y),
            |b, p| BoundingBox::new(b.min_x.min(p.x), b.min_y.min(p.y), b.max_x.max(p.x), b.max_y.max(p.y)),
        );
        bbox.is_finite().then_some(bbox)
    }

    pub fn is_finite(&self) -> bool {
        [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|v| v.is_finite())
    }

    pub fn expand(&self, margin: f64) -> Self {
        BoundingBox::new(
            self.min_x - margin,
            self.min_y - margin,
            self.max_x + margin,
            self.max_y + margin,
        )
    }

    /// Distance between the lower-left and upper-right corners.
    pub fn diagonal(&self, metric: DistanceMetric) -> f64 {
        metric.distance([self.min_x, self.min_y], [self.max_x, self.max_y])
    }
}

/// Regular prediction grid. Points are ordered with x varying fastest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialGrid {
    bounds: BoundingBox,
    step: f64,
    nx: usize,
    ny: usize,
}

impl SpatialGrid {
    /// Grid from `min` to `max` (inclusive where the step lands on it) in both
    /// directions.
    pub fn from_bounds(bounds: BoundingBox, step: f64) -> Result<Self, SpatialError> {
        if !(step.is_finite() && step > 0.0) {
            return Err(SpatialError::InvalidGridStep(step));
        }
        if !bounds.is_finite() || bounds.max_x < bounds.min_x || bounds.max_y < bounds.min_y {
            return Err(SpatialError::InvalidGridBounds);
        }
        let count = |span: f64| (span / step + 1e-9).floor() as usize + 1;
        Ok(Self {
            bounds,
            step,
            nx: count(bounds.max_x - bounds.min_x),
            ny: count(bounds.max_y - bounds.min_y),
        })
    }

    /// Grid over the bounding box of `points`, widened by `margin`.
    pub fn covering(points: &[SamplePoint], step: f64, margin: f64) -> Result<Self, SpatialError> {
        let bounds = BoundingBox::of_points(points).ok_or(SpatialError::InvalidGridBounds)?;
        Self::from_bounds(bounds.expand(margin), step)
    }

    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.nx, self.ny)
    }

    pub fn len(&self) -> usize {
        self.nx * self.ny
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn points(&self) -> Vec<(f64, f64)> {
        (0..self.ny)
            .flat_map(|j| {
                (0..self.nx).map(move |i| {
                    (
                        self.bounds.min_x + i as f64 * self.step,
                        self.bounds.min_y + j as f64 * self.step,
                    )
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_order_is_x_fastest() -> Result<(), SpatialError> {
        let grid = SpatialGrid::from_bounds(BoundingBox::new(0.0, 10.0, 1.0, 10.5), 0.5)?;
        assert_eq!(grid.dimensions(), (3, 2));
        assert_eq!(
            grid.points(),
            vec![(0.0, 10.0), (0.5, 10.0), (1.0, 10.0), (0.0, 10.5), (0.5, 10.5), (1.0, 10.5)]
        );
        Ok(())
    }

    #[test]
    fn test_covering_with_margin() -> Result<(), SpatialError> {
        let points = [SamplePoint::new(-121.0, 36.0, 1.0), SamplePoint::new(-119.0, 38.0, 2.0)];
        let grid = SpatialGrid::covering(&points, 0.5, 0.5)?;
        assert_eq!(grid.bounds(), BoundingBox::new(-121.5, 35.5, -118.5, 38.5));
        assert_eq!(grid.len(), 49);
        Ok(())
    }

    #[test]
    fn test_invalid_step() {
        let bounds = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        assert_eq!(
            SpatialGrid::from_bounds(bounds, 0.0),
            Err(SpatialError::InvalidGridStep(0.0))
        );
        assert!(SpatialGrid::covering(&[], 0.1, 0.0).is_err());
    }
}
