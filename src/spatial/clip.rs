//! Restricting an interpolated surface to a geographic boundary.

use crate::spatial::kriging::KrigingPrediction;
use geo::{Contains, MultiPolygon, Point};
use serde::{Deserialize, Serialize};

/// Answers which named region, if any, contains a location.
pub trait BoundaryLookup: Send + Sync {
    fn region_of(&self, x: f64, y: f64) -> Option<String>;
}

/// Keeps every point; the region name is empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBoundary;

impl BoundaryLookup for NoBoundary {
    fn region_of(&self, _x: f64, _y: f64) -> Option<String> {
        Some(String::new())
    }
}

/// Named (multi)polygons in the same coordinates as the grid.
#[derive(Debug, Clone, Default)]
pub struct PolygonBoundary {
    regions: Vec<(String, MultiPolygon<f64>)>,
}

impl PolygonBoundary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region(mut self, name: impl Into<String>, shape: impl Into<MultiPolygon<f64>>) -> Self {
        self.regions.push((name.into(), shape.into()));
        self
    }

    pub fn region_names(&self) -> impl Iterator<Item = &str> {
        self.regions.iter().map(|(name, _)| name.as_str())
    }
}

impl BoundaryLookup for PolygonBoundary {
    /// First region whose interior contains the point.
    fn region_of(&self, x: f64, y: f64) -> Option<String> {
        let point = Point::new(x, y);
        self.regions
            .iter()
            .find(|(_, shape)| shape.contains(&point))
            .map(|(name, _)| name.clone())
    }
}

/// A kept surface cell, tagged with its region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfacePoint {
    pub x: f64,
    pub y: f64,
    /// Back-transformed prediction.
    pub predicted: f64,
    /// Kriging variance on the kriging scale.
    pub variance: f64,
    pub region: String,
}

/// Drops predictions outside every region and tags the rest.
pub fn clip_surface(predictions: &[KrigingPrediction], lookup: &dyn BoundaryLookup) -> Vec<SurfacePoint> {
    predictions
        .iter()
        .filter_map(|p| {
            lookup.region_of(p.x, p.y).map(|region| SurfacePoint {
                x: p.x,
                y: p.y,
                predicted: p.value,
                variance: p.variance,
                region,
            })
        })
        .collect()
}
