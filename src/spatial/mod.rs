//! Geostatistical interpolation of station forecasts.

pub mod clip;
pub mod cross_validation;
pub mod distance;
pub mod error;
pub mod grid;
pub mod kriging;
pub mod matern;
pub mod surface;
pub mod variogram;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An observation at a location. `x` is longitude and `y` latitude for
/// geographic data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    pub x: f64,
    pub y: f64,
    pub value: f64,
}

impl SamplePoint {
    pub fn new(x: f64, y: f64, value: f64) -> Self {
        Self { x, y, value }
    }

    pub fn position(&self) -> [f64; 2] {
        [self.x, self.y]
    }
}

/// Collapses stations that share exact coordinates into one point carrying
/// their mean value. Order follows the first station at each location.
pub fn merge_colocated(points: &[SamplePoint]) -> Vec<SamplePoint> {
    let mut merged: Vec<(SamplePoint, usize)> = Vec::with_capacity(points.len());
    let mut slots: HashMap<(u64, u64), usize> = HashMap::new();
    for p in points {
        let key = (p.x.to_bits(), p.y.to_bits());
        match slots.get(&key) {
            Some(&slot) => {
                let (sum, count) = &mut merged[slot];
                sum.value += p.value;
                *count += 1;
            }
            None => {
                slots.insert(key, merged.len());
                merged.push((*p, 1));
            }
        }
    }
    merged
        .into_iter()
        .map(|(p, count)| SamplePoint::new(p.x, p.y, p.value / count as f64))
        .collect()
}
