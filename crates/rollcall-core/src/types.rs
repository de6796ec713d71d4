use serde::{Deserialize, Serialize};

/// Axis-aligned face region in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Number of raw cascade hits merged into this region (0 when ungrouped).
    pub neighbors: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height, neighbors: 0 }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Output of the classifier for one normalized face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: u32,
    /// Chi-square histogram distance to the nearest training sample.
    ///
    /// Lower = more similar. Not a probability.
    pub distance: f64,
}

impl Prediction {
    /// Hard acceptance cutoff: anything above `threshold` is an unknown face.
    pub fn is_accepted(&self, threshold: f64) -> bool {
        self.distance <= threshold
    }
}
