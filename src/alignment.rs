use geo::Rect;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentOptions {
    /// Maximum difference between the shared edges, exclusive.
    pub edge_tolerance: f32,
    pub extent_factor: f32,
}

impl Default for AlignmentOptions {
    fn default() -> Self {
        Self {
            edge_tolerance: 1.0,
            extent_factor: 1.2,
        }
    }
}

pub fn on_same_vertical_axis(a: &Rect<f32>, b: &Rect<f32>, options: &AlignmentOptions) -> bool {
    (a.min().x - b.min().x).abs() < options.edge_tolerance
        && (a.min().y - b.min().y).abs() <= options.extent_factor * a.height()
}

pub fn on_same_horizontal_axis(
    a: &Rect<f32>,
    b: &Rect<f32>,
    options: &AlignmentOptions,
) -> bool {
    (a.min().y - b.min().y).abs() < options.edge_tolerance
        && (a.min().x - b.min().x).abs() <= options.extent_factor * a.width()
}
