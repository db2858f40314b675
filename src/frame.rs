use float_ord::FloatOrd;
use geo::Rect;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    util::{merge_regions, y_extents_overlap},
    Detection, DetectionKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameOptions {
    pub tolerance: f32,
    pub min_separation: f32,
    pub max_separation: f32,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            tolerance: 10.0,
            min_separation: 5.0,
            max_separation: 200.0,
        }
    }
}

fn same_frame(seed: &Rect<f32>, other: &Rect<f32>, upright: bool, options: &FrameOptions) -> bool {
    let dx = (seed.min().x - other.min().x).abs();
    if upright {
        let dy = (seed.center().y - other.center().y).abs();
        (y_extents_overlap(seed, other) || dy < options.tolerance)
            && dx > options.min_separation
            && dx < options.max_separation
    } else {
        (seed.min().y - other.min().y).abs() < options.tolerance && dx > options.min_separation
    }
}

#[instrument(level = "debug", skip(items, options), fields(count = items.len()))]
pub fn cluster_horizontally_aligned_elements(
    items: &[Detection],
    page: u32,
    options: &FrameOptions,
) -> Vec<Detection> {
    let rects = items.iter().map(Detection::rect).collect::<Vec<_>>();
    let mut processed = vec![false; items.len()];
    let mut output = Vec::with_capacity(items.len());

    for seed in 0..items.len() {
        if processed[seed] {
            continue;
        }
        processed[seed] = true;
        let Some(seed_rect) = rects[seed] else {
            output.push(items[seed].clone());
            continue;
        };
        // Rotated single glyphs come out taller than they are wide.
        let upright = seed_rect.height() > seed_rect.width();

        let mut group = vec![seed];
        for other in 0..items.len() {
            if processed[other] {
                continue;
            }
            if let Some(rect) = rects[other] {
                if same_frame(&seed_rect, &rect, upright, options) {
                    group.push(other);
                }
            }
        }

        if group.len() == 1 {
            output.push(items[seed].clone());
            continue;
        }
        group.sort_by_key(|&index| FloatOrd(rects[index].map_or(0.0, |rect| rect.min().x)));
        let members = group.iter().map(|&index| items[index].clone()).collect::<Vec<_>>();
        let Some(region) = merge_regions(members.iter().map(|it| &it.bounds), page) else {
            output.push(items[seed].clone());
            continue;
        };
        for &index in &group {
            processed[index] = true;
        }

        let text = members
            .iter()
            .map(|it| it.text.trim())
            .collect::<Vec<_>>()
            .join(" ");
        let kind = if members.iter().any(|it| it.kind == DetectionKind::Gdt) {
            DetectionKind::Gdt
        } else {
            items[seed].kind
        };
        log::debug!("Grouped {} glyphs into frame {text:?}", members.len());
        output.push(Detection::cluster(text, region.to_polygon(), kind, members));
    }
    output
}
