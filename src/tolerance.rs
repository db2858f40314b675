use float_ord::FloatOrd;
use geo::{Coord, Rect};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    alignment::{on_same_horizontal_axis, on_same_vertical_axis, AlignmentOptions},
    gdt::unsigned,
    util::merge_regions,
    Detection, DetectionKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToleranceOptions {
    pub alignment: AlignmentOptions,
    /// Gap between the tolerance pair and its nominal, inclusive lower bound.
    pub min_gap: f32,
    /// Gap between the tolerance pair and its nominal, exclusive upper bound.
    pub max_gap: f32,
    pub horizontal_offset: f32,
    pub vertical_offset: f32,
}

impl Default for ToleranceOptions {
    fn default() -> Self {
        Self {
            alignment: AlignmentOptions::default(),
            min_gap: 1.0,
            max_gap: 15.0,
            horizontal_offset: 10.0,
            vertical_offset: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Orientation {
    Horizontal,
    Vertical,
}

impl Orientation {
    // Only exact angles count; skewed text passes through untouched.
    fn from_angle(angle: f32) -> Option<Self> {
        let angle = angle.rem_euclid(360.0);
        if angle == 0.0 {
            Some(Self::Horizontal)
        } else if angle == 90.0 {
            Some(Self::Vertical)
        } else {
            None
        }
    }
}

fn is_lone_sign(detection: &Detection) -> bool {
    detection.text.trim() == "+"
}

#[instrument(level = "debug", skip(detections, options), fields(count = detections.len()))]
pub fn cluster_tolerances(
    detections: &[Detection],
    page: u32,
    options: &ToleranceOptions,
) -> Vec<Detection> {
    let mut clusterer = ToleranceClusterer {
        detections,
        rects: detections.iter().map(Detection::rect).collect(),
        consumed: vec![false; detections.len()],
        page,
        options,
    };

    let mut emitted = Vec::new();
    // Repeat until a whole pass merges nothing, so the output is a fixed point.
    loop {
        let merged = clusterer.pass();
        if merged.is_empty() {
            break;
        }
        emitted.extend(merged);
    }

    for (index, detection) in detections.iter().enumerate() {
        if clusterer.consumed[index] || is_lone_sign(detection) {
            continue;
        }
        if emitted
            .iter()
            .any(|(_, it): &(usize, Detection)| it.duplicates(detection))
        {
            log::trace!("Dropping duplicate token {:?}", detection.text);
            continue;
        }
        emitted.push((index, detection.clone()));
    }

    emitted.sort_by_key(|(position, _)| *position);
    log::debug!(
        "Tolerance clustering turned {} tokens into {}",
        detections.len(),
        emitted.len()
    );
    emitted.into_iter().map(|(_, it)| it).collect()
}

struct ToleranceClusterer<'a> {
    detections: &'a [Detection],
    rects: Vec<Option<Rect<f32>>>,
    consumed: Vec<bool>,
    page: u32,
    options: &'a ToleranceOptions,
}

impl ToleranceClusterer<'_> {
    fn available(&self, index: usize) -> Option<Rect<f32>> {
        let detection = &self.detections[index];
        if self.consumed[index] || is_lone_sign(detection) || detection.has_tolerance() {
            return None;
        }
        self.rects[index]
    }

    fn pass(&mut self) -> Vec<(usize, Detection)> {
        let mut merged = Vec::new();
        for seed in 0..self.detections.len() {
            let Some(seed_rect) = self.available(seed) else {
                continue;
            };
            let Some(orientation) = Orientation::from_angle(self.detections[seed].angle) else {
                continue;
            };

            let cluster = self.gather(seed, seed_rect, orientation);
            if cluster.len() != 2 {
                continue;
            }
            let Some(nominal) = self.find_nominal(&cluster, orientation) else {
                log::trace!(
                    "No nominal next to tolerance pair {:?}",
                    cluster
                        .iter()
                        .map(|&it| &self.detections[it].text)
                        .collect::<Vec<_>>()
                );
                continue;
            };
            if let Some(combined) = self.combine(seed, nominal, &cluster, orientation) {
                let position = cluster.iter().copied().fold(nominal, usize::min);
                for index in cluster.iter().copied().chain([nominal]) {
                    self.consumed[index] = true;
                }
                merged.push((position, combined));
            }
        }
        merged
    }

    fn gather(&self, seed: usize, seed_rect: Rect<f32>, orientation: Orientation) -> Vec<usize> {
        let alignment = &self.options.alignment;
        let mut cluster = vec![seed];
        for other in 0..self.detections.len() {
            if other == seed {
                continue;
            }
            let Some(rect) = self.available(other) else {
                continue;
            };
            let aligned = match orientation {
                Orientation::Horizontal => on_same_horizontal_axis(&seed_rect, &rect, alignment),
                Orientation::Vertical => on_same_vertical_axis(&seed_rect, &rect, alignment),
            };
            let duplicate = cluster
                .iter()
                .any(|&member| self.detections[member].duplicates(&self.detections[other]));
            if aligned && !duplicate {
                cluster.push(other);
            }
        }
        cluster
    }

    fn find_nominal(&self, cluster: &[usize], orientation: Orientation) -> Option<usize> {
        let corner = cluster
            .iter()
            .filter_map(|&it| self.rects[it])
            .map(|rect| rect.max())
            .reduce(|a, b| Coord {
                x: a.x.max(b.x),
                y: a.y.max(b.y),
            })?;
        let options = self.options;

        (0..self.detections.len())
            .filter(|index| !cluster.contains(index))
            .filter(|&index| {
                self.detections[index]
                    .text
                    .chars()
                    .any(|c| c.is_ascii_digit())
            })
            .filter_map(|index| {
                let rect = self.available(index)?;
                let (gap, offset, max_offset) = match orientation {
                    Orientation::Horizontal => (
                        (rect.min().x - corner.x).abs(),
                        (rect.max().y - corner.y).abs(),
                        options.horizontal_offset,
                    ),
                    Orientation::Vertical => (
                        (rect.min().y - corner.y).abs(),
                        (rect.max().x - corner.x).abs(),
                        options.vertical_offset,
                    ),
                };
                (gap >= options.min_gap && gap < options.max_gap && offset < max_offset)
                    .then_some((index, gap))
            })
            .min_by_key(|(_, gap)| FloatOrd(*gap))
            .map(|(index, _)| index)
    }

    fn combine(
        &self,
        seed: usize,
        nominal: usize,
        cluster: &[usize],
        orientation: Orientation,
    ) -> Option<Detection> {
        let mut pair = [cluster[0], cluster[1]];
        pair.sort_by_key(|&index| {
            let min = self.rects[index].map(|rect| rect.min()).unwrap_or_default();
            match orientation {
                Orientation::Horizontal => FloatOrd(min.x),
                Orientation::Vertical => FloatOrd(min.y),
            }
        });
        let [upper, lower] = pair.map(|index| &self.detections[index]);
        let nominal = &self.detections[nominal];

        let bounds = merge_regions(
            [&nominal.bounds, &upper.bounds, &lower.bounds],
            self.page,
        )?
        .to_polygon();
        let upper_tol = format!("+ {}", unsigned(&upper.text));
        let lower_tol = format!("- {}", unsigned(&lower.text));
        let text = format!("{} {upper_tol} {lower_tol}", nominal.text.trim());
        log::debug!("Paired tolerances into {text:?}");

        let mut combined = Detection::cluster(
            text,
            bounds,
            DetectionKind::Text,
            vec![nominal.clone(), upper.clone(), lower.clone()],
        );
        combined.angle = self.detections[seed].angle;
        combined.upper_tol = Some(upper_tol);
        combined.lower_tol = Some(lower_tol);
        Some(combined)
    }
}
