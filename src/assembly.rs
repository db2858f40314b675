use std::collections::BTreeSet;

use float_ord::FloatOrd;
use geo::{Polygon, Rect};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    frame::{cluster_horizontally_aligned_elements, FrameOptions},
    gdt::{
        is_complete_dimension, is_datum_reference, is_modifier_token, parse_nominal,
        strip_modifiers, unsigned, GdtSymbol,
    },
    tolerance::{cluster_tolerances, ToleranceOptions},
    util::{center_distance, merge_regions, rects_touch, region_from_polygon},
    Detection, DetectionKind, DimensionCandidate, DimensionRecord, DimensionType, GdtData, Origin,
    Region,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyOptions {
    pub tolerance: ToleranceOptions,
    pub frame: FrameOptions,
    pub symbol_distance: f32,
    pub companion_distance: f32,
    pub association_distance: f32,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            tolerance: ToleranceOptions::default(),
            frame: FrameOptions::default(),
            symbol_distance: 50.0,
            companion_distance: 100.0,
            association_distance: 150.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumedIndices {
    text: BTreeSet<usize>,
    gdt: BTreeSet<usize>,
}

impl ConsumedIndices {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_mut(&mut self, kind: DetectionKind) -> &mut BTreeSet<usize> {
        match kind {
            DetectionKind::Gdt => &mut self.gdt,
            DetectionKind::Text | DetectionKind::Dimension => &mut self.text,
        }
    }

    pub fn contains(&self, origin: Origin) -> bool {
        match origin.kind {
            DetectionKind::Gdt => self.gdt.contains(&origin.index),
            DetectionKind::Text | DetectionKind::Dimension => self.text.contains(&origin.index),
        }
    }

    /// Returns `false` if the origin was already taken.
    pub fn insert(&mut self, origin: Origin) -> bool {
        self.set_mut(origin.kind).insert(origin.index)
    }

    pub fn is_free(&self, detection: &Detection) -> bool {
        detection
            .origins()
            .into_iter()
            .all(|origin| !self.contains(origin))
    }

    pub fn consume(&mut self, detection: &Detection) {
        for origin in detection.origins() {
            self.insert(origin);
        }
    }

    pub fn len(&self) -> usize {
        self.text.len() + self.gdt.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Turns one recognition batch into finished records: one per dimension
/// candidate, in input order, followed by one per GD&T frame or symbol that
/// no dimension claimed.
#[instrument(
    level = "debug",
    skip_all,
    fields(dimensions = dimensions.len(), texts = texts.len(), gdts = gdts.len())
)]
pub fn classify_and_assemble(
    dimensions: Vec<DimensionCandidate>,
    texts: &[Detection],
    gdts: &[Detection],
    region: Region,
    options: &AssemblyOptions,
) -> Vec<DimensionRecord> {
    let batch = Batch::prepare(texts, gdts, region.page, options);
    let mut consumed = ConsumedIndices::new();

    let mut records = dimensions
        .into_iter()
        .map(|dimension| batch.assemble_dimension(dimension, region, &mut consumed))
        .collect::<Vec<_>>();
    // Label notes only see symbols left over once every candidate is typed.
    for record in &mut records {
        batch.associate_symbol(record, &mut consumed);
    }
    records.extend(batch.standalone_records(&mut consumed));

    log::debug!(
        "Assembled {} records, {} detections consumed",
        records.len(),
        consumed.len()
    );
    records
}

fn is_frame_token(text: &str) -> bool {
    is_modifier_token(text)
        || (!is_complete_dimension(text) && parse_nominal(text).is_some_and(|value| value < 1.0))
}

fn is_gdt_value(value: Option<f32>) -> bool {
    value.is_some_and(|value| value > 0.0 && value < 1.0)
}

fn symbol_of(detection: &Detection) -> Option<GdtSymbol> {
    if detection.members.is_empty() {
        GdtSymbol::find_in(&detection.text)
    } else {
        detection
            .members
            .iter()
            .filter(|it| it.kind == DetectionKind::Gdt)
            .find_map(|it| GdtSymbol::find_in(&it.text))
    }
}

struct Batch<'a> {
    texts: Vec<Detection>,
    gdts: Vec<Detection>,
    tolerance_clusters: Vec<Detection>,
    frames: Vec<Detection>,
    loose_symbols: Vec<usize>,
    page: u32,
    options: &'a AssemblyOptions,
}

impl<'a> Batch<'a> {
    fn prepare(
        texts: &[Detection],
        gdts: &[Detection],
        page: u32,
        options: &'a AssemblyOptions,
    ) -> Self {
        let texts = texts
            .iter()
            .enumerate()
            .map(|(index, it)| it.clone().with_origin(DetectionKind::Text, index))
            .collect::<Vec<_>>();
        let gdts = gdts
            .iter()
            .enumerate()
            .map(|(index, it)| it.clone().with_origin(DetectionKind::Gdt, index))
            .collect::<Vec<_>>();

        let tolerance_clusters = cluster_tolerances(&texts, page, &options.tolerance)
            .into_iter()
            .filter(Detection::has_tolerance)
            .collect::<Vec<_>>();

        let frame_items = gdts
            .iter()
            .filter(|it| !is_datum_reference(&it.text))
            .chain(texts.iter().filter(|it| is_frame_token(&it.text)))
            .cloned()
            .collect::<Vec<_>>();
        let frames = cluster_horizontally_aligned_elements(&frame_items, page, &options.frame)
            .into_iter()
            .filter(|it| it.clustered && it.members.iter().any(|m| m.kind == DetectionKind::Gdt))
            .collect::<Vec<_>>();

        let framed = frames
            .iter()
            .flat_map(Detection::origins)
            .collect::<Vec<_>>();
        let loose_symbols = gdts
            .iter()
            .enumerate()
            .filter(|(_, it)| !is_datum_reference(&it.text))
            .filter(|(_, it)| it.origin.is_some_and(|origin| !framed.contains(&origin)))
            .map(|(index, _)| index)
            .collect::<Vec<_>>();
        for datum in gdts.iter().filter(|it| is_datum_reference(&it.text)) {
            log::debug!("Skipping datum reference {:?}", datum.text.trim());
        }

        log::debug!(
            "{} tolerance clusters, {} GD&T frames, {} loose symbols",
            tolerance_clusters.len(),
            frames.len(),
            loose_symbols.len()
        );
        Self {
            texts,
            gdts,
            tolerance_clusters,
            frames,
            loose_symbols,
            page,
            options,
        }
    }

    fn column_tolerance(&self) -> f32 {
        self.options.tolerance.alignment.edge_tolerance
    }

    fn find_frame(
        &self,
        dimension: &DimensionCandidate,
        own: Option<Rect<f32>>,
        consumed: &ConsumedIndices,
    ) -> Option<usize> {
        let value = strip_modifiers(dimension.display_value());
        self.frames.iter().position(|frame| {
            consumed.is_free(frame)
                && frame
                    .members
                    .iter()
                    .filter(|member| member.kind == DetectionKind::Text)
                    .any(|member| {
                        let rect = member.rect();
                        let same_box = own.is_some() && rect == own;
                        let same_text = member.text.trim() == value
                            && matches!((rect, own), (Some(a), Some(b)) if rects_touch(&a, &b));
                        same_box || same_text
                    })
        })
    }

    fn find_column_symbol(&self, own: Rect<f32>, consumed: &ConsumedIndices) -> Option<usize> {
        self.loose_symbols
            .iter()
            .copied()
            .filter(|&index| consumed.is_free(&self.gdts[index]))
            .filter_map(|index| {
                let rect = self.gdts[index].rect()?;
                let dy = (rect.min().y - own.min().y).abs();
                ((rect.min().x - own.min().x).abs() < self.column_tolerance()
                    && dy < self.options.symbol_distance)
                    .then_some((index, dy))
            })
            .min_by_key(|(_, dy)| FloatOrd(*dy))
            .map(|(index, _)| index)
    }

    fn find_loose_symbol(
        &self,
        symbol: GdtSymbol,
        own: Option<Rect<f32>>,
        consumed: &ConsumedIndices,
    ) -> Option<usize> {
        self.loose_symbols
            .iter()
            .copied()
            .filter(|&index| {
                let it = &self.gdts[index];
                consumed.is_free(it) && GdtSymbol::find_in(&it.text) == Some(symbol)
            })
            .min_by_key(|&index| {
                let distance = match (own, self.gdts[index].rect()) {
                    (Some(own), Some(rect)) => center_distance(&own, &rect),
                    _ => f32::MAX,
                };
                FloatOrd(distance)
            })
    }

    fn find_associated_symbol(&self, own: Rect<f32>, consumed: &ConsumedIndices) -> Option<usize> {
        self.loose_symbols
            .iter()
            .copied()
            .filter(|&index| consumed.is_free(&self.gdts[index]))
            .filter_map(|index| {
                let distance = center_distance(&own, &self.gdts[index].rect()?);
                (distance < self.options.association_distance).then_some((index, distance))
            })
            .min_by_key(|(_, distance)| FloatOrd(*distance))
            .map(|(index, _)| index)
    }

    fn find_tolerance_cluster(
        &self,
        dimension: &DimensionCandidate,
        own: Rect<f32>,
        consumed: &ConsumedIndices,
    ) -> Option<&Detection> {
        let value = dimension.display_value().trim();
        self.tolerance_clusters.iter().find(|cluster| {
            consumed.is_free(cluster)
                && cluster
                    .members
                    .first()
                    .is_some_and(|nominal| nominal.text.trim() == value)
                && cluster.rect().is_some_and(|rect| rects_touch(&rect, &own))
        })
    }

    fn is_own_token(
        &self,
        token: &Detection,
        dimension: &DimensionCandidate,
        own: Option<Rect<f32>>,
    ) -> bool {
        let rect = token.rect();
        if own.is_some() && rect == own {
            return true;
        }
        token.text.trim() == dimension.text.trim()
            && matches!((rect, own), (Some(a), Some(b)) if rects_touch(&a, &b))
    }

    fn is_column_companion(&self, token: &Detection, own: Rect<f32>) -> bool {
        if is_complete_dimension(&token.text) {
            return false;
        }
        token.rect().is_some_and(|rect| {
            (rect.min().x - own.min().x).abs() < self.column_tolerance()
                && (rect.min().y - own.min().y).abs() < self.options.companion_distance
        })
    }

    #[instrument(level = "trace", skip_all, fields(value = dimension.display_value()))]
    fn assemble_dimension(
        &self,
        mut dimension: DimensionCandidate,
        selection: Region,
        consumed: &mut ConsumedIndices,
    ) -> DimensionRecord {
        let own_rect = dimension.bbox_rect();
        let value = parse_nominal(dimension.display_value());
        let mut frame = None;
        let mut symbol_detection = None;

        if dimension.dimension_type == DimensionType::Length && is_gdt_value(value) {
            if let Some(index) = self.find_frame(&dimension, own_rect, consumed) {
                dimension.dimension_type = DimensionType::Gdt(symbol_of(&self.frames[index]));
                frame = Some(index);
            } else if let Some(index) =
                own_rect.and_then(|own| self.find_column_symbol(own, consumed))
            {
                dimension.dimension_type =
                    DimensionType::Gdt(GdtSymbol::find_in(&self.gdts[index].text));
                symbol_detection = Some(index);
            }
            if dimension.dimension_type.is_gdt() {
                log::debug!(
                    "Reclassified {:?} as {}",
                    dimension.display_value(),
                    dimension.dimension_type
                );
            }
        }

        if dimension.dimension_type.is_gdt() && value.is_some_and(|value| value >= 1.0) {
            log::warn!(
                "{:?} was typed {} but is too large for a geometric tolerance, keeping it as a length",
                dimension.display_value(),
                dimension.dimension_type
            );
            dimension.dimension_type = DimensionType::Length;
            dimension.gdt_data = None;
        }

        let mut text_data = Vec::new();
        let mut gdt_data = Vec::new();
        let mut polygons: Vec<Polygon<f32>> = vec![dimension.bbox.clone()];

        if dimension.dimension_type.is_gdt() {
            if dimension.dimension_type.symbol().is_none() {
                let symbol = dimension
                    .gdt_data
                    .as_ref()
                    .and_then(|data| GdtSymbol::find_in(&data.class_name));
                dimension.dimension_type = DimensionType::Gdt(symbol);
            }
            if frame.is_none() && symbol_detection.is_none() {
                frame = self.find_frame(&dimension, own_rect, consumed);
                if let (Some(index), None) = (frame, dimension.dimension_type.symbol()) {
                    dimension.dimension_type = DimensionType::Gdt(symbol_of(&self.frames[index]));
                }
            }
            if frame.is_none() && symbol_detection.is_none() {
                symbol_detection = dimension
                    .dimension_type
                    .symbol()
                    .and_then(|symbol| self.find_loose_symbol(symbol, own_rect, consumed));
            }
            if is_gdt_value(value) {
                dimension.nominal_value = dimension.nominal_value.as_deref().map(strip_modifiers);
                dimension.text = strip_modifiers(&dimension.text);
            }

            if let Some(frame) = frame.map(|index| &self.frames[index]) {
                consumed.consume(frame);
                for member in &frame.members {
                    polygons.push(member.bounds.clone());
                    match member.kind {
                        DetectionKind::Gdt if gdt_data.is_empty() => gdt_data.push(member.clone()),
                        DetectionKind::Gdt => {}
                        _ => text_data.push(member.clone()),
                    }
                }
            }
            if let Some(symbol) = symbol_detection.map(|index| &self.gdts[index]) {
                if consumed.is_free(symbol) {
                    consumed.consume(symbol);
                    polygons.push(symbol.bounds.clone());
                    gdt_data.push(symbol.clone());
                }
            }
            self.take_own_tokens(&dimension, own_rect, consumed, &mut text_data, &mut polygons);
            if let Some(own) = own_rect {
                for token in &self.texts {
                    if consumed.is_free(token) && self.is_column_companion(token, own) {
                        consumed.consume(token);
                        polygons.push(token.bounds.clone());
                        text_data.push(token.clone());
                    }
                }
            }
            if dimension.gdt_data.is_none() {
                dimension.gdt_data = gdt_data.first().map(GdtData::from);
            }
        } else {
            // Plain dimensions keep their own box; GD&T glyphs never widen it.
            if let Some(own) = own_rect {
                if let Some(cluster) = self.find_tolerance_cluster(&dimension, own, consumed) {
                    consumed.consume(cluster);
                    polygons.push(cluster.bounds.clone());
                    if dimension.upper_tolerance.is_none() {
                        dimension.upper_tolerance =
                            cluster.upper_tol.as_deref().map(|it| format!("+{}", unsigned(it)));
                    }
                    if dimension.lower_tolerance.is_none() {
                        dimension.lower_tolerance =
                            cluster.lower_tol.as_deref().map(|it| format!("-{}", unsigned(it)));
                    }
                    text_data.push(cluster.clone());
                }
            }
            self.take_own_tokens(&dimension, own_rect, consumed, &mut text_data, &mut Vec::new());
        }

        let bbox = match merge_regions(&polygons, self.page) {
            Some(merged) if !merged.is_degenerate() => merged,
            _ => region_from_polygon(&dimension.bbox, self.page).unwrap_or_else(|| {
                log::warn!(
                    "Dimension {:?} has no usable box, falling back to the selection",
                    dimension.display_value()
                );
                selection
            }),
        };

        let label = label_for(&dimension, None);
        DimensionRecord {
            bbox,
            label,
            dimension_data: dimension,
            text_data,
            gdt_data,
        }
    }

    fn associate_symbol(&self, record: &mut DimensionRecord, consumed: &mut ConsumedIndices) {
        if record.dimension_data.dimension_type.is_gdt() {
            return;
        }
        let Some(own) = record.dimension_data.bbox_rect() else {
            return;
        };
        let Some(index) = self.find_associated_symbol(own, consumed) else {
            return;
        };
        let symbol = &self.gdts[index];
        consumed.consume(symbol);
        let association = GdtSymbol::find_in(&symbol.text)
            .map_or_else(|| symbol.text.trim().to_string(), GdtSymbol::describe);
        record.label = label_for(&record.dimension_data, Some(association.as_str()));
        record.gdt_data.push(symbol.clone());
    }

    fn take_own_tokens(
        &self,
        dimension: &DimensionCandidate,
        own: Option<Rect<f32>>,
        consumed: &mut ConsumedIndices,
        text_data: &mut Vec<Detection>,
        polygons: &mut Vec<Polygon<f32>>,
    ) {
        for token in &self.texts {
            if consumed.is_free(token) && self.is_own_token(token, dimension, own) {
                consumed.consume(token);
                polygons.push(token.bounds.clone());
                text_data.push(token.clone());
            }
        }
    }

    fn standalone_records(&self, consumed: &mut ConsumedIndices) -> Vec<DimensionRecord> {
        let entities = self
            .frames
            .iter()
            .chain(self.loose_symbols.iter().map(|&index| &self.gdts[index]));
        let mut records = Vec::new();
        for entity in entities {
            if !consumed.is_free(entity) {
                continue;
            }
            let Some(record) = self.standalone_record(entity) else {
                log::warn!("GD&T {:?} has no usable box, skipping", entity.text);
                continue;
            };
            consumed.consume(entity);
            records.push(record);
        }
        records
    }

    fn standalone_record(&self, entity: &Detection) -> Option<DimensionRecord> {
        let bbox = entity.region(self.page)?;
        let members = if entity.members.is_empty() {
            std::slice::from_ref(entity)
        } else {
            entity.members.as_slice()
        };
        let symbol_member = members.iter().find(|it| it.kind == DetectionKind::Gdt);
        let text_data = members
            .iter()
            .filter(|it| it.kind != DetectionKind::Gdt)
            .cloned()
            .collect::<Vec<_>>();
        let value = text_data
            .iter()
            .find(|it| parse_nominal(&it.text).is_some())
            .map(|it| strip_modifiers(&it.text));

        let described = symbol_of(entity)
            .map_or_else(|| entity.text.trim().to_string(), GdtSymbol::describe);
        let label = match &value {
            Some(value) => format!("GDT: {described} - {value}"),
            None => format!("GDT: {described}"),
        };

        let dimension = DimensionCandidate {
            text: entity.text.trim().to_string(),
            nominal_value: None,
            upper_tolerance: None,
            lower_tolerance: None,
            dimension_type: DimensionType::Gdt(None),
            bbox: entity.bounds.clone(),
            gdt_data: symbol_member.map(GdtData::from),
        };
        Some(DimensionRecord {
            bbox,
            label,
            dimension_data: dimension,
            text_data,
            gdt_data: symbol_member.cloned().into_iter().collect(),
        })
    }
}

fn label_for(dimension: &DimensionCandidate, association: Option<&str>) -> String {
    let value = dimension.display_value().trim();
    match &dimension.dimension_type {
        DimensionType::Gdt(Some(symbol)) => format!("GDT: {} - {value}", symbol.describe()),
        DimensionType::Gdt(None) => format!("GDT: {value}"),
        other => match association {
            Some(association) => format!("{other}: {value} (GDT: {association})"),
            None => format!("{other}: {value}"),
        },
    }
}
