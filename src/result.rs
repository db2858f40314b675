use std::fmt;

use geo::{Coord, Polygon, Rect};
use serde::{Deserialize, Serialize};

use crate::{gdt::GdtSymbol, util};

/// Axis-aligned box on a drawing page. `x`/`y` is the minimum corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub page: u32,
}

impl Region {
    pub fn new(x: f32, y: f32, width: f32, height: f32, page: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            page,
        }
    }

    pub fn from_rect(rect: Rect<f32>, page: u32) -> Self {
        let min = rect.min();
        Self::new(min.x, min.y, rect.width(), rect.height(), page)
    }

    pub fn rect(&self) -> Rect<f32> {
        Rect::new(
            Coord {
                x: self.x,
                y: self.y,
            },
            Coord {
                x: self.x + self.width,
                y: self.y + self.height,
            },
        )
    }

    pub fn to_polygon(&self) -> Polygon<f32> {
        util::polygon_from_points([
            Coord {
                x: self.x,
                y: self.y,
            },
            Coord {
                x: self.x + self.width,
                y: self.y,
            },
            Coord {
                x: self.x + self.width,
                y: self.y + self.height,
            },
            Coord {
                x: self.x,
                y: self.y + self.height,
            },
        ])
    }

    pub fn union(&self, other: &Region) -> Region {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = (self.x + self.width).max(other.x + other.width);
        let bottom = (self.y + self.height).max(other.y + other.height);
        Region::new(x, y, right - x, bottom - y, self.page)
    }

    pub fn contains(&self, other: &Region) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x + other.width <= self.x + self.width
            && other.y + other.height <= self.y + self.height
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionKind {
    #[default]
    Text,
    Gdt,
    Dimension,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Origin {
    pub kind: DetectionKind,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub text: String,
    #[serde(rename = "box", with = "polygon_points")]
    pub bounds: Polygon<f32>,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub angle: f32,
    #[serde(rename = "type", default)]
    pub kind: DetectionKind,
    #[serde(skip)]
    pub origin: Option<Origin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper_tol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower_tol: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub clustered: bool,
    #[serde(
        rename = "clusterItems",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub members: Vec<Detection>,
}

impl Detection {
    pub fn new(text: impl Into<String>, bounds: Polygon<f32>, kind: DetectionKind) -> Self {
        Self {
            text: text.into(),
            bounds,
            confidence: 1.0,
            angle: 0.0,
            kind,
            origin: None,
            upper_tol: None,
            lower_tol: None,
            clustered: false,
            members: Vec::new(),
        }
    }

    pub fn with_angle(mut self, angle: f32) -> Self {
        self.angle = angle;
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_origin(mut self, kind: DetectionKind, index: usize) -> Self {
        self.origin = Some(Origin { kind, index });
        self
    }

    /// Builds a cluster value out of `members`, which must already be in
    /// reading order.
    pub(crate) fn cluster(
        text: String,
        bounds: Polygon<f32>,
        kind: DetectionKind,
        members: Vec<Detection>,
    ) -> Self {
        let confidence = members
            .iter()
            .map(|it| it.confidence)
            .fold(f32::INFINITY, f32::min);
        let angle = members.first().map_or(0.0, |it| it.angle);
        Self {
            text,
            bounds,
            confidence: if confidence.is_finite() { confidence } else { 0.0 },
            angle,
            kind,
            origin: None,
            upper_tol: None,
            lower_tol: None,
            clustered: true,
            members,
        }
    }

    pub fn rect(&self) -> Option<Rect<f32>> {
        util::bounds(&self.bounds)
    }

    pub fn region(&self, page: u32) -> Option<Region> {
        util::region_from_polygon(&self.bounds, page)
    }

    pub fn has_tolerance(&self) -> bool {
        self.upper_tol.is_some() || self.lower_tol.is_some()
    }

    pub fn duplicates(&self, other: &Detection) -> bool {
        self.text == other.text && self.bounds == other.bounds
    }

    pub fn origins(&self) -> Vec<Origin> {
        if self.members.is_empty() {
            self.origin.into_iter().collect()
        } else {
            self.members.iter().flat_map(Detection::origins).collect()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DimensionType {
    Length,
    Diameter,
    Gdt(Option<GdtSymbol>),
    Other(String),
}

impl DimensionType {
    pub fn is_gdt(&self) -> bool {
        matches!(self, Self::Gdt(_))
    }

    pub fn symbol(&self) -> Option<GdtSymbol> {
        match self {
            Self::Gdt(symbol) => *symbol,
            _ => None,
        }
    }
}

impl From<String> for DimensionType {
    fn from(value: String) -> Self {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("length") {
            Self::Length
        } else if trimmed.eq_ignore_ascii_case("diameter") {
            Self::Diameter
        } else if trimmed.eq_ignore_ascii_case("gdt") {
            Self::Gdt(None)
        } else if let Some(suffix) = trimmed
            .get(..4)
            .filter(|prefix| prefix.eq_ignore_ascii_case("gdt-"))
            .and_then(|_| trimmed.get(4..))
        {
            let symbol = GdtSymbol::find_in(suffix);
            if symbol.is_none() {
                log::debug!("Unknown GD&T symbol in dimension type {trimmed:?}");
            }
            Self::Gdt(symbol)
        } else {
            Self::Other(trimmed.to_string())
        }
    }
}

impl From<DimensionType> for String {
    fn from(value: DimensionType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DimensionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Length => f.write_str("Length"),
            Self::Diameter => f.write_str("Diameter"),
            Self::Gdt(None) => f.write_str("GDT"),
            Self::Gdt(Some(symbol)) => write!(f, "GDT-{}", symbol.glyph()),
            Self::Other(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GdtData {
    pub class_name: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(with = "polygon_points")]
    pub bbox: Polygon<f32>,
}

impl From<&Detection> for GdtData {
    fn from(detection: &Detection) -> Self {
        Self {
            class_name: detection.text.clone(),
            confidence: detection.confidence,
            bbox: detection.bounds.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionCandidate {
    pub text: String,
    pub nominal_value: Option<String>,
    pub upper_tolerance: Option<String>,
    pub lower_tolerance: Option<String>,
    pub dimension_type: DimensionType,
    #[serde(with = "polygon_points")]
    pub bbox: Polygon<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gdt_data: Option<GdtData>,
}

impl DimensionCandidate {
    pub fn new(
        nominal_value: impl Into<String>,
        dimension_type: DimensionType,
        bbox: Polygon<f32>,
    ) -> Self {
        let nominal_value = nominal_value.into();
        Self {
            text: nominal_value.clone(),
            nominal_value: Some(nominal_value),
            upper_tolerance: None,
            lower_tolerance: None,
            dimension_type,
            bbox,
            gdt_data: None,
        }
    }

    pub fn bbox_rect(&self) -> Option<Rect<f32>> {
        util::bounds(&self.bbox)
    }

    pub fn display_value(&self) -> &str {
        self.nominal_value.as_deref().unwrap_or(&self.text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionRecord {
    pub bbox: Region,
    pub label: String,
    pub dimension_data: DimensionCandidate,
    pub text_data: Vec<Detection>,
    pub gdt_data: Vec<Detection>,
}

impl DimensionRecord {
    pub fn origins(&self) -> Vec<Origin> {
        self.text_data
            .iter()
            .chain(self.gdt_data.iter())
            .flat_map(Detection::origins)
            .collect()
    }
}

pub(crate) mod polygon_points {
    use geo::{Coord, Polygon};
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::util;

    pub fn serialize<S: Serializer>(
        polygon: &Polygon<f32>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(
            util::ring_points(polygon)
                .into_iter()
                .map(|point| [point.x, point.y]),
        )
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Polygon<f32>, D::Error> {
        let points = Vec::<[f32; 2]>::deserialize(deserializer)?;
        Ok(util::polygon_from_points(
            points.into_iter().map(|[x, y]| Coord { x, y }),
        ))
    }
}
