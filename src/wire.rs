use std::{cmp::Ordering, fmt};

use geo::{Coord, Polygon};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{
    util::polygon_from_points, Detection, DetectionKind, DimensionCandidate, DimensionRecord,
    DimensionType, GdtData, Region,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecognitionRequest {
    pub bounding_box: Region,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation_angle: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
enum WirePoint {
    Pair([f32; 2]),
    Object { x: Option<f32>, y: Option<f32> },
}

impl WirePoint {
    fn coord(&self) -> Option<Coord<f32>> {
        let (x, y) = match *self {
            Self::Pair([x, y]) => (x, y),
            Self::Object { x, y } => (x?, y?),
        };
        (x.is_finite() && y.is_finite()).then_some(Coord { x, y })
    }
}

fn to_polygon(points: &[WirePoint]) -> Polygon<f32> {
    polygon_from_points(points.iter().filter_map(WirePoint::coord))
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum Lenient {
    Text(String),
    Number(f64),
}

impl From<Lenient> for String {
    fn from(value: Lenient) -> Self {
        match value {
            Lenient::Text(text) => text,
            Lenient::Number(number) => number.to_string(),
        }
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<Lenient>::deserialize(deserializer)?.map(String::from))
}

#[derive(Debug, Clone, Default, Deserialize)]
struct WireDetection {
    #[serde(default, deserialize_with = "lenient_string")]
    text: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    class_name: Option<String>,
    #[serde(default, rename = "box")]
    box_points: Option<Vec<WirePoint>>,
    #[serde(default)]
    bbox: Option<Vec<WirePoint>>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    angle: Option<f32>,
}

impl WireDetection {
    fn into_detection(self, kind: DetectionKind, index: usize) -> Detection {
        let candidates = match kind {
            DetectionKind::Gdt => [self.class_name, self.text, self.content],
            _ => [self.text, self.content, self.class_name],
        };
        let text = candidates
            .into_iter()
            .flatten()
            .find(|it| !it.trim().is_empty())
            .unwrap_or_default();
        let points = self.box_points.or(self.bbox).unwrap_or_default();
        Detection::new(text, to_polygon(&points), kind)
            .with_confidence(self.confidence.unwrap_or(0.0))
            .with_angle(self.angle.unwrap_or(0.0))
            .with_origin(kind, index)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct WireGdtData {
    #[serde(default)]
    class_name: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    bbox: Vec<WirePoint>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireDimension {
    #[serde(default, deserialize_with = "lenient_string")]
    text: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    nominal_value: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    upper_tolerance: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    lower_tolerance: Option<String>,
    #[serde(default)]
    dimension_type: Option<String>,
    #[serde(default)]
    bbox: Vec<WirePoint>,
    #[serde(default)]
    gdt_data: Option<WireGdtData>,
}

impl From<WireDimension> for DimensionCandidate {
    fn from(wire: WireDimension) -> Self {
        let text = wire
            .text
            .or_else(|| wire.nominal_value.clone())
            .unwrap_or_default();
        Self {
            text,
            nominal_value: wire.nominal_value,
            upper_tolerance: wire.upper_tolerance,
            lower_tolerance: wire.lower_tolerance,
            dimension_type: wire
                .dimension_type
                .map_or(DimensionType::Length, DimensionType::from),
            bbox: to_polygon(&wire.bbox),
            gdt_data: wire.gdt_data.map(|data| GdtData {
                class_name: data.class_name,
                confidence: data.confidence,
                bbox: to_polygon(&data.bbox),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecognitionResponse {
    #[serde(default, alias = "dimension_parsing")]
    dimensions: Vec<WireDimension>,
    #[serde(default)]
    text_detections: Vec<WireDetection>,
    #[serde(default)]
    gdt_detections: Vec<WireDetection>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecognitionBatch {
    pub dimensions: Vec<DimensionCandidate>,
    pub text_detections: Vec<Detection>,
    pub gdt_detections: Vec<Detection>,
}

impl RecognitionResponse {
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
            && self.text_detections.is_empty()
            && self.gdt_detections.is_empty()
    }

    pub fn into_batch(self) -> RecognitionBatch {
        let detections = |list: Vec<WireDetection>, kind| {
            list.into_iter()
                .enumerate()
                .map(|(index, it)| it.into_detection(kind, index))
                .collect::<Vec<_>>()
        };
        RecognitionBatch {
            dimensions: self.dimensions.into_iter().map(Into::into).collect(),
            text_detections: detections(self.text_detections, DetectionKind::Text),
            gdt_detections: detections(self.gdt_detections, DetectionKind::Gdt),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BalloonId {
    Number(i64),
    Text(String),
}

impl fmt::Display for BalloonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}

impl PartialOrd for BalloonId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BalloonId {
    fn cmp(&self, other: &Self) -> Ordering {
        let numeric = |id: &Self| match id {
            Self::Number(id) => Some(*id),
            Self::Text(id) => id.trim().parse().ok(),
        };
        match (numeric(self), numeric(other)) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.to_string().cmp(&other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalloonCreate {
    pub bounding_box: Region,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalloonUpdate {
    pub dimension_data: Vec<DimensionCandidate>,
    pub text_data: Vec<Detection>,
    pub gdt_data: Vec<Detection>,
}

impl DimensionRecord {
    pub fn create_request(&self) -> BalloonCreate {
        BalloonCreate {
            bounding_box: self.bbox,
            label: self.label.clone(),
        }
    }

    pub fn update_request(&self) -> BalloonUpdate {
        BalloonUpdate {
            dimension_data: vec![self.dimension_data.clone()],
            text_data: self.text_data.clone(),
            gdt_data: self.gdt_data.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct WireStoredBalloon {
    id: BalloonId,
    #[serde(default)]
    bounding_box: Option<Region>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    dimension_data: Value,
    #[serde(default)]
    text_data: Value,
    #[serde(default)]
    gdt_data: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "WireStoredBalloon")]
pub struct StoredBalloon {
    pub id: BalloonId,
    pub bounding_box: Option<Region>,
    pub label: String,
    pub dimension_data: Vec<DimensionCandidate>,
    pub text_data: Vec<Detection>,
    pub gdt_data: Vec<Detection>,
}

impl From<WireStoredBalloon> for StoredBalloon {
    fn from(wire: WireStoredBalloon) -> Self {
        let id = wire.id;
        Self {
            dimension_data: parse_stored_list(wire.dimension_data, &id, "dimension_data"),
            text_data: parse_stored_list(wire.text_data, &id, "text_data"),
            gdt_data: parse_stored_list(wire.gdt_data, &id, "gdt_data"),
            bounding_box: wire.bounding_box,
            label: wire.label.unwrap_or_default(),
            id,
        }
    }
}

/// Stored lists may be real arrays or JSON text holding one; anything
/// unreadable becomes an empty list.
fn parse_stored_list<T: DeserializeOwned>(value: Value, id: &BalloonId, field: &str) -> Vec<T> {
    let parsed = match value {
        Value::Null => return Vec::new(),
        Value::String(text) if text.trim().is_empty() => return Vec::new(),
        Value::String(text) => serde_json::from_str(&text),
        other => serde_json::from_value(other),
    };
    parsed.unwrap_or_else(|err| {
        log::warn!("Balloon {id} has unreadable {field}, treating it as empty: {err}");
        Vec::new()
    })
}

impl StoredBalloon {
    pub fn list_from_json(json: &str) -> crate::Result<Vec<Self>> {
        Ok(serde_json::from_str(json)?)
    }
}
