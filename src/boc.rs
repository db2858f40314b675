use serde::Serialize;

use crate::{BalloonId, StoredBalloon};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BocRow {
    /// 1-based balloon number as printed on the drawing.
    pub balloon: usize,
    pub id: BalloonId,
    pub characteristic: String,
    pub nominal: Option<String>,
    pub upper_tolerance: Option<String>,
    pub lower_tolerance: Option<String>,
    pub label: String,
}

pub fn bill_of_characteristics(balloons: &[StoredBalloon]) -> Vec<BocRow> {
    let mut ordered = balloons.iter().collect::<Vec<_>>();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));

    ordered
        .into_iter()
        .enumerate()
        .map(|(position, balloon)| {
            let dimension = balloon.dimension_data.first();
            BocRow {
                balloon: position + 1,
                id: balloon.id.clone(),
                characteristic: dimension
                    .map(|it| it.dimension_type.to_string())
                    .unwrap_or_default(),
                nominal: dimension.and_then(|it| it.nominal_value.clone()),
                upper_tolerance: dimension.and_then(|it| it.upper_tolerance.clone()),
                lower_tolerance: dimension.and_then(|it| it.lower_tolerance.clone()),
                label: balloon.label.clone(),
            }
        })
        .collect()
}
