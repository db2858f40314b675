use geo::{BoundingRect, Coord, LineString, Polygon, Rect};
use tracing::instrument;

use crate::Region;

pub(crate) fn polygon_from_points(points: impl IntoIterator<Item = Coord<f32>>) -> Polygon<f32> {
    Polygon::new(LineString::new(points.into_iter().collect()), vec![])
}

pub(crate) fn ring_points(polygon: &Polygon<f32>) -> Vec<Coord<f32>> {
    let mut points = polygon.exterior().0.clone();
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    points
}

pub fn bounds(polygon: &Polygon<f32>) -> Option<Rect<f32>> {
    polygon.bounding_rect()
}

pub fn region_from_polygon(polygon: &Polygon<f32>, page: u32) -> Option<Region> {
    bounds(polygon).map(|rect| Region::from_rect(rect, page))
}

#[instrument(level = "trace", skip(polygons))]
pub fn merge_regions<'a>(
    polygons: impl IntoIterator<Item = &'a Polygon<f32>>,
    page: u32,
) -> Option<Region> {
    polygons
        .into_iter()
        .filter_map(|polygon| region_from_polygon(polygon, page))
        .reduce(|merged, region| merged.union(&region))
}

pub(crate) fn center_distance(a: &Rect<f32>, b: &Rect<f32>) -> f32 {
    let (a, b) = (a.center(), b.center());
    (a.x - b.x).hypot(a.y - b.y)
}

pub(crate) fn y_extents_overlap(a: &Rect<f32>, b: &Rect<f32>) -> bool {
    a.min().y <= b.max().y && b.min().y <= a.max().y
}

pub(crate) fn rects_touch(a: &Rect<f32>, b: &Rect<f32>) -> bool {
    a.min().x <= b.max().x
        && b.min().x <= a.max().x
        && a.min().y <= b.max().y
        && b.min().y <= a.max().y
}
