use crate::feature_service::CandidateLine;
use geo_types::{MultiLineString, Point};

/// Distance in meters from a point to the nearest point of a line.
pub trait PointLineDistance {
    fn distance(&self, point: Point<f64>, line: &MultiLineString<f64>) -> Option<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectedMatch<'a> {
    pub line: &'a CandidateLine,
    /// Position of the line in the service response.
    pub index: usize,
    pub snap_distance: f64,
}

/// Nearest candidate to `point`. Ties go to the earliest candidate in response
/// order; candidates without a finite distance are ignored.
pub fn select_nearest<'a, D>(
    metric: &D,
    point: Point<f64>,
    candidates: &'a [CandidateLine],
) -> Option<SelectedMatch<'a>>
where
    D: PointLineDistance + ?Sized,
{
    candidates
        .iter()
        .enumerate()
        .filter_map(|(index, line)| {
            let d = metric.distance(point, &line.geometry)?;
            (d.is_finite() && d >= 0.0).then_some(SelectedMatch {
                line,
                index,
                snap_distance: d,
            })
        })
        // min_by keeps the first of equal elements
        .min_by(|a, b| a.snap_distance.total_cmp(&b.snap_distance))
}
