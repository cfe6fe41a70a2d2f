//! Linear referencing of a snapped point along its flowline.
//!
//! The measure is never invented here. The flowline dataset declares its own
//! measure range through two attributes (NHDPlus: `frommeas` at the downstream
//! end, `tomeas` at the upstream end) and the geometry engine supplies the
//! fraction along the digitized line. This module only combines the two and
//! rejects results outside the declared range.

use crate::error::DegenerateGeometry;
use crate::feature_service::CandidateLine;
use crate::record::numeric_attribute;
use geo_types::{MultiLineString, Point};

/// Relative tolerance for the measure range check.
const RANGE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Position along the digitized geometry, 0 at the first vertex, 1 at the last.
    pub fraction: f64,
    /// Snapped point in WGS 84 (lon, lat).
    pub snapped: Point<f64>,
    pub distance_m: f64,
}

/// Orthogonal projection of a point onto a line.
pub trait ProjectAndMeasure {
    fn project(&self, point: Point<f64>, line: &MultiLineString<f64>) -> Option<Projection>;
}

/// Which attributes hold a flowline's measure range and how it runs relative
/// to the digitized direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasureConvention {
    pub from_field: String,
    pub to_field: String,
    /// `false` for NHDPlus: lines are digitized downstream while measures grow
    /// upstream.
    pub increases_along_geometry: bool,
}

impl Default for MeasureConvention {
    fn default() -> Self {
        Self {
            from_field: "frommeas".to_string(),
            to_field: "tomeas".to_string(),
            increases_along_geometry: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasureRange {
    pub from: f64,
    pub to: f64,
}

impl MeasureRange {
    pub fn low(&self) -> f64 {
        self.from.min(self.to)
    }

    pub fn high(&self) -> f64 {
        self.from.max(self.to)
    }

    pub fn contains(&self, measure: f64) -> bool {
        let slack = RANGE_EPSILON * (self.high() - self.low()).abs().max(1.0);
        measure.is_finite() && measure >= self.low() - slack && measure <= self.high() + slack
    }
}

impl MeasureConvention {
    pub fn range_of(&self, line: &CandidateLine) -> Result<MeasureRange, DegenerateGeometry> {
        let read = |field: &str| {
            numeric_attribute(line, field)
                .ok()
                .flatten()
                .filter(|v| v.is_finite())
                .ok_or_else(|| DegenerateGeometry::MissingMeasure {
                    field: field.to_string(),
                })
        };
        Ok(MeasureRange {
            from: read(&self.from_field)?,
            to: read(&self.to_field)?,
        })
    }

    pub fn measure_at(&self, range: MeasureRange, fraction: f64) -> f64 {
        if self.increases_along_geometry {
            range.from + fraction * (range.to - range.from)
        } else {
            range.to - fraction * (range.to - range.from)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearReference {
    pub measure: f64,
    pub snap_latitude: f64,
    pub snap_longitude: f64,
}

/// Snap `point` onto `line` and express the snap as a measure.
pub fn compute<E>(
    engine: &E,
    point: Point<f64>,
    line: &CandidateLine,
    convention: &MeasureConvention,
) -> Result<LinearReference, DegenerateGeometry>
where
    E: ProjectAndMeasure + ?Sized,
{
    let range = convention.range_of(line)?;
    let projection = engine
        .project(point, &line.geometry)
        .ok_or(DegenerateGeometry::NoProjection)?;

    let measure = convention.measure_at(range, projection.fraction);
    if !range.contains(measure) {
        return Err(DegenerateGeometry::OutOfRange {
            measure,
            low: range.low(),
            high: range.high(),
        });
    }

    Ok(LinearReference {
        measure,
        snap_latitude: projection.snapped.y(),
        snap_longitude: projection.snapped.x(),
    })
}
