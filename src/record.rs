//! The single output record shape shared by matched and unmatched rows.

use crate::error::AttributeCoercionError;
use crate::feature_service::CandidateLine;
use crate::linear_reference::LinearReference;
use crate::selector::SelectedMatch;
use crate::table::{Cell, ColumnType};
use geo_types::Point;
use serde_json::Value as JsonValue;

pub const OUTPUT_WIDTH: usize = 17;

/// Columns appended to every input row, in order.
pub const OUTPUT_SCHEMA: [(&str, ColumnType); OUTPUT_WIDTH] = [
    ("geometry", ColumnType::Text),
    ("measure", ColumnType::Float),
    ("snap_latitude", ColumnType::Float),
    ("snap_longitude", ColumnType::Float),
    ("snap_distance", ColumnType::Float),
    ("nhdplusid", ColumnType::Integer),
    ("permanent_identifier", ColumnType::Text),
    ("reachcode", ColumnType::Text),
    ("gnis_id", ColumnType::Text),
    ("gnis_name", ColumnType::Text),
    ("vpuid", ColumnType::Text),
    ("ftype", ColumnType::Integer),
    ("fcode", ColumnType::Integer),
    ("streamorde", ColumnType::Integer),
    ("lengthkm", ColumnType::Float),
    ("frommeas", ColumnType::Float),
    ("tomeas", ColumnType::Float),
];

/// Flowline attributes carried into the output (NHDPlus HR flowline layer).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlowlineAttributes {
    pub nhdplusid: Option<i64>,
    pub permanent_identifier: Option<String>,
    pub reachcode: Option<String>,
    pub gnis_id: Option<String>,
    pub gnis_name: Option<String>,
    pub vpuid: Option<String>,
    pub ftype: Option<i64>,
    pub fcode: Option<i64>,
    pub streamorde: Option<i64>,
    pub lengthkm: Option<f64>,
    pub frommeas: Option<f64>,
    pub tomeas: Option<f64>,
}

impl FlowlineAttributes {
    pub fn from_line(line: &CandidateLine) -> Result<Self, AttributeCoercionError> {
        Ok(Self {
            nhdplusid: integer_attribute(line, "nhdplusid")?,
            permanent_identifier: text_attribute(line, "permanent_identifier"),
            reachcode: text_attribute(line, "reachcode"),
            gnis_id: text_attribute(line, "gnis_id"),
            gnis_name: text_attribute(line, "gnis_name"),
            vpuid: text_attribute(line, "vpuid"),
            ftype: integer_attribute(line, "ftype")?,
            fcode: integer_attribute(line, "fcode")?,
            streamorde: integer_attribute(line, "streamorde")?,
            lengthkm: numeric_attribute(line, "lengthkm")?,
            frommeas: numeric_attribute(line, "frommeas")?,
            tomeas: numeric_attribute(line, "tomeas")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    /// Input point in the service's canonical CRS, absent when the row's
    /// coordinates could not be read.
    pub geometry: Option<Point<f64>>,
    pub measure: Option<f64>,
    pub snap_latitude: Option<f64>,
    pub snap_longitude: Option<f64>,
    pub snap_distance: Option<f64>,
    pub attributes: FlowlineAttributes,
}

impl OutputRecord {
    pub fn matched(
        geometry: Point<f64>,
        selected: &SelectedMatch<'_>,
        linear_reference: &LinearReference,
    ) -> Result<Self, AttributeCoercionError> {
        Ok(Self {
            geometry: Some(geometry),
            measure: Some(linear_reference.measure),
            snap_latitude: Some(linear_reference.snap_latitude),
            snap_longitude: Some(linear_reference.snap_longitude),
            snap_distance: Some(selected.snap_distance.max(0.0)),
            attributes: FlowlineAttributes::from_line(selected.line)?,
        })
    }

    pub fn fallback(geometry: Point<f64>) -> Self {
        Self {
            geometry: Some(geometry),
            ..Self::unlocated()
        }
    }

    /// Fallback for a row without a usable location: every cell missing.
    pub fn unlocated() -> Self {
        Self {
            geometry: None,
            measure: None,
            snap_latitude: None,
            snap_longitude: None,
            snap_distance: None,
            attributes: FlowlineAttributes::default(),
        }
    }

    pub fn is_match(&self) -> bool {
        self.snap_distance.is_some()
    }

    /// Cells in [`OUTPUT_SCHEMA`] order.
    pub fn cells(&self) -> [Cell; OUTPUT_WIDTH] {
        let OutputRecord {
            geometry,
            measure,
            snap_latitude,
            snap_longitude,
            snap_distance,
            attributes,
        } = self;
        let FlowlineAttributes {
            nhdplusid,
            permanent_identifier,
            reachcode,
            gnis_id,
            gnis_name,
            vpuid,
            ftype,
            fcode,
            streamorde,
            lengthkm,
            frommeas,
            tomeas,
        } = attributes;

        [
            Cell::from(geometry.as_ref().map(point_wkt)),
            Cell::from(*measure),
            Cell::from(*snap_latitude),
            Cell::from(*snap_longitude),
            Cell::from(*snap_distance),
            Cell::from(*nhdplusid),
            Cell::from(permanent_identifier.clone()),
            Cell::from(reachcode.clone()),
            Cell::from(gnis_id.clone()),
            Cell::from(gnis_name.clone()),
            Cell::from(vpuid.clone()),
            Cell::from(*ftype),
            Cell::from(*fcode),
            Cell::from(*streamorde),
            Cell::from(*lengthkm),
            Cell::from(*frommeas),
            Cell::from(*tomeas),
        ]
    }
}

pub fn point_wkt(point: &Point<f64>) -> String {
    format!("POINT ({} {})", point.x(), point.y())
}

fn coercion_error(field: &str, value: &JsonValue) -> AttributeCoercionError {
    AttributeCoercionError {
        field: field.to_string(),
        value: value.to_string(),
    }
}

/// Numeric attribute, accepting numbers and numeric text. Null, absent and
/// blank text are missing.
pub fn numeric_attribute(
    line: &CandidateLine,
    field: &str,
) -> Result<Option<f64>, AttributeCoercionError> {
    match line.attribute(field) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::Number(n)) => Ok(n.as_f64()),
        Some(JsonValue::String(s)) if s.trim().is_empty() => Ok(None),
        Some(JsonValue::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| coercion_error(field, &JsonValue::String(s.clone()))),
        Some(other) => Err(coercion_error(field, other)),
    }
}

pub fn integer_attribute(
    line: &CandidateLine,
    field: &str,
) -> Result<Option<i64>, AttributeCoercionError> {
    if let Some(i) = line.attribute(field).and_then(JsonValue::as_i64) {
        return Ok(Some(i));
    }
    match numeric_attribute(line, field)? {
        None => Ok(None),
        Some(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Ok(Some(v as i64)),
        Some(_) => Err(coercion_error(
            field,
            line.attribute(field).unwrap_or(&JsonValue::Null),
        )),
    }
}

pub fn text_attribute(line: &CandidateLine, field: &str) -> Option<String> {
    match line.attribute(field)? {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
