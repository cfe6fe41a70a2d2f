//! Proximity queries against the remote flowline feature service.

use crate::config::SnapConfig;
use crate::crs::{Crs, InputPoint};
use crate::error::{NoMatchReason, QueryError};
use ahash::AHashMap;
use geo_types::{Coord, LineString, MultiLineString};
use geojson::GeoJson;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Attribute map of one feature, keys lowercased.
pub type Properties = AHashMap<String, JsonValue>;

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateLine {
    pub geometry: MultiLineString<f64>,
    properties: Properties,
}

impl CandidateLine {
    pub fn new<I>(geometry: MultiLineString<f64>, properties: I) -> Self
    where
        I: IntoIterator<Item = (String, JsonValue)>,
    {
        let properties = properties
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self {
            geometry,
            properties,
        }
    }

    /// Case-insensitive attribute lookup.
    pub fn attribute(&self, name: &str) -> Option<&JsonValue> {
        self.properties.get(&name.to_ascii_lowercase())
    }
}

/// Body ArcGIS sends, often with HTTP 200, when a query cannot be answered.
#[derive(Debug, Deserialize)]
struct ArcGisErrorBody {
    error: ArcGisError,
}

#[derive(Debug, Deserialize)]
struct ArcGisError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Lines from one response, in the order the service returned them.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateCollection {
    pub crs: Crs,
    pub lines: Vec<CandidateLine>,
}

/// Source of candidate flowlines around a point.
pub trait FlowlineSource: Send + Sync {
    fn query(
        &self,
        point: &InputPoint,
        search_distance_m: f64,
    ) -> impl Future<Output = Result<CandidateCollection, QueryError>> + Send;
}

/// ArcGIS REST `query` endpoint returning GeoJSON.
#[derive(Debug, Clone)]
pub struct ArcGisFlowlineService {
    client: reqwest::Client,
    query_url: String,
}

impl ArcGisFlowlineService {
    pub fn new(query_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()?;
        Ok(Self {
            client,
            query_url: query_url.into(),
        })
    }

    pub fn from_config(config: &SnapConfig) -> Result<Self, reqwest::Error> {
        Self::new(config.service_url.clone(), config.request_timeout)
    }
}

/// Query string for one point: every candidate in the radius, full geometry.
pub fn query_params(point: &InputPoint, search_distance_m: f64) -> Vec<(&'static str, String)> {
    vec![
        ("geometry", format!("{},{}", point.x, point.y)),
        ("geometryType", "esriGeometryPoint".to_string()),
        ("inSR", point.crs.epsg().to_string()),
        ("spatialRel", "esriSpatialRelIntersects".to_string()),
        ("distance", search_distance_m.to_string()),
        ("units", "esriSRUnit_Meter".to_string()),
        ("outFields", "*".to_string()),
        ("returnGeometry", "true".to_string()),
        ("maxAllowableOffset", "0".to_string()),
        ("f", "geojson".to_string()),
    ]
}

impl FlowlineSource for ArcGisFlowlineService {
    async fn query(
        &self,
        point: &InputPoint,
        search_distance_m: f64,
    ) -> Result<CandidateCollection, QueryError> {
        let response = self
            .client
            .get(&self.query_url)
            .query(&query_params(point, search_distance_m))
            .send()
            .await
            .map_err(|e| QueryError::QueryFailed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| QueryError::QueryFailed(e.to_string()))?;

        debug!(
            status = status.as_u16(),
            bytes = body.len(),
            "flowline query answered"
        );

        parse_response(status.as_u16(), &body)
    }
}

/// Classify and parse a raw service answer.
///
/// Non-2xx statuses, ArcGIS `{"error": ..}` bodies and empty collections are
/// `NoMatch`; anything unreadable is `QueryFailed`.
pub fn parse_response(status: u16, body: &str) -> Result<CandidateCollection, QueryError> {
    if !(200..300).contains(&status) {
        return Err(QueryError::NoMatch(NoMatchReason::HttpStatus(status)));
    }

    let json: JsonValue =
        serde_json::from_str(body).map_err(|e| QueryError::QueryFailed(e.to_string()))?;

    if let Ok(ArcGisErrorBody { error }) = ArcGisErrorBody::deserialize(&json) {
        return Err(QueryError::NoMatch(NoMatchReason::ServiceError {
            code: error.code,
            message: error.message,
        }));
    }

    let collection = match GeoJson::from_json_value(json) {
        Ok(GeoJson::FeatureCollection(fc)) => fc,
        Ok(_) => {
            return Err(QueryError::QueryFailed(
                "expected a GeoJSON FeatureCollection".to_string(),
            ));
        }
        Err(e) => return Err(QueryError::QueryFailed(e.to_string())),
    };

    if collection.features.is_empty() {
        return Err(QueryError::NoMatch(NoMatchReason::EmptyCollection));
    }

    let mut lines = Vec::with_capacity(collection.features.len());
    for feature in collection.features {
        let Some(geometry) = feature.geometry.as_ref().and_then(|g| line_geometry(&g.value))
        else {
            debug!(id = ?feature.id, "skipping feature without line geometry");
            continue;
        };
        let properties = feature.properties.unwrap_or_default();
        lines.push(CandidateLine::new(geometry, properties));
    }

    if lines.is_empty() {
        return Err(QueryError::NoMatch(NoMatchReason::NoMeasurableCandidate));
    }

    Ok(CandidateCollection {
        crs: Crs::CANONICAL,
        lines,
    })
}

fn line_geometry(value: &geojson::Value) -> Option<MultiLineString<f64>> {
    match value {
        geojson::Value::LineString(positions) => {
            Some(MultiLineString::new(vec![line_string(positions)?]))
        }
        geojson::Value::MultiLineString(parts) => {
            let parts = parts
                .iter()
                .map(|p| line_string(p))
                .collect::<Option<Vec<_>>>()?;
            Some(MultiLineString::new(parts))
        }
        _ => None,
    }
}

fn line_string(positions: &[geojson::Position]) -> Option<LineString<f64>> {
    positions
        .iter()
        .map(|p| match p.as_slice() {
            [x, y, ..] => Some(Coord { x: *x, y: *y }),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()
        .map(LineString::new)
}
