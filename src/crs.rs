//! Coordinate reference system handling for input points.
//!
//! The feature service always answers in WGS 84 (GeoJSON), so every
//! reprojection here goes through geographic coordinates.

use crate::WGS_84_SRID;
use crate::error::CrsError;
use geo_types::Point;
use std::fmt;
use std::str::FromStr;

pub const EARTH_RADIUS: f64 = 6378137.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Crs {
    /// EPSG:4326
    Wgs84,
    /// EPSG:4269, coincident with WGS 84 at flowline resolution
    Nad83,
    /// EPSG:3857 and its legacy aliases
    WebMercator,
}

impl Crs {
    /// CRS the feature service reports geometries in.
    pub const CANONICAL: Crs = Crs::Wgs84;

    pub fn from_epsg(code: u32) -> Result<Self, CrsError> {
        match code {
            WGS_84_SRID => Ok(Crs::Wgs84),
            4269 => Ok(Crs::Nad83),
            3857 | 900913 | 102100 | 102113 => Ok(Crs::WebMercator),
            other => Err(CrsError::InvalidCrs(other.to_string())),
        }
    }

    pub fn epsg(&self) -> u32 {
        match self {
            Crs::Wgs84 => WGS_84_SRID,
            Crs::Nad83 => 4269,
            Crs::WebMercator => 3857,
        }
    }

    /// Accepts `4326`, `EPSG:4326`, `urn:ogc:def:crs:EPSG::4326`, `CRS84` in
    /// any of its prefixed forms and integer-valued floats such as `4326.0`.
    pub fn parse(raw: &str) -> Result<Self, CrsError> {
        let trimmed = raw.trim();
        let invalid = || CrsError::InvalidCrs(raw.to_string());

        let code = trimmed.rsplit(':').next().ok_or_else(invalid)?;
        if code.eq_ignore_ascii_case("crs84") {
            return Ok(Crs::Wgs84);
        }

        if trimmed.contains(':') {
            let authority_ok = trimmed
                .split(':')
                .any(|part| part.eq_ignore_ascii_case("epsg"));
            if !authority_ok {
                return Err(invalid());
            }
        }

        if let Ok(code) = code.parse::<u32>() {
            return Self::from_epsg(code).map_err(|_| invalid());
        }

        match code.parse::<f64>() {
            Ok(value) if value.fract() == 0.0 && value > 0.0 && value <= u32::MAX as f64 => {
                Self::from_epsg(value as u32).map_err(|_| invalid())
            }
            _ => Err(invalid()),
        }
    }

    /// (x, y) in this CRS to (lon, lat) in WGS 84.
    pub fn to_wgs84(&self, x: f64, y: f64) -> (f64, f64) {
        match self {
            Crs::Wgs84 | Crs::Nad83 => (x, y),
            Crs::WebMercator => web_merc_to_lat_lng(x, y),
        }
    }

    /// (lon, lat) in WGS 84 to (x, y) in this CRS.
    pub fn from_wgs84(&self, lon: f64, lat: f64) -> (f64, f64) {
        match self {
            Crs::Wgs84 | Crs::Nad83 => (lon, lat),
            Crs::WebMercator => lat_lng_to_web_merc(lon, lat),
        }
    }

    pub fn reproject(&self, target: Crs, point: Point<f64>) -> Point<f64> {
        if *self == target {
            return point;
        }
        let (lon, lat) = self.to_wgs84(point.x(), point.y());
        let (x, y) = target.from_wgs84(lon, lat);
        Point::new(x, y)
    }
}

impl FromStr for Crs {
    type Err = CrsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Crs::parse(s)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

/// Input location as declared by one table row. Never mutated; reprojection
/// always yields a new point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputPoint {
    pub x: f64,
    pub y: f64,
    pub crs: Crs,
}

impl InputPoint {
    pub fn new(x: f64, y: f64, crs: Crs) -> Self {
        Self { x, y, crs }
    }

    pub fn as_point(&self) -> Point<f64> {
        Point::new(self.x, self.y)
    }
}

/// Reproject a copy of the point into the CRS of a candidate collection.
pub fn harmonize(point: &InputPoint, target: Crs) -> Point<f64> {
    point.crs.reproject(target, point.as_point())
}

/// The point in the service's canonical CRS, used for every output geometry.
pub fn canonical_point(point: &InputPoint) -> Point<f64> {
    harmonize(point, Crs::CANONICAL)
}

/// (lon, lat) degrees to Web Mercator meters
pub fn lat_lng_to_web_merc(lon: f64, lat: f64) -> (f64, f64) {
    let x = EARTH_RADIUS * lon.to_radians();
    let y = EARTH_RADIUS * ((std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan()).ln();
    (x, y)
}

/// Web Mercator meters to (lon, lat) degrees
pub fn web_merc_to_lat_lng(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    (lon, lat)
}
