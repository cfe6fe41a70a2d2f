use crate::crs::Crs;
use crate::linear_reference::{ProjectAndMeasure, Projection};
use crate::selector::PointLineDistance;
use geo::{Coord, LineInterpolatePoint, LineLocatePoint, LineString, MultiLineString, Point};

/// Flat plane tangent to the earth at a query point. Flowline candidates sit
/// within a few hundred meters of the origin, where scaling longitude by
/// cos(lat0) keeps distances within centimeters.
#[derive(Debug, Clone, Copy)]
pub struct LocalTangentPlane {
    origin: (f64, f64),
    meters_per_degree_lon: f64,
    meters_per_degree_lat: f64,
}

impl LocalTangentPlane {
    const EARTH_RADIUS: f64 = 6_371_007.2;

    pub fn new(lon0: f64, lat0: f64) -> Self {
        let meters_per_degree_lat = Self::EARTH_RADIUS.to_radians();
        Self {
            origin: (lon0, lat0),
            meters_per_degree_lon: meters_per_degree_lat * lat0.to_radians().cos(),
            meters_per_degree_lat,
        }
    }

    /// (lon, lat) degrees to meters east and north of the origin.
    pub fn project(&self, lon: f64, lat: f64) -> (f64, f64) {
        (
            (lon - self.origin.0) * self.meters_per_degree_lon,
            (lat - self.origin.1) * self.meters_per_degree_lat,
        )
    }

    pub fn unproject(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.origin.0 + x / self.meters_per_degree_lon,
            self.origin.1 + y / self.meters_per_degree_lat,
        )
    }
}

fn planar_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - b.0).hypot(a.1 - b.1)
}

pub fn polyline_length_metric(coords: &[(f64, f64)]) -> f64 {
    coords.windows(2).map(|w| planar_distance(w[0], w[1])).sum()
}

/// Closest position on one part, as (distance along, distance off, position).
/// A single vertex projects onto itself; an empty part has no projection.
pub fn project_point_to_polyline_metric(
    point: (f64, f64),
    coords: &[(f64, f64)],
) -> Option<(f64, f64, (f64, f64))> {
    match coords {
        [] => None,
        [only] => Some((0.0, planar_distance(point, *only), *only)),
        _ => {
            let part: LineString = coords.iter().map(|&(x, y)| Coord { x, y }).collect();
            let fraction = part.line_locate_point(&Point::from(point))?;
            let on_line = part.line_interpolate_point(fraction)?;
            let projected = (on_line.x(), on_line.y());
            Some((
                fraction * polyline_length_metric(coords),
                planar_distance(point, projected),
                projected,
            ))
        }
    }
}

/// Projection of a point onto a multi-part polyline in metric space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultiPartProjection {
    /// Distance along the concatenated parts, in digitized order.
    pub distance_along: f64,
    pub total_length: f64,
    pub distance_to_line: f64,
    pub projected: (f64, f64),
}

/// Project point onto the closest part of a multi-part polyline. Distance along
/// is accumulated over the preceding parts' lengths. On equal distances the
/// earlier part wins.
pub fn project_point_to_multi_polyline_metric(
    point: (f64, f64),
    parts: &[Vec<(f64, f64)>],
) -> Option<MultiPartProjection> {
    let mut best: Option<MultiPartProjection> = None;
    let mut offset = 0.0;

    for part in parts {
        if let Some((along, dist, projected)) = project_point_to_polyline_metric(point, part) {
            if best.is_none_or(|b| dist < b.distance_to_line) {
                best = Some(MultiPartProjection {
                    distance_along: offset + along,
                    total_length: 0.0,
                    distance_to_line: dist,
                    projected,
                });
            }
        }
        offset += polyline_length_metric(part);
    }

    best.map(|b| MultiPartProjection {
        total_length: offset,
        ..b
    })
}

/// Point-to-line engine working in a local tangent plane centered on the
/// query point. Coordinates in `crs` are brought to WGS 84 first, so snapped
/// points come back as (lon, lat).
#[derive(Debug, Clone, Copy)]
pub struct PlanarMetric {
    crs: Crs,
}

impl PlanarMetric {
    pub fn new(crs: Crs) -> Self {
        Self { crs }
    }

    fn project_parts(
        &self,
        plane: &LocalTangentPlane,
        line: &MultiLineString<f64>,
    ) -> Vec<Vec<(f64, f64)>> {
        line.0
            .iter()
            .map(|ls| {
                ls.coords()
                    .map(|c| {
                        let (lon, lat) = self.crs.to_wgs84(c.x, c.y);
                        plane.project(lon, lat)
                    })
                    .collect()
            })
            .collect()
    }
}

impl ProjectAndMeasure for PlanarMetric {
    fn project(&self, point: Point<f64>, line: &MultiLineString<f64>) -> Option<Projection> {
        let (lon0, lat0) = self.crs.to_wgs84(point.x(), point.y());
        let plane = LocalTangentPlane::new(lon0, lat0);
        let parts = self.project_parts(&plane, line);

        let hit = project_point_to_multi_polyline_metric((0.0, 0.0), &parts)?;
        if hit.total_length <= 0.0 || !hit.total_length.is_finite() {
            return None;
        }

        let (lon, lat) = plane.unproject(hit.projected.0, hit.projected.1);
        Some(Projection {
            fraction: hit.distance_along / hit.total_length,
            snapped: Point::new(lon, lat),
            distance_m: hit.distance_to_line,
        })
    }
}

impl PointLineDistance for PlanarMetric {
    fn distance(&self, point: Point<f64>, line: &MultiLineString<f64>) -> Option<f64> {
        let (lon0, lat0) = self.crs.to_wgs84(point.x(), point.y());
        let plane = LocalTangentPlane::new(lon0, lat0);
        let parts = self.project_parts(&plane, line);
        project_point_to_multi_polyline_metric((0.0, 0.0), &parts).map(|hit| hit.distance_to_line)
    }
}
