//! Batch enrichment: one independent snap per input row, reassembled in input
//! order onto the original table.

use crate::config::SnapConfig;
use crate::crs::{Crs, InputPoint, canonical_point, harmonize};
use crate::error::{BatchError, CrsError, NoMatchReason, QueryError, RowIssue};
use crate::feature_service::{CandidateCollection, FlowlineSource};
use crate::geometry_utils::PlanarMetric;
use crate::linear_reference::{self, MeasureConvention, ProjectAndMeasure};
use crate::record::{OUTPUT_SCHEMA, OUTPUT_WIDTH, OutputRecord};
use crate::selector::{PointLineDistance, select_nearest};
use crate::table::{Cell, Column, Table};
use futures::StreamExt;
use futures::stream;
use itertools::izip;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOptions {
    pub x_field: String,
    pub y_field: String,
    pub crs_field: String,
    pub search_distance_m: f64,
    pub concurrency: usize,
    pub measure: MeasureConvention,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from_config(&SnapConfig::default(), "x", "y", "crs")
    }
}

impl BatchOptions {
    pub fn from_config(config: &SnapConfig, x_field: &str, y_field: &str, crs_field: &str) -> Self {
        Self {
            x_field: x_field.to_string(),
            y_field: y_field.to_string(),
            crs_field: crs_field.to_string(),
            search_distance_m: config.search_distance_m,
            concurrency: config.concurrency,
            measure: config.measure.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowDiagnostic {
    pub row: usize,
    pub issue: RowIssue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowOutcome {
    pub record: OutputRecord,
    pub issue: Option<RowIssue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedTable {
    pub table: Table,
    /// Advisory, one entry per row that fell back.
    pub diagnostics: Vec<RowDiagnostic>,
}

impl EnrichedTable {
    pub fn matched_rows(&self) -> usize {
        self.table.len() - self.diagnostics.len()
    }
}

/// Enrich every row of `table` with its nearest flowline.
///
/// Fails only on batch preconditions, before any query is sent. Row-level
/// problems become fallback records plus a diagnostic.
pub async fn process<S>(
    source: &S,
    table: &Table,
    options: &BatchOptions,
) -> Result<EnrichedTable, BatchError>
where
    S: FlowlineSource,
{
    let points = input_points(table, options)?;

    let outcomes: Vec<RowOutcome> = stream::iter(points.into_iter().enumerate())
        .map(|(row, point)| enrich_input(source, row, point, options))
        .buffered(options.concurrency.max(1))
        .collect()
        .await;

    let enriched = assemble(table, outcomes);
    info!(
        rows = enriched.table.len(),
        matched = enriched.matched_rows(),
        fallback = enriched.diagnostics.len(),
        "flowline enrichment finished"
    );
    Ok(enriched)
}

async fn enrich_input<S>(
    source: &S,
    row: usize,
    input: Result<InputPoint, RowIssue>,
    options: &BatchOptions,
) -> RowOutcome
where
    S: FlowlineSource,
{
    match input {
        Ok(point) => enrich_row(source, row, point, options).await,
        Err(issue) => {
            warn!(row, %issue, "unreadable location, emitting empty record");
            RowOutcome {
                record: OutputRecord::unlocated(),
                issue: Some(issue),
            }
        }
    }
}

/// Query, select, measure and build the record for one row.
#[tracing::instrument(name = "enrich_row", skip(source, options), fields(x = point.x, y = point.y, crs = %point.crs))]
pub async fn enrich_row<S>(
    source: &S,
    row: usize,
    point: InputPoint,
    options: &BatchOptions,
) -> RowOutcome
where
    S: FlowlineSource,
{
    let result = match source.query(&point, options.search_distance_m).await {
        Ok(collection) => snap_to_collection(&point, &collection, &options.measure),
        Err(e) => Err(RowIssue::Query(e)),
    };

    match result {
        Ok(record) => RowOutcome {
            record,
            issue: None,
        },
        Err(issue) => {
            warn!(row, %issue, "no flowline snap, emitting empty record");
            RowOutcome {
                record: OutputRecord::fallback(canonical_point(&point)),
                issue: Some(issue),
            }
        }
    }
}

/// Snap a point against an already fetched collection using the planar engine.
pub fn snap_to_collection(
    point: &InputPoint,
    collection: &CandidateCollection,
    convention: &MeasureConvention,
) -> Result<OutputRecord, RowIssue> {
    snap_with(&PlanarMetric::new(collection.crs), point, collection, convention)
}

/// Same as [`snap_to_collection`] with an injected geometry engine.
pub fn snap_with<E>(
    engine: &E,
    point: &InputPoint,
    collection: &CandidateCollection,
    convention: &MeasureConvention,
) -> Result<OutputRecord, RowIssue>
where
    E: PointLineDistance + ProjectAndMeasure + ?Sized,
{
    let harmonized = harmonize(point, collection.crs);

    let selected = select_nearest(engine, harmonized, &collection.lines).ok_or(
        RowIssue::Query(QueryError::NoMatch(NoMatchReason::NoMeasurableCandidate)),
    )?;
    let linear_reference =
        linear_reference::compute(engine, harmonized, selected.line, convention)?;

    Ok(OutputRecord::matched(
        canonical_point(point),
        &selected,
        &linear_reference,
    )?)
}

fn required_column<'a>(table: &'a Table, name: &str) -> Result<&'a Column, BatchError> {
    table
        .column(name)
        .ok_or_else(|| BatchError::MissingColumn(name.to_string()))
}

/// Check every batch precondition and derive one point per row. Rows whose
/// coordinates cannot be read carry their issue instead of a point.
fn input_points(
    table: &Table,
    options: &BatchOptions,
) -> Result<Vec<Result<InputPoint, RowIssue>>, BatchError> {
    if !(options.search_distance_m.is_finite() && options.search_distance_m > 0.0) {
        return Err(BatchError::InvalidSearchDistance(options.search_distance_m));
    }

    let xs = required_column(table, &options.x_field)?;
    let ys = required_column(table, &options.y_field)?;
    let crss = required_column(table, &options.crs_field)?;

    let n = xs.values.len();
    if ys.values.len() != n || crss.values.len() != n {
        return Err(BatchError::MismatchedColumnLengths {
            x_len: n,
            y_len: ys.values.len(),
            crs_len: crss.values.len(),
        });
    }

    if let Some(column) = table.columns().iter().find(|c| c.values.len() != n) {
        return Err(BatchError::RaggedColumn {
            column: column.name.clone(),
            expected: n,
            found: column.values.len(),
        });
    }

    if let Some((name, _)) = OUTPUT_SCHEMA
        .iter()
        .find(|(name, _)| table.column(name).is_some())
    {
        return Err(BatchError::ColumnCollision(name.to_string()));
    }

    izip!(&xs.values, &ys.values, &crss.values)
        .enumerate()
        .map(|(row, (x, y, crs))| -> Result<Result<InputPoint, RowIssue>, BatchError> {
            let crs = row_crs(crs).map_err(|source| BatchError::InvalidCrs { row, source })?;
            Ok(coordinate(&xs.name, x)
                .and_then(|x| coordinate(&ys.name, y).map(|y| InputPoint::new(x, y, crs))))
        })
        .collect()
}

fn coordinate(column: &str, cell: &Cell) -> Result<f64, RowIssue> {
    cell.as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| RowIssue::InvalidCoordinate {
            column: column.to_string(),
            value: cell.to_string(),
        })
}

fn row_crs(cell: &Cell) -> Result<Crs, CrsError> {
    match cell {
        Cell::Integer(code) => u32::try_from(*code)
            .map_err(|_| CrsError::InvalidCrs(code.to_string()))
            .and_then(Crs::from_epsg),
        Cell::Null => Err(CrsError::InvalidCrs(String::new())),
        other => Crs::parse(&other.to_string()),
    }
}

/// Original columns followed by the output schema, rows in input order.
fn assemble(table: &Table, outcomes: Vec<RowOutcome>) -> EnrichedTable {
    let n = outcomes.len();
    let mut appended: [Vec<Cell>; OUTPUT_WIDTH] = std::array::from_fn(|_| Vec::with_capacity(n));
    let mut diagnostics = Vec::new();

    for (row, outcome) in outcomes.into_iter().enumerate() {
        for (column, cell) in appended.iter_mut().zip(outcome.record.cells()) {
            column.push(cell);
        }
        if let Some(issue) = outcome.issue {
            diagnostics.push(RowDiagnostic { row, issue });
        }
    }

    let mut columns = table.columns().to_vec();
    columns.extend(
        OUTPUT_SCHEMA
            .iter()
            .zip(appended)
            .map(|((name, _), values)| Column::new(*name, values)),
    );

    EnrichedTable {
        table: Table::new(columns),
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DegenerateGeometry;
    use crate::feature_service::CandidateLine;
    use crate::table::{ColumnType, read_csv};
    use geo::line_string;
    use geo_types::MultiLineString;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory source: answers from a closure and counts calls.
    struct ScriptedSource<F> {
        answer: F,
        calls: AtomicUsize,
    }

    impl<F> ScriptedSource<F>
    where
        F: Fn(&InputPoint) -> Result<CandidateCollection, QueryError> + Send + Sync,
    {
        fn new(answer: F) -> Self {
            Self {
                answer,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl<F> FlowlineSource for ScriptedSource<F>
    where
        F: Fn(&InputPoint) -> Result<CandidateCollection, QueryError> + Send + Sync,
    {
        async fn query(
            &self,
            point: &InputPoint,
            _search_distance_m: f64,
        ) -> Result<CandidateCollection, QueryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            (self.answer)(point)
        }
    }

    /// A flowline running west to east just south of the Scenario A point,
    /// digitized downstream like NHDPlus.
    fn lost_river(id: &str) -> CandidateLine {
        let serde_json::Value::Object(props) = json!({
            "NHDPlusID": 55000900123456_i64,
            "Permanent_Identifier": id,
            "ReachCode": "18010204000123",
            "GNIS_Name": "Lost River",
            "FType": 460,
            "FCode": "46006",
            "StreamOrde": 4,
            "LengthKM": 0.33,
            "FromMeas": 0.0,
            "ToMeas": 100.0
        }) else {
            unreachable!()
        };
        CandidateLine::new(
            MultiLineString::new(vec![line_string![
                (x: -122.3830, y: 42.0935),
                (x: -122.3790, y: 42.0935),
            ]]),
            props,
        )
    }

    fn wgs84(lines: Vec<CandidateLine>) -> CandidateCollection {
        CandidateCollection {
            crs: Crs::Wgs84,
            lines,
        }
    }

    fn points_table(points: &[(f64, f64, &str)]) -> Table {
        Table::from_rows(
            &["site", "x", "y", "crs"],
            points
                .iter()
                .enumerate()
                .map(|(i, (x, y, crs))| {
                    vec![
                        Cell::Text(format!("site-{i}")),
                        Cell::Float(*x),
                        Cell::Float(*y),
                        Cell::from(*crs),
                    ]
                })
                .collect(),
        )
    }

    fn near_lost_river(point: &InputPoint) -> Result<CandidateCollection, QueryError> {
        let lon = canonical_point(point).x();
        if lon > -122.39 && lon < -122.37 {
            Ok(wgs84(vec![lost_river("a")]))
        } else {
            Err(QueryError::NoMatch(NoMatchReason::EmptyCollection))
        }
    }

    #[tokio::test]
    async fn scenario_a_single_point_is_matched() {
        let source = ScriptedSource::new(near_lost_river);
        let table = points_table(&[(-122.3813, 42.09359, "4326")]);

        let enriched = process(&source, &table, &BatchOptions::default())
            .await
            .unwrap();

        assert_eq!(enriched.table.len(), 1);
        assert!(enriched.diagnostics.is_empty());

        let t = &enriched.table;
        let measure = t.cell(0, "measure").and_then(Cell::as_f64).unwrap();
        assert!((0.0..=100.0).contains(&measure));
        // 0.0017 of 0.004 degrees along a line digitized downstream
        assert!((measure - 57.5).abs() < 0.01);

        let distance = t.cell(0, "snap_distance").and_then(Cell::as_f64).unwrap();
        assert!(distance >= 0.0);
        // 0.00009 degrees of latitude
        assert!((distance - 10.0).abs() < 0.1);

        let snap_lat = t.cell(0, "snap_latitude").and_then(Cell::as_f64).unwrap();
        assert!((snap_lat - 42.0935).abs() < 1e-9);
        assert_eq!(t.cell(0, "gnis_name"), Some(&Cell::from("Lost River")));
        assert_eq!(t.cell(0, "fcode"), Some(&Cell::Integer(46006)));
        assert_eq!(t.cell(0, "site"), Some(&Cell::from("site-0")));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn scenario_b_unmatched_row_falls_back_without_aborting() {
        let source = ScriptedSource::new(near_lost_river);
        let table = points_table(&[(-122.3813, 42.09359, "4326"), (-124.9, 41.0, "EPSG:4326")]);

        let enriched = process(&source, &table, &BatchOptions::default())
            .await
            .unwrap();
        let t = &enriched.table;

        assert_eq!(t.len(), 2);
        assert!(t.cell(0, "measure").is_some_and(|c| !c.is_null()));
        for (name, _) in OUTPUT_SCHEMA.iter().skip(1) {
            assert!(t.cell(1, name).unwrap().is_null(), "{name} should be missing");
        }
        assert_eq!(t.cell(1, "geometry"), Some(&Cell::from("POINT (-124.9 41)")));

        assert_eq!(enriched.diagnostics.len(), 1);
        assert_eq!(enriched.diagnostics[0].row, 1);
        assert_eq!(
            enriched.diagnostics[0].issue,
            RowIssue::Query(QueryError::NoMatch(NoMatchReason::EmptyCollection))
        );
    }

    #[tokio::test]
    async fn scenario_c_mismatched_columns_fail_before_any_query() {
        let source = ScriptedSource::new(near_lost_river);
        let cells = |n: usize, v: f64| (0..n).map(|_| Cell::Float(v)).collect::<Vec<_>>();
        let table = Table::new(vec![
            Column::new("x", cells(5, -122.3813)),
            Column::new("y", cells(4, 42.09359)),
            Column::new("crs", (0..5).map(|_| Cell::Integer(4326)).collect()),
        ]);

        let err = process(&source, &table, &BatchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BatchError::MismatchedColumnLengths {
                x_len: 5,
                y_len: 4,
                crs_len: 5
            }
        );
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn output_preserves_row_count_and_order_under_concurrency() {
        // Alternate matched and unmatched rows.
        let rows: Vec<(f64, f64, &str)> = (0..40)
            .map(|i| {
                if i % 2 == 0 {
                    (-122.3813, 42.09359, "4326")
                } else {
                    (-100.0 - i as f64 * 0.1, 35.0, "4326")
                }
            })
            .collect();
        let table = points_table(&rows);
        let source = ScriptedSource::new(near_lost_river);
        let options = BatchOptions {
            concurrency: 7,
            ..BatchOptions::default()
        };

        let enriched = process(&source, &table, &options).await.unwrap();
        let t = &enriched.table;

        assert_eq!(t.len(), 40);
        assert_eq!(source.calls.load(Ordering::SeqCst), 40);
        for i in 0..40 {
            assert_eq!(t.cell(i, "site"), Some(&Cell::Text(format!("site-{i}"))));
            assert_eq!(t.cell(i, "snap_distance").unwrap().is_null(), i % 2 == 1);
        }
        let fallback_rows: Vec<usize> = enriched.diagnostics.iter().map(|d| d.row).collect();
        assert_eq!(fallback_rows, (0..40).filter(|i| i % 2 == 1).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn empty_table_gives_empty_output_with_full_schema() {
        let source = ScriptedSource::new(near_lost_river);
        let table = points_table(&[]);

        let enriched = process(&source, &table, &BatchOptions::default())
            .await
            .unwrap();
        assert!(enriched.table.is_empty());
        assert_eq!(enriched.table.columns().len(), 4 + OUTPUT_WIDTH);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn matched_and_unmatched_columns_share_one_type_each() {
        let source = ScriptedSource::new(near_lost_river);
        let table = points_table(&[(-122.3813, 42.09359, "4326"), (0.0, 0.0, "4326")]);
        let enriched = process(&source, &table, &BatchOptions::default())
            .await
            .unwrap();

        for (name, ty) in OUTPUT_SCHEMA.iter() {
            let column = enriched.table.column(name).unwrap();
            assert_eq!(column.values.len(), 2);
            for cell in &column.values {
                assert!(cell.column_type().is_none_or(|t: ColumnType| t == *ty));
            }
        }
    }

    #[tokio::test]
    async fn nearest_candidate_wins_and_ties_keep_response_order() {
        let far = {
            let mut line = lost_river("far");
            line.geometry = MultiLineString::new(vec![line_string![
                (x: -122.3830, y: 42.0950),
                (x: -122.3790, y: 42.0950),
            ]]);
            line
        };
        let source = ScriptedSource::new(move |_: &InputPoint| {
            Ok(wgs84(vec![far.clone(), lost_river("first"), lost_river("second")]))
        });
        let table = points_table(&[(-122.3813, 42.09359, "4326")]);

        for _ in 0..5 {
            let enriched = process(&source, &table, &BatchOptions::default())
                .await
                .unwrap();
            assert_eq!(
                enriched.table.cell(0, "permanent_identifier"),
                Some(&Cell::from("first"))
            );
        }
    }

    #[tokio::test]
    async fn query_failures_and_degenerate_lines_fall_back() {
        let source = ScriptedSource::new(|point: &InputPoint| {
            if point.x < 0.0 {
                Err(QueryError::QueryFailed("connection reset".to_string()))
            } else {
                let geometry = lost_river("no-measure").geometry;
                let line = CandidateLine::new(geometry, [("tomeas".to_string(), json!(100))]);
                Ok(wgs84(vec![line]))
            }
        });
        let table = points_table(&[(-1.0, 0.0, "4326"), (1.0, 0.0, "4326")]);

        let enriched = process(&source, &table, &BatchOptions::default())
            .await
            .unwrap();

        assert_eq!(enriched.table.len(), 2);
        assert_eq!(enriched.matched_rows(), 0);
        assert!(matches!(
            enriched.diagnostics[0].issue,
            RowIssue::Query(QueryError::QueryFailed(_))
        ));
        assert_eq!(
            enriched.diagnostics[1].issue,
            RowIssue::DegenerateGeometry(DegenerateGeometry::MissingMeasure {
                field: "frommeas".to_string()
            })
        );
    }

    #[tokio::test]
    async fn web_mercator_rows_are_harmonized_before_snapping() {
        let source = ScriptedSource::new(near_lost_river);
        let (x, y) = Crs::WebMercator.from_wgs84(-122.3813, 42.09359);
        let table = points_table(&[(x, y, "EPSG:3857")]);

        let enriched = process(&source, &table, &BatchOptions::default())
            .await
            .unwrap();
        let distance = enriched
            .table
            .cell(0, "snap_distance")
            .and_then(Cell::as_f64)
            .unwrap();
        assert!((distance - 10.0).abs() < 0.1);
    }

    #[tokio::test]
    async fn invalid_crs_aborts_before_any_query() {
        let source = ScriptedSource::new(near_lost_river);
        let table = points_table(&[(-122.3813, 42.09359, "4326"), (1.0, 2.0, "EPSG:99999")]);

        let err = process(&source, &table, &BatchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::InvalidCrs { row: 1, .. }));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn other_preconditions_are_checked() {
        let source = ScriptedSource::new(near_lost_river);
        let table = points_table(&[(-122.3813, 42.09359, "4326")]);

        let missing = BatchOptions {
            crs_field: "srid".to_string(),
            ..BatchOptions::default()
        };
        assert_eq!(
            process(&source, &table, &missing).await.unwrap_err(),
            BatchError::MissingColumn("srid".to_string())
        );

        let zero_radius = BatchOptions {
            search_distance_m: 0.0,
            ..BatchOptions::default()
        };
        assert!(matches!(
            process(&source, &table, &zero_radius).await.unwrap_err(),
            BatchError::InvalidSearchDistance(_)
        ));

        let colliding = Table::from_rows(
            &["x", "y", "crs", "measure"],
            vec![vec![Cell::Float(1.0), Cell::Float(2.0), Cell::Integer(4326), Cell::Null]],
        );
        assert_eq!(
            process(&source, &colliding, &BatchOptions::default())
                .await
                .unwrap_err(),
            BatchError::ColumnCollision("measure".to_string())
        );
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ragged_pass_through_column_fails_before_any_query() {
        let source = ScriptedSource::new(near_lost_river);
        let table = Table::new(vec![
            Column::new("site", vec![Cell::from("A")]),
            Column::new("x", vec![Cell::Float(-122.3813), Cell::Float(-122.3813)]),
            Column::new("y", vec![Cell::Float(42.09359), Cell::Float(42.09359)]),
            Column::new("crs", vec![Cell::Integer(4326), Cell::Integer(4326)]),
        ]);

        let err = process(&source, &table, &BatchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BatchError::RaggedColumn {
                column: "site".to_string(),
                expected: 2,
                found: 1
            }
        );
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unreadable_coordinates_fall_back_without_a_query() {
        let source = ScriptedSource::new(near_lost_river);
        let input = "site,x,y,crs\nA,-122.3813,42.09359,4326\nB,,42.0,4326\nC,-122.3813,north,EPSG:4326\n";
        let table = read_csv(input.as_bytes()).unwrap();

        let enriched = process(&source, &table, &BatchOptions::default())
            .await
            .unwrap();
        let t = &enriched.table;

        assert_eq!(t.len(), 3);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(t.cell(0, "measure").is_some_and(|c| !c.is_null()));
        for row in 1..3 {
            for (name, _) in OUTPUT_SCHEMA.iter() {
                assert!(t.cell(row, name).unwrap().is_null(), "{name} should be missing");
            }
        }
        assert_eq!(t.cell(2, "site"), Some(&Cell::from("C")));

        let rows: Vec<usize> = enriched.diagnostics.iter().map(|d| d.row).collect();
        assert_eq!(rows, vec![1, 2]);
        assert_eq!(
            enriched.diagnostics[0].issue,
            RowIssue::InvalidCoordinate {
                column: "x".to_string(),
                value: String::new()
            }
        );
        assert_eq!(
            enriched.diagnostics[1].issue,
            RowIssue::InvalidCoordinate {
                column: "y".to_string(),
                value: "north".to_string()
            }
        );
    }
}
