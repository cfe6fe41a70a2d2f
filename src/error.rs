//! Error taxonomy for the enrichment pipeline.
//!
//! `BatchError` aborts a whole call and is raised before any network activity.
//! Everything else is row-level: it is folded into a [`RowIssue`] and the row is
//! emitted through the fallback record.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrsError {
    #[error("unsupported or unparseable CRS identifier '{0}'")]
    InvalidCrs(String),
}

/// Why a proximity query produced no usable candidate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NoMatchReason {
    #[error("feature service answered with HTTP status {0}")]
    HttpStatus(u16),
    #[error("feature service reported error {code}: {message}")]
    ServiceError { code: i64, message: String },
    #[error("no flowline within the search radius")]
    EmptyCollection,
    #[error("no candidate had a measurable line geometry")]
    NoMeasurableCandidate,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("no match: {0}")]
    NoMatch(NoMatchReason),
    #[error("flowline query failed: {0}")]
    QueryFailed(String),
}

impl QueryError {
    pub fn is_no_match(&self) -> bool {
        matches!(self, QueryError::NoMatch(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DegenerateGeometry {
    #[error("flowline has no usable '{field}' measure attribute")]
    MissingMeasure { field: String },
    #[error("flowline geometry has no length to project onto")]
    NoProjection,
    #[error("measure {measure} falls outside the declared range [{low}, {high}]")]
    OutOfRange { measure: f64, low: f64, high: f64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("attribute '{field}' has non-numeric value {value}")]
pub struct AttributeCoercionError {
    pub field: String,
    pub value: String,
}

/// Row-level condition attached to a row's diagnostics. Never aborts the batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RowIssue {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(#[from] DegenerateGeometry),
    #[error(transparent)]
    AttributeCoercion(#[from] AttributeCoercionError),
    #[error("column '{column}' holds non-numeric coordinate '{value}'")]
    InvalidCoordinate { column: String, value: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BatchError {
    #[error("column '{0}' is not present in the input table")]
    MissingColumn(String),
    #[error("coordinate columns differ in length (x: {x_len}, y: {y_len}, crs: {crs_len})")]
    MismatchedColumnLengths {
        x_len: usize,
        y_len: usize,
        crs_len: usize,
    },
    #[error("column '{column}' has {found} values, expected {expected}")]
    RaggedColumn {
        column: String,
        expected: usize,
        found: usize,
    },
    #[error("row {row}: {source}")]
    InvalidCrs {
        row: usize,
        #[source]
        source: CrsError,
    },
    #[error("input column '{0}' collides with an output field of the same name")]
    ColumnCollision(String),
    #[error("search distance must be a positive number of meters, got {0}")]
    InvalidSearchDistance(f64),
}

#[derive(Error, Debug)]
pub enum TableError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("environment variable {var} has invalid value '{value}': {reason}")]
pub struct ConfigError {
    pub var: String,
    pub value: String,
    pub reason: String,
}
