#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::arc_with_non_send_sync,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::bytes_nth,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::cmp_null,
    clippy::op_ref
)]

//! Snap tabular point records onto the nearest flowline of a hydrographic
//! network and report the linear-referenced measure at the snapped position.

pub mod batch;
pub mod config;
pub mod crs;
pub mod error;
pub mod feature_service;
pub mod geometry_utils;
pub mod linear_reference;
pub mod record;
pub mod selector;
pub mod table;

pub use batch::{BatchOptions, EnrichedTable, RowDiagnostic, process};
pub use config::SnapConfig;
pub use crs::{Crs, InputPoint};
pub use feature_service::{ArcGisFlowlineService, FlowlineSource};
pub use record::{OUTPUT_SCHEMA, OutputRecord};
pub use table::{Cell, Column, Table};

pub const WGS_84_SRID: u32 = 4326;
