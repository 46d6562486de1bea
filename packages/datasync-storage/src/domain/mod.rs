//! Domain layer for the sync storage collaborators
//!
//! # Domain Models
//!
//! - `SourceRow`: one row above the watermark, owned by a single cycle
//! - `ParameterRecord`: one measurement bound for the sink
//! - `AllowedLabels`: optional case-insensitive label allow-list
//!
//! # Port Traits
//!
//! - `RowSource`: "give me all rows with index > W"
//! - `SinkWriter`: transactional batch append
//! - `WatermarkStore`: durable decimal checkpoint

pub mod models;
pub mod ports;

pub use models::{
    eq_ignore_case, AllowedLabels, CellValue, FixedFields, ParameterRecord, SourceColumns,
    SourceRow,
};
pub use ports::{BatchReport, RowSource, SinkWriter, WatermarkStore};
