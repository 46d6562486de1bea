//! datasync-storage - collaborators of the incremental sync engine
//!
//! > Rows come in above a watermark, parameter records go out in one
//! > transaction per batch, and the watermark only moves forward.
//!
//! ## Layers
//!
//! - `domain`: models (`SourceRow`, `ParameterRecord`, ...) and port traits
//!   (`RowSource`, `SinkWriter`, `WatermarkStore`)
//! - `infrastructure`: adapters (SQLite row source/sink, MySQL sink, file
//!   watermark, in-memory test doubles)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use datasync_storage::{AllowedLabels, RowSource, SqliteRowSource, SourceColumns};
//!
//! let pass = SqliteRowSource::new("pass", "data/pass.db", "Data", SourceColumns::default());
//! let rows = pass.fetch_since(watermark, &AllowedLabels::default()).await?;
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{
    AllowedLabels, BatchReport, CellValue, FixedFields, ParameterRecord, RowSource, SinkWriter,
    SourceColumns, SourceRow, WatermarkStore,
};
pub use infrastructure::{
    FileWatermarkStore, MemoryRowSource, MemorySinkWriter, MemoryWatermarkStore,
};

#[cfg(feature = "mysql")]
pub use infrastructure::{MySqlSinkOptions, MySqlSinkWriter, MySqlSslMode};
#[cfg(feature = "sqlite")]
pub use infrastructure::{SqliteRowSource, SqliteSinkWriter};
