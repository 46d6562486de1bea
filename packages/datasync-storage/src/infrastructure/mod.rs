//! Infrastructure layer - collaborator adapters
//!
//! - `sqlite`: row source + local sink
//! - `mysql`: production sink
//! - `watermark`: decimal text file
//! - `memory`: test doubles

pub mod memory;
pub mod watermark;

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{MemoryRowSource, MemorySinkWriter, MemoryWatermarkStore};
pub use watermark::{format_watermark, parse_watermark, FileWatermarkStore};

#[cfg(feature = "mysql")]
pub use mysql::{MySqlSinkOptions, MySqlSinkWriter, MySqlSslMode};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteRowSource, SqliteSinkWriter};
