//! Storage Ports (Trait Interfaces)
//!
//! Port/Adapter pattern for collaborator flexibility:
//! - Row sources: SQLite files (one adapter, N configured instances)
//! - Sinks: MySQL (production), SQLite (local runs)
//! - Watermark: decimal text file
//! - Testing: in-memory adapters with fault injection

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::models::{AllowedLabels, ParameterRecord, SourceRow};
use crate::Result;

/// Outcome of one sink batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Records durably appended
    pub inserted: usize,
    /// Records refused before writing (blank part number)
    pub skipped: usize,
}

/// Row Source Port
///
/// Implemented once per store type and instantiated once per configured
/// source (e.g. "pass" and "fail").
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Instance name used in logs and cycle reports
    fn name(&self) -> &str;

    /// Fetch rows with index strictly greater than `watermark`
    ///
    /// - Empty `labels`: no label filtering
    /// - Otherwise only rows whose label matches one entry (case-insensitive)
    /// - Ordered by index ascending
    ///
    /// # Errors
    ///
    /// Connectivity or query failures; the engine treats them as zero rows.
    async fn fetch_since(&self, watermark: Decimal, labels: &AllowedLabels)
        -> Result<Vec<SourceRow>>;

    /// Open and close a connection to check reachability
    async fn test_connection(&self) -> Result<()>;
}

/// Sink Writer Port
#[async_trait]
pub trait SinkWriter: Send + Sync {
    /// Append a batch in one transaction (all-or-nothing)
    ///
    /// Records with a blank part number are skipped and counted, never
    /// written. Any statement failure rolls back the whole batch.
    async fn write_batch(&self, records: &[ParameterRecord]) -> Result<BatchReport>;

    /// Open and close a connection to check reachability
    async fn test_connection(&self) -> Result<()>;
}

/// Watermark Store Port
///
/// Holds the single "last processed index" checkpoint.
pub trait WatermarkStore: Send + Sync {
    /// Current watermark; 0 when nothing (valid) was ever saved. Never fails.
    fn load(&self) -> Decimal;

    /// Persist a new watermark, replacing the previous one atomically.
    ///
    /// On failure the store still reports `value` from `load` for the rest of
    /// the process lifetime.
    fn save(&self, value: Decimal) -> Result<()>;
}
