//! In-memory adapters (for testing)
//!
//! Vec-backed row source, sink and watermark with fault injection.
//! NOT for production use.

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{
    AllowedLabels, BatchReport, ParameterRecord, RowSource, SinkWriter, SourceRow, WatermarkStore,
};
use crate::error::{ErrorKind, Result, StorageError};

/// Row source over a fixed row set.
///
/// Rows without a valid index are returned by every fetch.
#[derive(Clone)]
pub struct MemoryRowSource {
    name: String,
    rows: Arc<Mutex<Vec<SourceRow>>>,
    failing: Arc<AtomicBool>,
    fetches: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl MemoryRowSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(AtomicBool::new(false)),
            fetches: Arc::new(AtomicUsize::new(0)),
            delay: None,
        }
    }

    pub fn with_rows(name: impl Into<String>, rows: Vec<SourceRow>) -> Self {
        let source = Self::new(name);
        source.push_rows(rows);
        source
    }

    /// Sleep before answering each fetch
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_rows(&self, rows: impl IntoIterator<Item = SourceRow>) {
        self.rows.lock().extend(rows);
    }

    /// Make every call fail with a connectivity error until cleared
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RowSource for MemoryRowSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_since(
        &self,
        watermark: Decimal,
        labels: &AllowedLabels,
    ) -> Result<Vec<SourceRow>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::connectivity(format!(
                "row source '{}' unreachable",
                self.name
            )));
        }

        let mut rows: Vec<SourceRow> = self
            .rows
            .lock()
            .iter()
            .filter(|r| r.index().map_or(true, |i| i > watermark))
            .filter(|r| labels.allows(r.label()))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.index_or_zero());
        Ok(rows)
    }

    async fn test_connection(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::connectivity(format!(
                "row source '{}' unreachable",
                self.name
            )));
        }
        Ok(())
    }
}

/// Injected sink failure
#[derive(Debug, Clone)]
enum FailurePlan {
    Never,
    Always(ErrorKind),
    PartNumber(String, ErrorKind),
}

/// Sink that keeps committed records in memory.
///
/// A failing batch commits nothing, like a rolled-back transaction.
#[derive(Clone)]
pub struct MemorySinkWriter {
    committed: Arc<Mutex<Vec<ParameterRecord>>>,
    plan: Arc<Mutex<FailurePlan>>,
    calls: Arc<AtomicUsize>,
}

impl MemorySinkWriter {
    pub fn new() -> Self {
        Self {
            committed: Arc::new(Mutex::new(Vec::new())),
            plan: Arc::new(Mutex::new(FailurePlan::Never)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail every batch (and connection test) with the given kind
    pub fn fail_always(&self, kind: ErrorKind) {
        *self.plan.lock() = FailurePlan::Always(kind);
    }

    /// Fail batches containing a record for `part_number`
    pub fn fail_part_number(&self, part_number: impl Into<String>, kind: ErrorKind) {
        *self.plan.lock() = FailurePlan::PartNumber(part_number.into(), kind);
    }

    pub fn recover(&self) {
        *self.plan.lock() = FailurePlan::Never;
    }

    pub fn records(&self) -> Vec<ParameterRecord> {
        self.committed.lock().clone()
    }

    pub fn write_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MemorySinkWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SinkWriter for MemorySinkWriter {
    async fn write_batch(&self, records: &[ParameterRecord]) -> Result<BatchReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match &*self.plan.lock() {
            FailurePlan::Never => {}
            FailurePlan::Always(kind) => {
                return Err(StorageError::new(*kind, "injected sink failure"));
            }
            FailurePlan::PartNumber(pn, kind) => {
                if records.iter().any(|r| r.part_number == *pn) {
                    return Err(StorageError::new(
                        *kind,
                        format!("injected sink failure for part number {}", pn),
                    ));
                }
            }
        }

        let mut report = BatchReport::default();
        let mut committed = self.committed.lock();
        for record in records {
            if record.has_part_number() {
                committed.push(record.clone());
                report.inserted += 1;
            } else {
                report.skipped += 1;
            }
        }
        Ok(report)
    }

    async fn test_connection(&self) -> Result<()> {
        match &*self.plan.lock() {
            FailurePlan::Always(kind) => Err(StorageError::new(*kind, "injected sink failure")),
            _ => Ok(()),
        }
    }
}

/// Watermark held in memory, with a save log.
#[derive(Clone, Default)]
pub struct MemoryWatermarkStore {
    value: Arc<Mutex<Decimal>>,
    saves: Arc<Mutex<Vec<Decimal>>>,
    fail_saves: Arc<AtomicBool>,
}

impl MemoryWatermarkStore {
    pub fn new(initial: Decimal) -> Self {
        Self {
            value: Arc::new(Mutex::new(initial)),
            ..Default::default()
        }
    }

    /// Values passed to `save`, in order
    pub fn saves(&self) -> Vec<Decimal> {
        self.saves.lock().clone()
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl WatermarkStore for MemoryWatermarkStore {
    fn load(&self) -> Decimal {
        *self.value.lock()
    }

    fn save(&self, value: Decimal) -> Result<()> {
        self.saves.lock().push(value);
        *self.value.lock() = value;
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::io("injected watermark save failure"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CellValue, FixedFields, SourceColumns};

    fn row(index: i64, label: &str) -> SourceRow {
        SourceRow::new(
            "mem",
            vec![
                ("Time_index".to_string(), CellValue::Integer(index)),
                ("Label_Name".to_string(), CellValue::from(label)),
            ],
            &SourceColumns::default(),
        )
    }

    fn record(pn: &str) -> ParameterRecord {
        ParameterRecord {
            name: "Full".to_string(),
            value: 70.0,
            lower_limit: 68.5,
            upper_limit: 71.5,
            part_number: pn.to_string(),
            variance: String::new(),
            fixed: Arc::new(FixedFields::default()),
        }
    }

    #[tokio::test]
    async fn test_memory_source_filters_and_orders() {
        let source = MemoryRowSource::with_rows(
            "pass",
            vec![row(5, "A"), row(2, "a"), row(9, "B"), row(1, "A")],
        );

        let rows = source
            .fetch_since(Decimal::from(1), &AllowedLabels::new(["A"]))
            .await
            .unwrap();
        let indexes: Vec<_> = rows.iter().map(|r| r.index_or_zero()).collect();
        assert_eq!(indexes, vec![Decimal::from(2), Decimal::from(5)]);
    }

    #[tokio::test]
    async fn test_memory_source_failure() {
        let source = MemoryRowSource::with_rows("fail", vec![row(1, "A")]);
        source.set_failing(true);
        let err = source
            .fetch_since(Decimal::ZERO, &AllowedLabels::default())
            .await
            .unwrap_err();
        assert!(err.is_connectivity());
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_sink_skips_blank_part_numbers() {
        let sink = MemorySinkWriter::new();
        let report = sink
            .write_batch(&[record("5QD919051T"), record(" ")])
            .await
            .unwrap();
        assert_eq!(report, BatchReport { inserted: 1, skipped: 1 });
        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_sink_failure_commits_nothing() {
        let sink = MemorySinkWriter::new();
        sink.fail_part_number("BAD", ErrorKind::Database);
        assert!(sink.write_batch(&[record("OK"), record("BAD")]).await.is_err());
        assert!(sink.records().is_empty());

        sink.write_batch(&[record("OK")]).await.unwrap();
        assert_eq!(sink.records().len(), 1);
    }

    #[test]
    fn test_memory_watermark_failed_save_still_advances() {
        let store = MemoryWatermarkStore::new(Decimal::from(3));
        store.set_fail_saves(true);
        assert!(store.save(Decimal::from(8)).is_err());
        assert_eq!(store.load(), Decimal::from(8));
        assert_eq!(store.saves(), vec![Decimal::from(8)]);
    }
}
