//! Sync Engine
//!
//! One cycle:
//! 1. Load watermark W
//! 2. Fetch rows with index > W from every source (a failing source counts
//!    as zero rows)
//! 3. Stable sort by index, so equal indexes keep source order
//! 4. Per row: extract, write (one sink call per row), account the index
//! 5. Save max accounted index if it moved past W
//!
//! Failures are absorbed at their scope and collected in `CycleReport`.
//! A sink *connectivity* failure ends the cycle early; the watermark then
//! stops strictly below the failed row's index so the row is fetched again.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use datasync_storage::{RowSource, SinkWriter, SourceRow, WatermarkStore};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::FailureScope;
use crate::extractor::ParameterExtractor;
use crate::scheduler::CycleRunner;

/// One absorbed failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleFailure {
    pub scope: FailureScope,
    /// Source name for `source`/`row` failures
    pub origin: Option<String>,
    /// Row index for `row`/`sink` failures
    pub index: Option<Decimal>,
    pub message: String,
}

/// Outcome of one cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub rows_fetched: usize,
    /// Rows whose records reached the sink
    pub rows_written: usize,
    /// Rows dropped by the extractor or carrying no measurement
    pub rows_dropped: usize,
    /// Rows whose write failed but which still count as accounted for
    pub rows_failed: usize,
    pub parameters_inserted: usize,
    pub parameters_skipped: usize,
    pub watermark_before: Decimal,
    pub watermark_after: Decimal,
    /// Set when a sink outage ended the cycle before all rows were processed
    pub aborted: bool,
    pub failures: Vec<CycleFailure>,
    pub duration_ms: u64,
}

impl CycleReport {
    fn new(cycle_id: Uuid, watermark: Decimal) -> Self {
        Self {
            cycle_id,
            started_at: Utc::now(),
            rows_fetched: 0,
            rows_written: 0,
            rows_dropped: 0,
            rows_failed: 0,
            parameters_inserted: 0,
            parameters_skipped: 0,
            watermark_before: watermark,
            watermark_after: watermark,
            aborted: false,
            failures: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn watermark_advanced(&self) -> bool {
        self.watermark_after > self.watermark_before
    }

    pub fn failures_in(&self, scope: FailureScope) -> usize {
        self.failures.iter().filter(|f| f.scope == scope).count()
    }

    fn fail(
        &mut self,
        scope: FailureScope,
        origin: Option<&str>,
        index: Option<Decimal>,
        message: impl Into<String>,
    ) {
        self.failures.push(CycleFailure {
            scope,
            origin: origin.map(str::to_string),
            index,
            message: message.into(),
        });
    }
}

pub struct SyncEngine {
    extractor: ParameterExtractor,
    sources: Vec<Arc<dyn RowSource>>,
    sink: Arc<dyn SinkWriter>,
    watermark: Arc<dyn WatermarkStore>,
}

impl SyncEngine {
    pub fn new(
        extractor: ParameterExtractor,
        sources: Vec<Arc<dyn RowSource>>,
        sink: Arc<dyn SinkWriter>,
        watermark: Arc<dyn WatermarkStore>,
    ) -> Self {
        Self {
            extractor,
            sources,
            sink,
            watermark,
        }
    }

    pub fn sources(&self) -> &[Arc<dyn RowSource>] {
        &self.sources
    }

    pub fn sink(&self) -> &Arc<dyn SinkWriter> {
        &self.sink
    }

    pub fn watermark(&self) -> Decimal {
        self.watermark.load()
    }

    pub fn extractor(&self) -> &ParameterExtractor {
        &self.extractor
    }

    /// Run one full cycle. Never fails; problems land in `report.failures`.
    pub async fn run_cycle(&self) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("sync_cycle", cycle_id = %cycle_id);
        self.run_cycle_inner(cycle_id).instrument(span).await
    }

    async fn run_cycle_inner(&self, cycle_id: Uuid) -> CycleReport {
        let start = Instant::now();
        let before = self.watermark.load();
        let mut report = CycleReport::new(cycle_id, before);

        debug!(watermark = %before, "Cycle started");

        let rows = self.fetch_all(before, &mut report).await;
        report.rows_fetched = rows.len();

        if rows.is_empty() {
            report.duration_ms = start.elapsed().as_millis() as u64;
            info!(
                watermark = %before,
                source_failures = report.failures_in(FailureScope::Source),
                "No new rows"
            );
            return report;
        }

        let target = self.process_rows(&rows, before, &mut report).await;

        if target > before {
            if let Err(e) = self.watermark.save(target) {
                error!(watermark = %target, error = %e, "Failed to persist watermark; kept in memory only");
                report.fail(FailureScope::Watermark, None, Some(target), e.to_string());
            }
            report.watermark_after = target;
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            rows = report.rows_fetched,
            written = report.rows_written,
            dropped = report.rows_dropped,
            failed = report.rows_failed,
            inserted = report.parameters_inserted,
            skipped = report.parameters_skipped,
            failures = report.failures.len(),
            aborted = report.aborted,
            watermark_before = %report.watermark_before,
            watermark_after = %report.watermark_after,
            duration_ms = report.duration_ms,
            "Cycle finished"
        );
        report
    }

    /// Concatenate every source's rows, then stable-sort by index
    async fn fetch_all(&self, watermark: Decimal, report: &mut CycleReport) -> Vec<SourceRow> {
        let labels = self.extractor.allowed_labels();
        let mut rows = Vec::new();

        for source in &self.sources {
            match source.fetch_since(watermark, labels).await {
                Ok(fetched) => {
                    let total = fetched.len();
                    let before = rows.len();
                    // rows at or below W were already accounted for
                    rows.extend(
                        fetched
                            .into_iter()
                            .filter(|r| r.index().map_or(true, |i| i > watermark)),
                    );
                    let stale = total - (rows.len() - before);
                    if stale > 0 {
                        warn!(source = source.name(), stale, "Source returned rows at or below the watermark; ignored");
                    }
                    debug!(source = source.name(), rows = total - stale, "Fetched rows");
                }
                Err(e) => {
                    warn!(source = source.name(), error = %e, "Row source failed; treating as empty");
                    report.fail(FailureScope::Source, Some(source.name()), None, e.to_string());
                }
            }
        }

        rows.sort_by_key(SourceRow::index_or_zero);
        rows
    }

    /// Extract and write each row in order. Returns the watermark target.
    async fn process_rows(
        &self,
        rows: &[SourceRow],
        before: Decimal,
        report: &mut CycleReport,
    ) -> Decimal {
        let total = rows.len();
        let mut max_seen = before;

        for (i, row) in rows.iter().enumerate() {
            let index = row.index();
            debug!(
                source = row.origin(),
                index = %row.index_or_zero(),
                remaining = total - i - 1,
                "Processing row"
            );

            match self.extractor.evaluate(row) {
                Err(reason) => {
                    debug!(source = row.origin(), label = row.label(), %reason, "Row dropped");
                    report.rows_dropped += 1;
                }
                Ok(records) if records.is_empty() => {
                    debug!(source = row.origin(), "Row carries no usable measurement");
                    report.rows_dropped += 1;
                }
                Ok(records) => match self.sink.write_batch(&records).await {
                    Ok(batch) => {
                        report.rows_written += 1;
                        report.parameters_inserted += batch.inserted;
                        report.parameters_skipped += batch.skipped;
                    }
                    Err(e) if e.is_connectivity() => {
                        let failed_at = row.index_or_zero();
                        error!(
                            source = row.origin(),
                            index = %failed_at,
                            error = %e,
                            "Sink unreachable; ending cycle"
                        );
                        report.fail(FailureScope::Sink, Some(row.origin()), index, e.to_string());
                        report.aborted = true;
                        return highest_below(&rows[..i], failed_at).map_or(before, |m| m.max(before));
                    }
                    Err(e) => {
                        warn!(
                            source = row.origin(),
                            index = %row.index_or_zero(),
                            error = %e,
                            "Row write failed; row accounted for and skipped"
                        );
                        report.rows_failed += 1;
                        report.fail(FailureScope::Row, Some(row.origin()), index, e.to_string());
                    }
                },
            }

            match index {
                Some(idx) if idx > max_seen => max_seen = idx,
                Some(_) => {}
                None => warn!(source = row.origin(), "Row has no valid index; watermark not advanced by it"),
            }
        }

        max_seen
    }
}

/// Highest valid index among `rows` strictly below `bound`
fn highest_below(rows: &[SourceRow], bound: Decimal) -> Option<Decimal> {
    rows.iter()
        .filter_map(SourceRow::index)
        .filter(|idx| *idx < bound)
        .max()
}

#[async_trait]
impl CycleRunner for SyncEngine {
    type Report = CycleReport;

    async fn run_cycle(&self) -> CycleReport {
        SyncEngine::run_cycle(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{PartNumberMap, ResolverChain};
    use datasync_storage::{
        AllowedLabels, CellValue, ErrorKind, FixedFields, MemoryRowSource, MemorySinkWriter,
        MemoryWatermarkStore, SourceColumns,
    };
    use std::collections::BTreeMap;

    fn row(origin: &str, index: CellValue, label: &str, full: f64, pn: Option<&str>) -> SourceRow {
        let mut cols = vec![
            ("Time_index".to_string(), index),
            ("Label_Name".to_string(), CellValue::from(label)),
            ("Full".to_string(), CellValue::Real(full)),
        ];
        if let Some(pn) = pn {
            cols.push(("Matrix_Code".to_string(), CellValue::from(format!("#{}", pn))));
        }
        SourceRow::new(origin, cols, &SourceColumns::default())
    }

    fn ok(origin: &str, index: i64, pn: &str) -> SourceRow {
        row(origin, CellValue::Integer(index), "A", 70.0, Some(pn))
    }

    /// Source that ignores the watermark and always returns the same rows
    struct StaleSource(Vec<SourceRow>);

    #[async_trait]
    impl RowSource for StaleSource {
        fn name(&self) -> &str {
            "stale"
        }

        async fn fetch_since(
            &self,
            _watermark: Decimal,
            _labels: &AllowedLabels,
        ) -> datasync_storage::Result<Vec<SourceRow>> {
            Ok(self.0.clone())
        }

        async fn test_connection(&self) -> datasync_storage::Result<()> {
            Ok(())
        }
    }

    struct Harness {
        pass: MemoryRowSource,
        fail: MemoryRowSource,
        sink: MemorySinkWriter,
        store: MemoryWatermarkStore,
        engine: SyncEngine,
    }

    fn harness(initial: i64) -> Harness {
        let pass = MemoryRowSource::new("pass");
        let fail = MemoryRowSource::new("fail");
        let sink = MemorySinkWriter::new();
        let store = MemoryWatermarkStore::new(Decimal::from(initial));
        let extractor = ParameterExtractor::new(
            AllowedLabels::new(["A"]),
            ResolverChain::standard(PartNumberMap::default(), "", "Matrix_Code"),
            FixedFields::default(),
            BTreeMap::new(),
        );
        let engine = SyncEngine::new(
            extractor,
            vec![Arc::new(pass.clone()), Arc::new(fail.clone())],
            Arc::new(sink.clone()),
            Arc::new(store.clone()),
        );
        Harness {
            pass,
            fail,
            sink,
            store,
            engine,
        }
    }

    #[tokio::test]
    async fn test_merges_sources_in_index_order() {
        let h = harness(0);
        h.pass.push_rows([ok("pass", 3, "P3"), ok("pass", 5, "P5")]);
        h.fail.push_rows([ok("fail", 1, "F1"), ok("fail", 4, "F4")]);

        let report = h.engine.run_cycle().await;

        let order: Vec<_> = h.sink.records().iter().map(|r| r.part_number.clone()).collect();
        assert_eq!(order, vec!["F1", "P3", "F4", "P5"]);
        assert_eq!(report.rows_fetched, 4);
        assert_eq!(report.parameters_inserted, 4);
        assert_eq!(report.watermark_after, Decimal::from(5));
        assert_eq!(h.store.saves(), vec![Decimal::from(5)]);
    }

    #[tokio::test]
    async fn test_equal_indexes_keep_source_order() {
        let h = harness(0);
        h.pass.push_rows([ok("pass", 2, "PASS")]);
        h.fail.push_rows([ok("fail", 2, "FAIL")]);

        h.engine.run_cycle().await;
        let order: Vec<_> = h.sink.records().iter().map(|r| r.part_number.clone()).collect();
        assert_eq!(order, vec!["PASS", "FAIL"]);
    }

    #[tokio::test]
    async fn test_empty_cycle_is_noop() {
        let h = harness(7);
        h.pass.push_rows([ok("pass", 7, "OLD")]);

        let report = h.engine.run_cycle().await;
        assert_eq!(report.rows_fetched, 0);
        assert!(!report.watermark_advanced());
        assert!(h.store.saves().is_empty());
        assert_eq!(h.sink.write_calls(), 0);
    }

    #[tokio::test]
    async fn test_rows_at_or_below_watermark_are_never_rewritten() {
        let sink = MemorySinkWriter::new();
        let store = MemoryWatermarkStore::new(Decimal::from(5));
        let extractor = ParameterExtractor::new(
            AllowedLabels::new(["A"]),
            ResolverChain::standard(PartNumberMap::default(), "", "Matrix_Code"),
            FixedFields::default(),
            BTreeMap::new(),
        );
        let source = StaleSource(vec![
            ok("stale", 4, "OLD"),
            ok("stale", 5, "EDGE"),
            ok("stale", 6, "NEW"),
        ]);
        let engine = SyncEngine::new(
            extractor,
            vec![Arc::new(source)],
            Arc::new(sink.clone()),
            Arc::new(store.clone()),
        );

        let report = engine.run_cycle().await;
        assert_eq!(report.rows_fetched, 1);
        assert_eq!(report.watermark_after, Decimal::from(6));

        let idle = engine.run_cycle().await;
        assert_eq!(idle.rows_fetched, 0);
        assert!(!idle.watermark_advanced());

        let written: Vec<_> = sink.records().iter().map(|r| r.part_number.clone()).collect();
        assert_eq!(written, vec!["NEW"]);
    }

    #[tokio::test]
    async fn test_source_failure_is_isolated() {
        let h = harness(0);
        h.pass.push_rows([ok("pass", 3, "P3")]);
        h.fail.set_failing(true);

        let report = h.engine.run_cycle().await;
        assert_eq!(report.failures_in(FailureScope::Source), 1);
        assert_eq!(report.failures[0].origin.as_deref(), Some("fail"));
        assert_eq!(report.parameters_inserted, 1);
        assert_eq!(report.watermark_after, Decimal::from(3));
    }

    #[tokio::test]
    async fn test_dropped_rows_still_advance_watermark() {
        let h = harness(0);
        h.pass.push_rows([
            ok("pass", 1, "P1"),
            // no part number anywhere
            row("pass", CellValue::Integer(2), "A", 70.0, None),
            // label outside the allow-list never reaches the engine
            row("pass", CellValue::Integer(3), "B", 70.0, Some("PB")),
        ]);

        let report = h.engine.run_cycle().await;
        assert_eq!(report.rows_fetched, 2);
        assert_eq!(report.rows_dropped, 1);
        assert_eq!(report.watermark_after, Decimal::from(2));
        assert_eq!(h.sink.records().len(), 1);
    }

    #[tokio::test]
    async fn test_row_write_failure_is_accepted_loss() {
        let h = harness(0);
        h.pass.push_rows([ok("pass", 1, "P1"), ok("pass", 2, "BAD"), ok("pass", 3, "P3")]);
        h.sink.fail_part_number("BAD", ErrorKind::Database);

        let report = h.engine.run_cycle().await;
        assert_eq!(report.rows_failed, 1);
        assert_eq!(report.failures_in(FailureScope::Row), 1);
        assert_eq!(report.failures[0].index, Some(Decimal::from(2)));
        assert_eq!(report.watermark_after, Decimal::from(3));
        assert_eq!(h.sink.records().len(), 2);
        assert!(!report.aborted);
    }

    #[tokio::test]
    async fn test_sink_unreachable_leaves_watermark_unchanged() {
        let h = harness(10);
        h.pass.push_rows([ok("pass", 11, "P11"), ok("pass", 12, "P12")]);
        h.sink.fail_always(ErrorKind::Connectivity);

        let report = h.engine.run_cycle().await;
        assert!(report.aborted);
        assert_eq!(report.failures_in(FailureScope::Sink), 1);
        assert_eq!(report.watermark_after, Decimal::from(10));
        assert!(h.store.saves().is_empty());
        assert_eq!(h.sink.write_calls(), 1);

        // next cycle sees the same rows again
        h.sink.recover();
        let report = h.engine.run_cycle().await;
        assert_eq!(report.rows_fetched, 2);
        assert_eq!(report.watermark_after, Decimal::from(12));
    }

    #[tokio::test]
    async fn test_sink_outage_mid_cycle_stops_below_failed_row() {
        let h = harness(0);
        h.pass.push_rows([ok("pass", 1, "P1"), ok("pass", 4, "P4"), ok("pass", 6, "P6")]);
        h.fail.push_rows([ok("fail", 4, "DOWN")]);
        h.sink.fail_part_number("DOWN", ErrorKind::Connectivity);

        let report = h.engine.run_cycle().await;
        assert!(report.aborted);
        // P4 shares the failed index, so index 4 must be fetched again
        assert_eq!(report.watermark_after, Decimal::from(1));
        assert_eq!(h.sink.records().len(), 2);
        assert_eq!(h.store.saves(), vec![Decimal::from(1)]);
    }

    #[tokio::test]
    async fn test_rows_without_index_never_advance() {
        let h = harness(0);
        h.pass.push_rows([
            row("pass", CellValue::from("garbage"), "A", 70.0, Some("G")),
            ok("pass", 2, "P2"),
        ]);

        let report = h.engine.run_cycle().await;
        assert_eq!(report.parameters_inserted, 2);
        assert_eq!(report.watermark_after, Decimal::from(2));

        let h = harness(0);
        h.pass.push_rows([row("pass", CellValue::Null, "A", 70.0, Some("G"))]);
        let report = h.engine.run_cycle().await;
        assert_eq!(report.parameters_inserted, 1);
        assert!(!report.watermark_advanced());
    }

    #[tokio::test]
    async fn test_watermark_save_failure_is_reported_not_fatal() {
        let h = harness(0);
        h.pass.push_rows([ok("pass", 9, "P9")]);
        h.store.set_fail_saves(true);

        let report = h.engine.run_cycle().await;
        assert_eq!(report.failures_in(FailureScope::Watermark), 1);
        assert_eq!(report.watermark_after, Decimal::from(9));
        assert_eq!(h.engine.watermark(), Decimal::from(9));

        // no regression in-process: row 9 is not fetched again
        let report = h.engine.run_cycle().await;
        assert_eq!(report.rows_fetched, 0);
    }

    #[tokio::test]
    async fn test_decimal_indexes_keep_precision() {
        let h = harness(0);
        h.pass.push_rows([row("pass", CellValue::from("1700000000.125"), "A", 70.0, Some("D"))]);

        let report = h.engine.run_cycle().await;
        assert_eq!(report.watermark_after.to_string(), "1700000000.125");
    }
}
