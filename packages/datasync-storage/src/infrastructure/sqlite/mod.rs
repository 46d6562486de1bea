//! SQLite adapters
//!
//! - `SqliteRowSource`: reads one tabular store file (table `Data` by default)
//! - `SqliteSinkWriter`: local `parameters` table, for runs without MySQL
//!
//! Every call opens its own connection and closes it before returning, so no
//! connection outlives a sync cycle. Blocking rusqlite work runs on the tokio
//! blocking pool.

use async_trait::async_trait;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::domain::{
    AllowedLabels, BatchReport, CellValue, ParameterRecord, RowSource, SinkWriter, SourceColumns,
    SourceRow,
};
use crate::error::{Result, StorageError};

/// Quote an SQLite identifier
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn cell_from_ref(value: ValueRef<'_>) -> CellValue {
    match value {
        ValueRef::Null => CellValue::Null,
        ValueRef::Integer(i) => CellValue::Integer(i),
        ValueRef::Real(f) => CellValue::Real(f),
        ValueRef::Text(t) => CellValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => CellValue::Blob(b.to_vec()),
    }
}

/// Stores keep the index as a double. `SourceRow` derives the decimal from
/// the double's shortest round-trip text, so parsing that text back yields
/// the exact stored value and `index > ?` excludes the watermark row itself.
fn watermark_as_real(watermark: Decimal) -> Result<f64> {
    watermark
        .to_string()
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .ok_or_else(|| {
            StorageError::config(format!("watermark {} not representable as REAL", watermark))
        })
}

async fn blocking<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| StorageError::database(format!("SQLite worker failed: {}", e)))?
}

// ═══════════════════════════════════════════════════════════════════════════
// Row source
// ═══════════════════════════════════════════════════════════════════════════

/// Row source over one SQLite file
#[derive(Debug, Clone)]
pub struct SqliteRowSource {
    name: String,
    path: PathBuf,
    table: String,
    columns: SourceColumns,
}

impl SqliteRowSource {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        table: impl Into<String>,
        columns: SourceColumns,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            table: table.into(),
            columns,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(path: &Path) -> Result<Connection> {
        Ok(Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?)
    }

    /// Build the incremental query and its positional parameters
    fn build_query(&self, watermark: Decimal, labels: &AllowedLabels) -> Result<(String, Vec<Value>)> {
        let index_col = quote_ident(&self.columns.index);
        let label_col = quote_ident(&self.columns.label);

        let watermark = watermark_as_real(watermark)?;

        let mut sql = format!(
            "SELECT * FROM {} WHERE {} > ?1",
            quote_ident(&self.table),
            index_col
        );
        let mut values = vec![Value::Real(watermark)];

        if !labels.is_empty() {
            let clauses: Vec<String> = labels
                .iter()
                .enumerate()
                .map(|(i, _)| format!("{} = ?{} COLLATE NOCASE", label_col, i + 2))
                .collect();
            sql.push_str(&format!(" AND ({})", clauses.join(" OR ")));
            values.extend(labels.iter().map(|l| Value::Text(l.to_string())));
        }
        sql.push_str(&format!(" ORDER BY {}", index_col));

        Ok((sql, values))
    }
}

#[async_trait]
impl RowSource for SqliteRowSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_since(
        &self,
        watermark: Decimal,
        labels: &AllowedLabels,
    ) -> Result<Vec<SourceRow>> {
        let (sql, values) = self.build_query(watermark, labels)?;
        let path = self.path.clone();
        let name = self.name.clone();
        let columns = self.columns.clone();

        let rows = blocking(move || {
            let conn = Self::open(&path)?;
            let mut stmt = conn.prepare(&sql)?;
            let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

            let mut out = Vec::new();
            let mut rows = stmt.query(params_from_iter(values.iter()))?;
            while let Some(row) = rows.next()? {
                let mut cells = Vec::with_capacity(names.len());
                for (i, col) in names.iter().enumerate() {
                    cells.push((col.clone(), cell_from_ref(row.get_ref(i)?)));
                }
                out.push(SourceRow::new(name.as_str(), cells, &columns));
            }
            Ok(out)
        })
        .await?;

        debug!(source = %self.name, watermark = %watermark, rows = rows.len(), "Fetched rows");
        Ok(rows)
    }

    async fn test_connection(&self) -> Result<()> {
        let path = self.path.clone();
        blocking(move || {
            let conn = Self::open(&path)?;
            conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |r| r.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Sink
// ═══════════════════════════════════════════════════════════════════════════

/// Parameter sink over a local SQLite file
#[derive(Debug, Clone)]
pub struct SqliteSinkWriter {
    path: PathBuf,
    table: String,
}

impl SqliteSinkWriter {
    /// Open (creating if needed) the sink file and its table
    pub fn new(path: impl Into<PathBuf>, table: impl Into<String>) -> Result<Self> {
        let sink = Self {
            path: path.into(),
            table: table.into(),
        };
        let conn = Connection::open(&sink.path)?;
        sink.init_schema(&conn)?;
        Ok(sink)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_schema(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    supplier TEXT,
                    supplierName TEXT,
                    vehicleType TEXT,
                    partNumber TEXT NOT NULL,
                    partName TEXT,
                    variance TEXT,
                    station TEXT,
                    parameter TEXT NOT NULL,
                    value REAL NOT NULL,
                    lower_limit REAL,
                    upper_limit REAL,
                    inTime TEXT NOT NULL,
                    BTV TEXT
                )",
                quote_ident(&self.table)
            ),
            [],
        )?;
        Ok(())
    }

    fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {}
             (supplier, supplierName, vehicleType, partNumber, partName, variance, station,
              parameter, value, lower_limit, upper_limit, inTime, BTV)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, CURRENT_TIMESTAMP, ?12)",
            quote_ident(&self.table)
        )
    }
}

#[async_trait]
impl SinkWriter for SqliteSinkWriter {
    async fn write_batch(&self, records: &[ParameterRecord]) -> Result<BatchReport> {
        if records.is_empty() {
            return Ok(BatchReport::default());
        }

        let path = self.path.clone();
        let sql = self.insert_sql();
        let records = records.to_vec();

        blocking(move || {
            let mut conn = Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            let tx = conn.transaction()?;
            let mut report = BatchReport::default();
            {
                let mut stmt = tx.prepare(&sql)?;
                for record in &records {
                    if !record.has_part_number() {
                        warn!(parameter = %record.name, "Skipping record with empty part number");
                        report.skipped += 1;
                        continue;
                    }
                    stmt.execute(params![
                        &record.fixed.supplier,
                        &record.fixed.supplier_name,
                        &record.fixed.vehicle_type,
                        record.part_number.trim(),
                        &record.fixed.part_name,
                        &record.variance,
                        &record.fixed.station,
                        &record.name,
                        record.value,
                        record.lower_limit,
                        record.upper_limit,
                        &record.fixed.btv,
                    ])?;
                    report.inserted += 1;
                }
            }
            // dropping an uncommitted transaction rolls it back
            tx.commit()
                .map_err(|e| StorageError::transaction(format!("commit failed: {}", e)).with_source(e))?;
            Ok(report)
        })
        .await
    }

    async fn test_connection(&self) -> Result<()> {
        let path = self.path.clone();
        blocking(move || {
            let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_WRITE)?;
            conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FixedFields;
    use std::sync::Arc;

    fn seed_source(path: &Path, rows: &[(f64, &str, Option<f64>)]) {
        let conn = Connection::open(path).unwrap();
        conn.execute(
            "CREATE TABLE Data (Time_index REAL, Label_Name TEXT, Matrix_Code TEXT, Full REAL)",
            [],
        )
        .unwrap();
        for (index, label, full) in rows {
            conn.execute(
                "INSERT INTO Data (Time_index, Label_Name, Matrix_Code, Full) VALUES (?1, ?2, NULL, ?3)",
                params![index, label, full],
            )
            .unwrap();
        }
    }

    fn record(pn: &str, value: f64) -> ParameterRecord {
        ParameterRecord {
            name: "Full".to_string(),
            value,
            lower_limit: 68.5,
            upper_limit: 71.5,
            part_number: pn.to_string(),
            variance: "V".to_string(),
            fixed: Arc::new(FixedFields {
                supplier: "S01".to_string(),
                ..Default::default()
            }),
        }
    }

    fn count(path: &Path) -> i64 {
        Connection::open(path)
            .unwrap()
            .query_row("SELECT COUNT(*) FROM parameters", [], |r| r.get(0))
            .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_since_is_strict_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pass.db");
        seed_source(
            &path,
            &[(30.0, "A", Some(1.0)), (10.0, "A", None), (20.0, "A", Some(2.0))],
        );

        let source = SqliteRowSource::new("pass", &path, "Data", SourceColumns::default());
        let rows = source
            .fetch_since(Decimal::from(10), &AllowedLabels::default())
            .await
            .unwrap();

        let indexes: Vec<String> = rows.iter().map(|r| r.index().unwrap().to_string()).collect();
        assert_eq!(indexes, vec!["20", "30"]);
        assert_eq!(rows[0].origin(), "pass");
        assert_eq!(rows[0].get("Full"), Some(&CellValue::Real(2.0)));
        assert_eq!(rows[0].get("Matrix_Code"), Some(&CellValue::Null));
    }

    #[tokio::test]
    async fn test_fetch_since_label_filter_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fail.db");
        seed_source(
            &path,
            &[(1.0, "a1c6/bc316 t", None), (2.0, "OTHER", None), (3.0, "A1C6/BC316 T", None)],
        );

        let source = SqliteRowSource::new("fail", &path, "Data", SourceColumns::default());
        let rows = source
            .fetch_since(Decimal::ZERO, &AllowedLabels::new(["A1C6/BC316 T"]))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.label().eq_ignore_ascii_case("A1C6/BC316 T")));
    }

    #[tokio::test]
    async fn test_missing_source_file_is_connectivity_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = SqliteRowSource::new(
            "pass",
            dir.path().join("absent.db"),
            "Data",
            SourceColumns::default(),
        );

        let err = source
            .fetch_since(Decimal::ZERO, &AllowedLabels::default())
            .await
            .unwrap_err();
        assert!(err.is_connectivity());
        assert!(source.test_connection().await.is_err());
        // read-only open must not create the file
        assert!(!dir.path().join("absent.db").exists());
    }

    #[tokio::test]
    async fn test_sink_writes_and_skips_blank_part_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sink.db");
        let sink = SqliteSinkWriter::new(&path, "parameters").unwrap();

        let report = sink
            .write_batch(&[record("5QD919051T", 70.1), record("", 70.2)])
            .await
            .unwrap();
        assert_eq!(report, BatchReport { inserted: 1, skipped: 1 });
        assert_eq!(count(&path), 1);

        let (supplier, pn): (String, String) = Connection::open(&path)
            .unwrap()
            .query_row("SELECT supplier, partNumber FROM parameters", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(supplier, "S01");
        assert_eq!(pn, "5QD919051T");
    }

    #[tokio::test]
    async fn test_sink_batch_is_all_or_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sink.db");
        let sink = SqliteSinkWriter::new(&path, "parameters").unwrap();

        Connection::open(&path)
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_boom BEFORE INSERT ON parameters
                 WHEN NEW.partNumber = 'BOOM'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let err = sink
            .write_batch(&[record("PN1", 70.0), record("BOOM", 70.5)])
            .await;
        assert!(err.is_err());
        assert_eq!(count(&path), 0);
    }

    #[tokio::test]
    async fn test_sink_test_connection() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteSinkWriter::new(dir.path().join("sink.db"), "parameters").unwrap();
        assert!(sink.test_connection().await.is_ok());
    }

    #[tokio::test]
    async fn test_fractional_watermark_excludes_its_own_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pass.db");
        seed_source(&path, &[(45002.617898900004, "A", Some(70.0))]);

        let source = SqliteRowSource::new("pass", &path, "Data", SourceColumns::default());
        let first = source
            .fetch_since(Decimal::ZERO, &AllowedLabels::default())
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        let watermark = first[0].index().unwrap();
        assert_eq!(watermark.to_string(), "45002.617898900004");
        let again = source
            .fetch_since(watermark, &AllowedLabels::default())
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_watermark_binds_exact_double() {
        let source = SqliteRowSource::new("pass", "x.db", "Data", SourceColumns::default());
        for raw in [45002.617898900004_f64, 0.1, 3.0] {
            let index = CellValue::Real(raw).to_decimal().unwrap();
            let (_, values) = source.build_query(index, &AllowedLabels::default()).unwrap();
            assert_eq!(values[0], Value::Real(raw));
        }
    }

    #[test]
    fn test_build_query_with_labels() {
        let source = SqliteRowSource::new("pass", "x.db", "Data", SourceColumns::default());
        let (sql, values) = source
            .build_query(Decimal::from(5), &AllowedLabels::new(["A", "B"]))
            .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM \"Data\" WHERE \"Time_index\" > ?1 AND (\"Label_Name\" = ?2 COLLATE NOCASE OR \"Label_Name\" = ?3 COLLATE NOCASE) ORDER BY \"Time_index\""
        );
        assert_eq!(values.len(), 3);
    }
}
