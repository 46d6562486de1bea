//! MySQL Sink Adapter
//!
//! - Pooled connections (`MySqlPool`), created lazily so construction never
//!   blocks on the network
//! - One transaction per batch; any failed statement rolls the batch back
//! - Every batch bounded by the command timeout; an elapsed timeout is
//!   reported as a connectivity failure

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::{Connection, MySql, Transaction};
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::{BatchReport, ParameterRecord, SinkWriter};
use crate::error::{Result, StorageError};

/// TLS mode for the sink connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MySqlSslMode {
    Disabled,
    #[default]
    Preferred,
    Required,
    VerifyCa,
    VerifyIdentity,
}

impl MySqlSslMode {
    /// Lenient parse: case-insensitive, `-`/`_` ignored, unknown → `Preferred`
    pub fn parse_lenient(s: &str) -> Self {
        let norm: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        match norm.as_str() {
            "disabled" | "none" => Self::Disabled,
            "required" => Self::Required,
            "verifyca" => Self::VerifyCa,
            "verifyidentity" | "verifyfull" => Self::VerifyIdentity,
            _ => Self::Preferred,
        }
    }

    fn to_sqlx(self) -> sqlx::mysql::MySqlSslMode {
        use sqlx::mysql::MySqlSslMode as M;
        match self {
            Self::Disabled => M::Disabled,
            Self::Preferred => M::Preferred,
            Self::Required => M::Required,
            Self::VerifyCa => M::VerifyCa,
            Self::VerifyIdentity => M::VerifyIdentity,
        }
    }
}

/// Connection settings for `MySqlSinkWriter`
#[derive(Debug, Clone)]
pub struct MySqlSinkOptions {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Target table, optionally schema-qualified (`vw.parameters`)
    pub table: String,
    pub ssl_mode: MySqlSslMode,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

/// Quote a possibly schema-qualified MySQL identifier
fn quote_table(table: &str) -> String {
    table
        .split('.')
        .map(|part| format!("`{}`", part.replace('`', "``")))
        .collect::<Vec<_>>()
        .join(".")
}

pub struct MySqlSinkWriter {
    pool: MySqlPool,
    insert_sql: String,
    command_timeout: Duration,
}

impl MySqlSinkWriter {
    /// Build the writer; no connection is made until first use
    pub fn new(options: &MySqlSinkOptions) -> Result<Self> {
        let connect = MySqlConnectOptions::new()
            .host(&options.host)
            .port(options.port)
            .database(&options.database)
            .username(&options.username)
            .password(&options.password)
            .charset("utf8mb4")
            .ssl_mode(options.ssl_mode.to_sqlx());

        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .min_connections(0)
            .acquire_timeout(options.connect_timeout)
            .idle_timeout(Duration::from_secs(600))
            .connect_lazy_with(connect);

        Ok(Self {
            pool,
            insert_sql: Self::insert_sql(&options.table),
            command_timeout: options.command_timeout,
        })
    }

    fn insert_sql(table: &str) -> String {
        format!(
            "INSERT INTO {}
             (supplier, supplierName, vehicleType, partNumber, partName, variance, station,
              `parameter`, value, lower_limit, upper_limit, inTime, BTV)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NOW(), ?)",
            quote_table(table)
        )
    }

    /// Close the pool gracefully
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn insert_all(
        &self,
        tx: &mut Transaction<'_, MySql>,
        records: &[ParameterRecord],
    ) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        for record in records {
            if !record.has_part_number() {
                warn!(parameter = %record.name, "Skipping record with empty part number");
                report.skipped += 1;
                continue;
            }
            sqlx::query(&self.insert_sql)
                .bind(record.fixed.supplier.as_str())
                .bind(record.fixed.supplier_name.as_str())
                .bind(record.fixed.vehicle_type.as_str())
                .bind(record.part_number.trim())
                .bind(record.fixed.part_name.as_str())
                .bind(record.variance.as_str())
                .bind(record.fixed.station.as_str())
                .bind(record.name.as_str())
                .bind(record.value)
                .bind(record.lower_limit)
                .bind(record.upper_limit)
                .bind(record.fixed.btv.as_str())
                .execute(&mut **tx)
                .await?;
            report.inserted += 1;
        }
        Ok(report)
    }

    async fn write_in_transaction(&self, records: &[ParameterRecord]) -> Result<BatchReport> {
        let mut tx = self.pool.begin().await?;

        match self.insert_all(&mut tx, records).await {
            Ok(report) => {
                tx.commit().await.map_err(|e| {
                    StorageError::transaction(format!("commit failed: {}", e)).with_source(e)
                })?;
                Ok(report)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl SinkWriter for MySqlSinkWriter {
    async fn write_batch(&self, records: &[ParameterRecord]) -> Result<BatchReport> {
        if records.is_empty() {
            return Ok(BatchReport::default());
        }

        let report = tokio::time::timeout(self.command_timeout, self.write_in_transaction(records))
            .await
            .map_err(|_| {
                StorageError::connectivity(format!(
                    "MySQL batch timed out after {}s",
                    self.command_timeout.as_secs()
                ))
            })??;

        debug!(inserted = report.inserted, skipped = report.skipped, "MySQL batch committed");
        Ok(report)
    }

    async fn test_connection(&self) -> Result<()> {
        let ping = async {
            let mut conn = self.pool.acquire().await?;
            conn.ping().await?;
            Ok::<_, StorageError>(())
        };
        tokio::time::timeout(self.command_timeout, ping)
            .await
            .map_err(|_| StorageError::connectivity("MySQL ping timed out"))?
    }
}
