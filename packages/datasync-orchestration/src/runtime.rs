//! Runtime wiring
//!
//! Builds collaborators from `SyncConfig`, runs the startup connectivity
//! checks and hands out the scheduler.

use datasync_storage::{
    FileWatermarkStore, MySqlSinkWriter, RowSource, SinkWriter, SqliteRowSource,
    SqliteSinkWriter, WatermarkStore,
};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{SinkConfig, SyncConfig};
use crate::engine::{CycleReport, SyncEngine};
use crate::error::{Result, SyncError};
use crate::extractor::ParameterExtractor;
use crate::scheduler::CycleScheduler;

/// Reachability of every collaborator
#[derive(Debug, Clone, Default)]
pub struct ConnectivityReport {
    /// (source name, error message if unreachable)
    pub sources: Vec<(String, Option<String>)>,
    pub sink: Option<String>,
}

impl ConnectivityReport {
    pub fn all_ok(&self) -> bool {
        self.sink.is_none() && self.sources.iter().all(|(_, e)| e.is_none())
    }
}

pub fn build_sources(config: &SyncConfig) -> Vec<Arc<dyn RowSource>> {
    config
        .sources
        .iter()
        .map(|s| {
            Arc::new(SqliteRowSource::new(
                s.name.clone(),
                s.path.clone(),
                s.table.clone(),
                config.sync.columns.clone(),
            )) as Arc<dyn RowSource>
        })
        .collect()
}

pub fn build_sink(config: &SyncConfig) -> Result<Arc<dyn SinkWriter>> {
    let sink: Arc<dyn SinkWriter> = match &config.sink {
        SinkConfig::Mysql(m) => Arc::new(MySqlSinkWriter::new(&m.to_options())?),
        SinkConfig::Sqlite(s) => Arc::new(SqliteSinkWriter::new(s.path.clone(), s.table.clone())?),
    };
    Ok(sink)
}

pub struct Runtime {
    config: Arc<SyncConfig>,
    engine: Arc<SyncEngine>,
}

impl Runtime {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let watermark: Arc<dyn WatermarkStore> =
            Arc::new(FileWatermarkStore::new(config.sync.watermark_file.clone()));
        Self::with_watermark(config, watermark)
    }

    /// Same as `new` with a caller-supplied watermark store
    pub fn with_watermark(config: SyncConfig, watermark: Arc<dyn WatermarkStore>) -> Result<Self> {
        let engine = SyncEngine::new(
            ParameterExtractor::from_config(&config),
            build_sources(&config),
            build_sink(&config)?,
            watermark,
        );
        Ok(Self {
            config: Arc::new(config),
            engine: Arc::new(engine),
        })
    }

    pub fn config(&self) -> &Arc<SyncConfig> {
        &self.config
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Test every collaborator without failing on the first error
    pub async fn check_connectivity(&self) -> ConnectivityReport {
        let mut report = ConnectivityReport::default();
        for source in self.engine.sources() {
            let outcome = source.test_connection().await.err().map(|e| e.to_string());
            report.sources.push((source.name().to_string(), outcome));
        }
        report.sink = self
            .engine
            .sink()
            .test_connection()
            .await
            .err()
            .map(|e| e.to_string());
        report
    }

    /// Log the starting state and check collaborators.
    ///
    /// Unreachable sources only warn; an unreachable sink is fatal.
    pub async fn startup(&self) -> Result<()> {
        info!(watermark = %self.engine.watermark(), "Loaded watermark");
        let labels = self.engine.extractor().allowed_labels();
        if labels.is_empty() {
            info!("No label filter; all labels are synchronized");
        } else {
            info!(labels = ?labels.iter().collect::<Vec<_>>(), "Label allow-list");
        }

        let report = self.check_connectivity().await;
        for (name, outcome) in &report.sources {
            match outcome {
                None => info!(source = %name, "Row source reachable"),
                Some(e) => warn!(source = %name, error = %e, "Row source unreachable; will retry each cycle"),
            }
        }
        if let Some(e) = report.sink {
            error!(error = %e, "Sink unreachable");
            return Err(SyncError::sink_unavailable(e));
        }
        info!("Sink reachable");
        Ok(())
    }

    pub async fn run_once(&self) -> CycleReport {
        self.engine.run_cycle().await
    }

    pub fn scheduler(&self) -> CycleScheduler<SyncEngine> {
        CycleScheduler::new(Arc::clone(&self.engine))
    }

    /// Run the periodic scheduler until `shutdown` resolves
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        self.scheduler()
            .run_until(self.config.sync.interval(), shutdown)
            .await;
    }
}
