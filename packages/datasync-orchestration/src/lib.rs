/*
 * Datasync Orchestration - Incremental Sync Engine
 *
 * Pulls newly appended rows from N row sources, turns each row into
 * parameter records and appends them to a relational sink.
 *
 * Architecture:
 * - Watermark-driven change detection (decimal, never regresses)
 * - Parameter extraction with a part-number fallback chain
 * - Best-effort per-row accounting, sink outages stop the cycle
 * - Single-flight scheduler (busy triggers are dropped, never queued)
 */

// Public modules
pub mod config;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod logging;
pub mod runtime;
pub mod scheduler;

// Re-exports
pub use config::{ConfigError, SinkConfig, SourceConfig, SyncConfig, SyncSettings};
pub use engine::{CycleFailure, CycleReport, SyncEngine};
pub use error::{FailureScope, Result, SyncError};
pub use extractor::{
    extract_matrix_part_number, DropReason, ParameterExtractor, PartNumberMap, ResolverChain,
    PARAMETER_FIELDS,
};
pub use runtime::{ConnectivityReport, Runtime};
pub use scheduler::{CycleRunner, CycleScheduler, TriggerOutcome};
