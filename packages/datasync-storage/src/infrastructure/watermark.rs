//! File-backed watermark store
//!
//! The whole file content is one culture-invariant decimal (`.` separator).
//! Reads also accept `,` grouping in the integer part (`1,234.5`), writes never
//! emit it. Writes go to a sibling temp file which is then renamed over the
//! target, so a reader never observes a half-written value.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::domain::WatermarkStore;
use crate::error::{Result, StorageError};

/// Parse persisted watermark text; `None` for blank or malformed content.
pub fn parse_watermark(text: &str) -> Option<Decimal> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Decimal::from_str(text).ok().or_else(|| parse_grouped(text))
}

/// `1,234.5` style input: commas only between integer digits
fn parse_grouped(text: &str) -> Option<Decimal> {
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (text, None),
    };
    let digits = int_part.trim_start_matches(['+', '-']);
    if !digits.contains(',') || digits.starts_with(',') || digits.ends_with(',') {
        return None;
    }
    if frac_part.is_some_and(|f| f.contains(',')) {
        return None;
    }

    let mut ungrouped = int_part.replace(',', "");
    if let Some(frac) = frac_part {
        ungrouped.push('.');
        ungrouped.push_str(frac);
    }
    Decimal::from_str(&ungrouped).ok()
}

/// Render a watermark for persistence (scale preserved, e.g. `12.50`).
pub fn format_watermark(value: Decimal) -> String {
    value.to_string()
}

pub struct FileWatermarkStore {
    path: PathBuf,
    /// Last value handed to `save`, durable or not
    intended: Mutex<Decimal>,
}

impl FileWatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            intended: Mutex::new(Decimal::ZERO),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_durable(&self) -> Decimal {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => parse_watermark(&content).unwrap_or_else(|| {
                if !content.trim().is_empty() {
                    warn!(
                        path = %self.path.display(),
                        content = %content.trim(),
                        "Unparseable watermark file, starting from 0"
                    );
                }
                Decimal::ZERO
            }),
            Err(e) if e.kind() == IoErrorKind::NotFound => Decimal::ZERO,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read watermark file");
                Decimal::ZERO
            }
        }
    }

    fn write_durable(&self, value: Decimal) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(format_watermark(value).as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| {
            StorageError::io(format!(
                "Failed to replace watermark file {}: {}",
                self.path.display(),
                e.error
            ))
            .with_source(e.error)
        })?;
        Ok(())
    }
}

impl WatermarkStore for FileWatermarkStore {
    fn load(&self) -> Decimal {
        let durable = self.read_durable();
        let intended = *self.intended.lock();
        durable.max(intended)
    }

    fn save(&self, value: Decimal) -> Result<()> {
        *self.intended.lock() = value;
        self.write_durable(value)?;
        debug!(path = %self.path.display(), watermark = %value, "Watermark persisted");
        Ok(())
    }
}
