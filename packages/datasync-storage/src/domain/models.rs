//! Domain models
//!
//! - `CellValue` / `SourceRow`: one row read from a tabular row source
//! - `AllowedLabels`: optional label allow-list (case-insensitive)
//! - `FixedFields` / `ParameterRecord`: one measurement ready for the sink

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// A single cell as read from a row source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Textual rendering, `None` for null and binary cells.
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Null | CellValue::Blob(_) => None,
            CellValue::Integer(i) => Some(i.to_string()),
            CellValue::Real(f) => Some(f.to_string()),
            CellValue::Text(s) => Some(s.clone()),
        }
    }

    /// Exact decimal view of the cell, used for the watermark index.
    ///
    /// Reals go through their shortest round-trip text so `1.1` stays `1.1`
    /// rather than the nearest binary expansion.
    pub fn to_decimal(&self) -> Option<Decimal> {
        match self {
            CellValue::Integer(i) => Some(Decimal::from(*i)),
            CellValue::Real(f) if f.is_finite() => Decimal::from_str(&f.to_string())
                .ok()
                .or_else(|| Decimal::try_from(*f).ok()),
            CellValue::Text(s) => {
                let s = s.trim();
                Decimal::from_str(s)
                    .ok()
                    .or_else(|| Decimal::from_scientific(s).ok())
            }
            _ => None,
        }
    }

    /// Numeric coercion for measurement values; non-finite results fail.
    pub fn to_f64(&self) -> Option<f64> {
        let value = match self {
            CellValue::Integer(i) => *i as f64,
            CellValue::Real(f) => *f,
            CellValue::Text(s) => s.trim().parse::<f64>().ok()?,
            CellValue::Null | CellValue::Blob(_) => return None,
        };
        value.is_finite().then_some(value)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<i64> for CellValue {
    fn from(i: i64) -> Self {
        CellValue::Integer(i)
    }
}

impl From<f64> for CellValue {
    fn from(f: f64) -> Self {
        CellValue::Real(f)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(CellValue::Null)
    }
}

/// Names of the columns a row source treats specially.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceColumns {
    /// Monotonic watermark key
    pub index: String,
    /// Row category used for allow-list filtering and part-number lookup
    pub label: String,
    /// Raw barcode text carrying a `#<part number>` marker
    pub matrix_code: String,
}

impl Default for SourceColumns {
    fn default() -> Self {
        Self {
            index: "Time_index".to_string(),
            label: "Label_Name".to_string(),
            matrix_code: "Matrix_Code".to_string(),
        }
    }
}

/// One row fetched from a row source.
///
/// Immutable once built; `index` and `label` are derived at construction.
///
/// # Examples
///
/// ```rust
/// use datasync_storage::domain::{CellValue, SourceColumns, SourceRow};
///
/// let row = SourceRow::new(
///     "pass",
///     vec![
///         ("Time_index".to_string(), CellValue::Integer(42)),
///         ("Label_Name".to_string(), CellValue::from("  A1C6/BC316 T ")),
///     ],
///     &SourceColumns::default(),
/// );
/// assert_eq!(row.index().unwrap().to_string(), "42");
/// assert_eq!(row.label(), "A1C6/BC316 T");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRow {
    origin: String,
    columns: Vec<(String, CellValue)>,
    index: Option<Decimal>,
    label: String,
}

impl SourceRow {
    pub fn new(
        origin: impl Into<String>,
        columns: Vec<(String, CellValue)>,
        names: &SourceColumns,
    ) -> Self {
        let index = lookup(&columns, &names.index).and_then(CellValue::to_decimal);
        let label = lookup(&columns, &names.label)
            .and_then(CellValue::as_text)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        Self {
            origin: origin.into(),
            columns,
            index,
            label,
        }
    }

    /// Name of the row source that produced this row
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Watermark key, `None` when absent or unparseable
    pub fn index(&self) -> Option<Decimal> {
        self.index
    }

    /// Index for ordering and watermark purposes; invalid indexes count as 0
    pub fn index_or_zero(&self) -> Decimal {
        self.index.unwrap_or(Decimal::ZERO)
    }

    /// Trimmed label, empty when absent
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Column value by name (exact match first, then ASCII case-insensitive)
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        lookup(&self.columns, column)
    }

    /// Non-null text of a column
    pub fn text(&self, column: &str) -> Option<String> {
        self.get(column).and_then(CellValue::as_text)
    }

    pub fn columns(&self) -> &[(String, CellValue)] {
        &self.columns
    }
}

fn lookup<'a>(columns: &'a [(String, CellValue)], name: &str) -> Option<&'a CellValue> {
    columns
        .iter()
        .find(|(k, _)| k == name)
        .or_else(|| columns.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)))
        .map(|(_, v)| v)
}

/// Ordered, case-insensitively de-duplicated label allow-list.
///
/// Empty means "accept every label".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedLabels {
    labels: Vec<String>,
}

impl AllowedLabels {
    /// Build from raw labels: trims, drops blanks, keeps the first spelling of
    /// each case-insensitive duplicate.
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for label in labels {
            let label = label.as_ref().trim();
            if label.is_empty() {
                continue;
            }
            if !out.iter().any(|l| eq_ignore_case(l, label)) {
                out.push(label.to_string());
            }
        }
        Self { labels: out }
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    /// True if the list is empty or contains `label` (case-insensitive)
    pub fn allows(&self, label: &str) -> bool {
        self.is_empty() || self.labels.iter().any(|l| eq_ignore_case(l, label))
    }
}

/// Unicode-aware case-insensitive comparison.
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b) || a.to_uppercase() == b.to_uppercase()
}

/// Descriptive columns written verbatim with every record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedFields {
    pub supplier: String,
    pub supplier_name: String,
    pub vehicle_type: String,
    pub part_name: String,
    pub station: String,
    pub btv: String,
}

/// One named measurement with its limits and provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRecord {
    pub name: String,
    pub value: f64,
    pub lower_limit: f64,
    pub upper_limit: f64,
    pub part_number: String,
    pub variance: String,
    pub fixed: Arc<FixedFields>,
}

impl ParameterRecord {
    /// Records with a blank part number must never reach the sink.
    pub fn has_part_number(&self) -> bool {
        !self.part_number.trim().is_empty()
    }
}
