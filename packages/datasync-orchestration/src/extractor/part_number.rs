//! Part-number resolution chain
//!
//! Resolvers are tried in order and the first non-empty answer wins:
//!
//! 1. `LabelMapResolver`: row label looked up in the label → part-number map
//! 2. `MatrixCodeResolver`: `#<PART>` marker parsed out of the barcode text
//! 3. `DefaultLabelResolver`: configured default label looked up in the map

use datasync_storage::domain::eq_ignore_case;
use datasync_storage::SourceRow;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

/// `#`, optional whitespace, then upper-case letters and digits
static MATRIX_PART_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#\s*([A-Z0-9]+)").expect("static pattern"));

/// Pull the part number out of raw matrix/barcode text (first match).
///
/// ```rust
/// use datasync_orchestration::extractor::extract_matrix_part_number;
///
/// assert_eq!(
///     extract_matrix_part_number("#5QD919051T    ###*539 M2G1JJP8252*="),
///     Some("5QD919051T".to_string())
/// );
/// assert_eq!(extract_matrix_part_number("no marker"), None);
/// ```
pub fn extract_matrix_part_number(text: &str) -> Option<String> {
    MATRIX_PART_NUMBER
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Label → part number, case-insensitive on the label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartNumberMap {
    entries: Vec<(String, String)>,
}

impl PartNumberMap {
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let entries = pairs
            .into_iter()
            .map(|(k, v)| (k.as_ref().trim().to_string(), v.as_ref().trim().to_string()))
            .filter(|(k, _)| !k.is_empty())
            .collect();
        Self { entries }
    }

    /// Non-empty part number for `label`, if mapped
    pub fn get(&self, label: &str) -> Option<&str> {
        let label = label.trim();
        if label.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|(k, _)| k == label)
            .or_else(|| self.entries.iter().find(|(k, _)| eq_ignore_case(k, label)))
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<&IndexMap<String, String>> for PartNumberMap {
    fn from(map: &IndexMap<String, String>) -> Self {
        Self::new(map.iter())
    }
}

/// One step of the fallback chain
pub trait PartNumberResolver: Send + Sync {
    /// Short name used in debug logs
    fn name(&self) -> &'static str;

    /// Non-empty, trimmed part number or `None`
    fn resolve(&self, row: &SourceRow) -> Option<String>;
}

pub struct LabelMapResolver {
    map: Arc<PartNumberMap>,
}

impl LabelMapResolver {
    pub fn new(map: Arc<PartNumberMap>) -> Self {
        Self { map }
    }
}

impl PartNumberResolver for LabelMapResolver {
    fn name(&self) -> &'static str {
        "label_map"
    }

    fn resolve(&self, row: &SourceRow) -> Option<String> {
        self.map.get(row.label()).map(str::to_string)
    }
}

pub struct MatrixCodeResolver {
    column: String,
}

impl MatrixCodeResolver {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }
}

impl PartNumberResolver for MatrixCodeResolver {
    fn name(&self) -> &'static str {
        "matrix_code"
    }

    fn resolve(&self, row: &SourceRow) -> Option<String> {
        row.text(&self.column)
            .and_then(|text| extract_matrix_part_number(&text))
    }
}

pub struct DefaultLabelResolver {
    label: String,
    map: Arc<PartNumberMap>,
}

impl DefaultLabelResolver {
    pub fn new(label: impl Into<String>, map: Arc<PartNumberMap>) -> Self {
        Self {
            label: label.into(),
            map,
        }
    }
}

impl PartNumberResolver for DefaultLabelResolver {
    fn name(&self) -> &'static str {
        "default_label"
    }

    fn resolve(&self, _row: &SourceRow) -> Option<String> {
        self.map.get(&self.label).map(str::to_string)
    }
}

/// Ordered resolvers; first non-empty result wins
pub struct ResolverChain {
    resolvers: Vec<Box<dyn PartNumberResolver>>,
}

impl ResolverChain {
    pub fn new(resolvers: Vec<Box<dyn PartNumberResolver>>) -> Self {
        Self { resolvers }
    }

    /// label map → matrix code → default label
    pub fn standard(map: PartNumberMap, default_label: &str, matrix_column: &str) -> Self {
        let map = Arc::new(map);
        Self::new(vec![
            Box::new(LabelMapResolver::new(map.clone())),
            Box::new(MatrixCodeResolver::new(matrix_column)),
            Box::new(DefaultLabelResolver::new(default_label, map)),
        ])
    }

    /// Resolved part number and the name of the resolver that produced it
    pub fn resolve(&self, row: &SourceRow) -> Option<(&'static str, String)> {
        self.resolvers.iter().find_map(|r| {
            r.resolve(row)
                .map(|pn| pn.trim().to_string())
                .filter(|pn| !pn.is_empty())
                .map(|pn| (r.name(), pn))
        })
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}
