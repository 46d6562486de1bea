//! Parameter Extractor
//!
//! Maps one `SourceRow` to 0..=10 `ParameterRecord`s. Pure: the result
//! depends only on the row and the configuration captured at construction.
//!
//! Steps (each may drop the row):
//! 1. Label allow-list check (case-insensitive, empty list accepts all)
//! 2. Part-number resolution chain (see `part_number`)
//! 3. One record per field of `PARAMETER_FIELDS` whose column is present,
//!    non-null and numeric. Bad fields are skipped individually.

pub mod fields;
pub mod part_number;

pub use fields::{ParameterField, PARAMETER_FIELDS};
pub use part_number::{
    extract_matrix_part_number, DefaultLabelResolver, LabelMapResolver, MatrixCodeResolver,
    PartNumberMap, PartNumberResolver, ResolverChain,
};

use datasync_storage::{AllowedLabels, FixedFields, ParameterRecord, SourceRow};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

use crate::config::SyncConfig;

/// Why a row produced no records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    LabelNotAllowed,
    MissingPartNumber,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::LabelNotAllowed => "label not allowed",
            DropReason::MissingPartNumber => "no part number",
        }
    }
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub struct ParameterExtractor {
    allowed: AllowedLabels,
    resolvers: ResolverChain,
    fixed: Arc<FixedFields>,
    variance: BTreeMap<String, String>,
    fields: &'static [ParameterField],
}

impl ParameterExtractor {
    pub fn new(
        allowed: AllowedLabels,
        resolvers: ResolverChain,
        fixed: FixedFields,
        variance: BTreeMap<String, String>,
    ) -> Self {
        Self {
            allowed,
            resolvers,
            fixed: Arc::new(fixed),
            variance,
            fields: &PARAMETER_FIELDS,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        let sync = &config.sync;
        let resolvers = ResolverChain::standard(
            PartNumberMap::from(&sync.part_number_by_label_name),
            &sync.label_name,
            &sync.columns.matrix_code,
        );
        Self::new(
            sync.allowed_labels(),
            resolvers,
            config.fixed_fields.clone(),
            config.variance.clone(),
        )
    }

    pub fn allowed_labels(&self) -> &AllowedLabels {
        &self.allowed
    }

    /// Records for `row`, or the reason it was dropped.
    ///
    /// `Ok` with an empty vec means the row passed the checks but carried no
    /// usable measurement.
    pub fn evaluate(&self, row: &SourceRow) -> Result<Vec<ParameterRecord>, DropReason> {
        if !self.allowed.allows(row.label()) {
            return Err(DropReason::LabelNotAllowed);
        }

        let (resolver, part_number) = self
            .resolvers
            .resolve(row)
            .ok_or(DropReason::MissingPartNumber)?;
        trace!(resolver, part_number = %part_number, "Part number resolved");

        let records = self
            .fields
            .iter()
            .filter_map(|field| {
                let value = row.get(field.column)?.to_f64()?;
                Some(ParameterRecord {
                    name: field.name.to_string(),
                    value,
                    lower_limit: field.lower_limit,
                    upper_limit: field.upper_limit,
                    part_number: part_number.clone(),
                    variance: self.variance.get(field.name).cloned().unwrap_or_default(),
                    fixed: Arc::clone(&self.fixed),
                })
            })
            .collect();

        Ok(records)
    }

    /// Records for `row`; dropped rows yield an empty vec.
    pub fn extract(&self, row: &SourceRow) -> Vec<ParameterRecord> {
        self.evaluate(row).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datasync_storage::{CellValue, SourceColumns};

    fn extractor(pairs: &[(&str, &str)], default_label: &str) -> ParameterExtractor {
        let map = PartNumberMap::new(pairs.iter().copied());
        let allowed = if map.is_empty() {
            AllowedLabels::new([default_label])
        } else {
            AllowedLabels::new(pairs.iter().map(|(k, _)| *k))
        };
        let mut variance = BTreeMap::new();
        variance.insert("Full".to_string(), "V-FULL".to_string());
        ParameterExtractor::new(
            allowed,
            ResolverChain::standard(map, default_label, "Matrix_Code"),
            FixedFields {
                supplier: "S01".to_string(),
                ..Default::default()
            },
            variance,
        )
    }

    fn full_row(label: &str) -> Vec<(String, CellValue)> {
        let mut cols = vec![
            ("Time_index".to_string(), CellValue::Integer(10)),
            ("Label_Name".to_string(), CellValue::from(label)),
        ];
        for (i, f) in PARAMETER_FIELDS.iter().enumerate() {
            cols.push((f.column.to_string(), CellValue::Real(i as f64 + 0.5)));
        }
        cols
    }

    fn row(cols: Vec<(String, CellValue)>) -> SourceRow {
        SourceRow::new("pass", cols, &SourceColumns::default())
    }

    #[test]
    fn test_full_row_yields_ten_records_in_table_order() {
        let ex = extractor(&[("A", "PN-A")], "");
        let records = ex.extract(&row(full_row("A")));

        assert_eq!(records.len(), 10);
        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        let expected: Vec<_> = PARAMETER_FIELDS.iter().map(|f| f.name).collect();
        assert_eq!(names, expected);

        let leak = &records[7];
        assert_eq!(leak.name, "泄露");
        assert_eq!(leak.value, 7.5);
        assert_eq!(leak.lower_limit, -0.14);
        assert_eq!(leak.upper_limit, 0.35);
        assert_eq!(leak.part_number, "PN-A");
        assert_eq!(leak.variance, "");
        assert_eq!(leak.fixed.supplier, "S01");

        assert_eq!(records[9].variance, "V-FULL");
    }

    #[test]
    fn test_label_filtering_case_insensitive() {
        let ex = extractor(&[("A", "PN-A")], "");
        assert_eq!(ex.extract(&row(full_row("a"))).len(), 10);
        assert_eq!(
            ex.evaluate(&row(full_row("B"))),
            Err(DropReason::LabelNotAllowed)
        );
        assert_eq!(
            ex.evaluate(&row(full_row(""))),
            Err(DropReason::LabelNotAllowed)
        );
    }

    #[test]
    fn test_empty_allow_list_accepts_all() {
        let ex = extractor(&[], "");
        let mut cols = full_row("anything");
        cols.push(("Matrix_Code".to_string(), CellValue::from("#PN77 x")));
        let records = ex.extract(&row(cols));
        assert_eq!(records.len(), 10);
        assert_eq!(records[0].part_number, "PN77");
    }

    #[test]
    fn test_map_takes_priority_over_matrix() {
        let ex = extractor(&[("A", "X")], "");
        let mut cols = full_row("A");
        cols.push(("Matrix_Code".to_string(), CellValue::from("#Y")));
        assert!(ex.extract(&row(cols)).iter().all(|r| r.part_number == "X"));
    }

    #[test]
    fn test_matrix_fallback() {
        let ex = extractor(&[("A", "")], "");
        let mut cols = full_row("A");
        cols.push((
            "Matrix_Code".to_string(),
            CellValue::from("#5QD919051T    ###*539 M2G1JJP8252*="),
        ));
        let records = ex.extract(&row(cols));
        assert_eq!(records.len(), 10);
        assert!(records.iter().all(|r| r.part_number == "5QD919051T"));
    }

    #[test]
    fn test_drop_on_empty_part_number() {
        let ex = extractor(&[("A", "")], "");
        let mut cols = full_row("A");
        cols.push(("Matrix_Code".to_string(), CellValue::from("no marker")));
        assert_eq!(ex.evaluate(&row(cols)), Err(DropReason::MissingPartNumber));
        assert!(ex.extract(&row(full_row("A"))).is_empty());
    }

    #[test]
    fn test_per_field_independence() {
        let ex = extractor(&[("A", "PN-A")], "");
        let cols: Vec<_> = full_row("A")
            .into_iter()
            .filter(|(k, _)| k != "Current")
            .map(|(k, v)| match k.as_str() {
                "Full" => (k, CellValue::from("n/a")),
                "1_2" => (k, CellValue::Null),
                "Reserve" => (k, CellValue::from(" 240.1 ")),
                _ => (k, v),
            })
            .collect();

        let records = ex.extract(&row(cols));
        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(records.len(), 7);
        assert!(!names.contains(&"空载电流"));
        assert!(!names.contains(&"Full"));
        assert!(!names.contains(&"1/2"));
        assert_eq!(records[0].value, 240.1);
    }

    #[test]
    fn test_row_without_measurements_passes_with_no_records() {
        let ex = extractor(&[("A", "PN-A")], "");
        let r = row(vec![("Label_Name".to_string(), CellValue::from("A"))]);
        assert_eq!(ex.evaluate(&r), Ok(vec![]));
    }
}
