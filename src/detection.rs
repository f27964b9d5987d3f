// 🔎 Identifier Type Detector
// Finds which column of a table holds a given identifier type by counting
// grammar matches per column and keeping the strict maximum.

use crate::config::CompiledConfig;
use crate::identifiers::{Grammars, IdentifierType, Normalizer};
use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedColumn {
    pub column: String,
    pub index: usize,
    /// Rows whose normalized value fits the grammar
    pub matches: usize,
    pub rows: usize,
}

pub struct TypeDetector {
    normalizer: Normalizer,
    grammars: Grammars,
    denylist: Vec<String>,
    deny_prefixes: Vec<String>,
    detectable: Vec<IdentifierType>,
}

impl TypeDetector {
    pub fn new(config: &CompiledConfig) -> Self {
        TypeDetector {
            normalizer: config.normalizer.clone(),
            grammars: config.grammars.clone(),
            denylist: config.config.detector_denylist.clone(),
            deny_prefixes: config.config.detector_deny_prefixes.clone(),
            detectable: config.config.detectable_types.clone(),
        }
    }

    fn is_denied(&self, column: &str) -> bool {
        let column = column.trim();
        self.denylist.iter().any(|d| d.trim() == column)
            || self
                .deny_prefixes
                .iter()
                .any(|p| !p.is_empty() && column.starts_with(p.as_str()))
    }

    /// Column holding `id_type`, or `None` when no cell anywhere matches
    pub fn detect(&self, table: &Table, id_type: IdentifierType) -> Option<DetectedColumn> {
        let mut best: Option<DetectedColumn> = None;

        for (index, column) in table.columns.iter().enumerate() {
            if self.is_denied(column) {
                debug!(table = %table.name, column = %column, "column excluded from detection");
                continue;
            }

            let matches = table
                .column_values(index)
                .filter_map(|cell| cell.and_then(|c| self.normalizer.normalize(c)))
                .filter(|value| self.grammars.matches(id_type, value))
                .count();

            let current = best.as_ref().map(|b| b.matches).unwrap_or(0);
            if matches > current {
                best = Some(DetectedColumn {
                    column: column.clone(),
                    index,
                    matches,
                    rows: table.len(),
                });
            }
        }

        match &best {
            Some(found) => info!(
                table = %table.name,
                identifier = %id_type,
                column = %found.column,
                "detected {} column: {} of {} rows match",
                id_type,
                found.matches,
                found.rows
            ),
            None => info!(table = %table.name, identifier = %id_type, "no {} column found", id_type),
        }

        best
    }

    /// One independent `detect` per configured detectable type
    pub fn detect_all(&self, table: &Table) -> BTreeMap<IdentifierType, Option<DetectedColumn>> {
        self.detect_types(table, &self.detectable)
    }

    pub fn detect_types(
        &self,
        table: &Table,
        types: &[IdentifierType],
    ) -> BTreeMap<IdentifierType, Option<DetectedColumn>> {
        types
            .iter()
            .map(|t| (*t, self.detect(table, *t)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn detector() -> TypeDetector {
        TypeDetector::new(&CompiledConfig::default())
    }

    fn isin_table() -> Table {
        let isins = [
            "US0378331005",
            "us5949181045",
            " IL0011234567 ",
            "GB0002634946",
            "US88160R1014",
            "DE0007164600",
            "FR0000120271",
            "not-a-code",
            "12345",
            "",
        ];
        let noise = [
            "alpha", "beta", "gamma", "delta", "epsilon", "zeta", "eta", "theta", "iota", "kappa",
        ];
        let mut table = Table::new("holdings", vec!["name".into(), "code".into(), "notes".into()]);
        for (i, isin) in isins.iter().enumerate() {
            table.push_row(vec![noise[i].to_uppercase(), isin.to_string(), noise[9 - i].to_string()]);
        }
        table
    }

    #[test]
    fn test_detects_majority_column() {
        let found = detector().detect(&isin_table(), IdentifierType::Isin).unwrap();
        assert_eq!(found.column, "code");
        assert_eq!(found.matches, 7);
        assert_eq!(found.rows, 10);
    }

    #[test]
    fn test_no_matches_is_absent() {
        let table = Table::from_rows("t", &["a", "b"], &[vec!["x", "y"], vec!["hello", "42"]]);
        assert!(detector().detect(&table, IdentifierType::Isin).is_none());
        assert!(detector().detect(&table, IdentifierType::Lei).is_none());
    }

    #[test]
    fn test_tie_keeps_first_column() {
        let table = Table::from_rows(
            "t",
            &["first", "second"],
            &[vec!["520000118", "520000126"], vec!["x", "y"]],
        );
        let found = detector()
            .detect(&table, IdentifierType::LocalCorporateNumber)
            .unwrap();
        assert_eq!(found.column, "first");
    }

    #[test]
    fn test_denylisted_column_is_skipped() {
        let mut config = EngineConfig::default();
        config.detector_deny_prefixes = vec!["first".to_string()];
        let detector = TypeDetector::new(&config.compile().unwrap());

        let table = Table::from_rows(
            "t",
            &["first_code", "second"],
            &[vec!["520000118", "520000126"], vec!["520000134", "x"]],
        );
        let found = detector
            .detect(&table, IdentifierType::LocalCorporateNumber)
            .unwrap();
        assert_eq!(found.column, "second");
    }

    #[test]
    fn test_detect_all_covers_detectable_types() {
        let all = detector().detect_all(&isin_table());
        assert_eq!(all.len(), 3);
        assert_eq!(all[&IdentifierType::Isin].as_ref().unwrap().column, "code");
        assert!(all[&IdentifierType::Lei].is_none());
    }
}
