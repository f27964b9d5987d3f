// 📄 Holding Records
// Typed view over a position table: identifiers, signals and matches live
// on the record; the source row is carried along for output.

use crate::config::CompiledConfig;
use crate::detection::TypeDetector;
use crate::error::{EngineError, Result};
use crate::identifiers::{IdentifierSet, IdentifierType, Identified};
use crate::matching::{NameMatch, TickerMatch};
use crate::propagation::Classified;
use crate::signals::{parse_flag, SignalSet, SignalSource};
use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

// ============================================================================
// SCHEMA
// ============================================================================

/// Column names of the holding table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HoldingSchema {
    pub name_column: String,
    pub ticker_column: Option<String>,
    pub holding_type_column: Option<String>,
    pub value_column: Option<String>,
    pub owner_column: Option<String>,
    pub period_column: Option<String>,

    /// Explicit identifier columns; anything else is found by header name
    /// or by the type detector
    pub identifier_columns: BTreeMap<IdentifierType, String>,
}

impl Default for HoldingSchema {
    fn default() -> Self {
        HoldingSchema {
            name_column: "name".to_string(),
            ticker_column: Some("ticker".to_string()),
            holding_type_column: Some("holding_type".to_string()),
            value_column: Some("value".to_string()),
            owner_column: Some("owner".to_string()),
            period_column: Some("period".to_string()),
            identifier_columns: BTreeMap::new(),
        }
    }
}

// ============================================================================
// HOLDING
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    /// Zero-based row in the source table
    pub row: usize,
    pub instrument_name: Option<String>,
    /// Instrument name with any trailing ticker section cut off
    pub company_name: Option<String>,
    pub ticker: Option<String>,
    pub holding_type: Option<String>,
    pub value: Option<f64>,
    pub owner: Option<String>,
    pub period: Option<String>,

    pub identifiers: IdentifierSet,
    pub signals: SignalSet,
    pub ticker_match: Option<TickerMatch>,
    pub name_match: Option<NameMatch>,

    /// 1.0 / 0.0 after consolidation; fractional after propagation
    pub is_fossil: Option<f64>,
    pub is_fossil_conflict: bool,

    #[serde(skip)]
    pub cells: Vec<Option<String>>,
}

impl Holding {
    pub fn new(row: usize, instrument_name: &str) -> Self {
        Holding {
            row,
            instrument_name: Some(instrument_name.to_string()),
            company_name: Some(instrument_name.to_string()),
            ..Default::default()
        }
    }

    /// Listed on the local exchange
    pub fn is_local(&self) -> bool {
        self.identifiers.contains(IdentifierType::LocalSecurityNumber)
    }

    /// Name used for matching: the cut company name, else the raw one
    pub fn match_name(&self) -> Option<&str> {
        self.company_name
            .as_deref()
            .or(self.instrument_name.as_deref())
    }
}

impl Identified for Holding {
    fn identifiers(&self) -> &IdentifierSet {
        &self.identifiers
    }

    fn identifiers_mut(&mut self) -> &mut IdentifierSet {
        &mut self.identifiers
    }
}

impl Classified for Holding {
    fn classification(&self) -> Option<f64> {
        self.is_fossil
    }

    fn set_classification(&mut self, value: f64) {
        self.is_fossil = Some(value);
    }
}

/// Monetary cells: thousands separators and currency symbols are ignored
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

// ============================================================================
// HOLDINGS
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Holdings {
    pub table_name: String,
    /// Source columns, in source order
    pub columns: Vec<String>,
    /// Identifier type -> source column it was read from
    pub bindings: BTreeMap<IdentifierType, String>,
    pub records: Vec<Holding>,
}

impl Holdings {
    pub fn from_records(records: Vec<Holding>) -> Self {
        Holdings {
            table_name: "holdings".to_string(),
            records,
            ..Default::default()
        }
    }

    /// Read records from a holding table
    ///
    /// The name column is required. Identifier columns come from the
    /// schema, then from headers equal to an identifier's output name,
    /// then from grammar detection. Signal columns already present in the
    /// table (`is_fossil_<source>`) are read as pre-seeded signals.
    pub fn from_table(table: &Table, schema: &HoldingSchema, config: &CompiledConfig) -> Result<Self> {
        let name_col = table.column_index(&schema.name_column).ok_or_else(|| {
            EngineError::malformed(
                &table.name,
                format!("holding name column '{}' not found", schema.name_column),
            )
        })?;

        let optional = |column: &Option<String>| column.as_deref().and_then(|c| table.column_index(c));
        let ticker_col = optional(&schema.ticker_column);
        let type_col = optional(&schema.holding_type_column);
        let value_col = optional(&schema.value_column);
        let owner_col = optional(&schema.owner_column);
        let period_col = optional(&schema.period_column);

        let bindings = bind_identifier_columns(table, schema, config)?;

        // Own-grammar slots are filled before fallback slots are offered
        let mut ordered: Vec<(IdentifierType, usize)> = bindings.values().copied().collect();
        ordered.sort_by_key(|(t, _)| t.fallback().is_some());

        let seeded: Vec<(SignalSource, usize)> = SignalSource::ALL
            .iter()
            .filter_map(|s| table.column_index(s.column_name()).map(|c| (*s, c)))
            .collect();

        let text = |row: usize, col: Option<usize>| {
            col.and_then(|c| table.cell(row, c))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut records = Vec::with_capacity(table.len());
        for row in 0..table.len() {
            let mut identifiers = IdentifierSet::new();
            for (id_type, col) in &ordered {
                if let Some(raw) = table.cell(row, *col) {
                    identifiers.assign(*id_type, raw, &config.normalizer, &config.grammars);
                }
            }

            let mut signals = SignalSet::new();
            for (source, col) in &seeded {
                if let Some(flag) = table.cell(row, *col).and_then(parse_flag) {
                    signals.record(*source, Some(flag));
                }
            }

            let instrument_name = text(row, Some(name_col));
            records.push(Holding {
                row,
                company_name: instrument_name.clone(),
                instrument_name,
                ticker: text(row, ticker_col),
                holding_type: text(row, type_col),
                value: text(row, value_col).as_deref().and_then(parse_amount),
                owner: text(row, owner_col),
                period: text(row, period_col),
                identifiers,
                signals,
                cells: table.rows[row].clone(),
                ..Default::default()
            });
        }

        if !seeded.is_empty() {
            info!("{} pre-seeded signal columns read", seeded.len());
        }

        Ok(Holdings {
            table_name: table.name.clone(),
            columns: table.columns.clone(),
            bindings: bindings
                .into_iter()
                .map(|(t, (_, c))| (t, table.columns[c].clone()))
                .collect(),
            records,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Source columns followed by identifier, signal, match and result columns
    pub fn to_table(&self) -> Table {
        let mut table = Table::new(self.table_name.clone(), self.columns.clone());
        for holding in &self.records {
            let mut cells = holding.cells.clone();
            cells.resize(self.columns.len(), None);
            table.rows.push(cells);
        }

        let put = |table: &mut Table, column: &str, values: Vec<Option<String>>| {
            let col = table.ensure_column(column);
            for (row, value) in values.into_iter().enumerate() {
                table.set_cell(row, col, value);
            }
        };

        for id_type in IdentifierType::ALL {
            let values = self
                .records
                .iter()
                .map(|h| h.identifiers.get(id_type).map(str::to_string))
                .collect();
            put(&mut table, id_type.column_name(), values);
        }

        put(
            &mut table,
            "company_name",
            self.records.iter().map(|h| h.company_name.clone()).collect(),
        );

        for source in SignalSource::ALL {
            let values = self
                .records
                .iter()
                .map(|h| h.signals.get(source).map(flag_text))
                .collect();
            put(&mut table, source.column_name(), values);
        }

        put(
            &mut table,
            "ticker_match_company",
            self.records
                .iter()
                .map(|h| h.ticker_match.as_ref().map(|m| m.company.clone()))
                .collect(),
        );
        put(
            &mut table,
            "ticker_match_score",
            self.records
                .iter()
                .map(|h| h.ticker_match.as_ref().and_then(|m| m.score).map(score_text))
                .collect(),
        );
        put(
            &mut table,
            "name_match_company",
            self.records
                .iter()
                .map(|h| h.name_match.as_ref().map(|m| m.company.clone()))
                .collect(),
        );
        put(
            &mut table,
            "name_match_score",
            self.records
                .iter()
                .map(|h| h.name_match.as_ref().map(|m| score_text(m.score)))
                .collect(),
        );
        put(
            &mut table,
            "is_fossil",
            self.records
                .iter()
                .map(|h| h.is_fossil.map(classification_text))
                .collect(),
        );
        put(
            &mut table,
            "is_fossil_conflict",
            self.records
                .iter()
                .map(|h| Some(h.is_fossil_conflict.to_string()))
                .collect(),
        );

        table
    }
}

fn bind_identifier_columns(
    table: &Table,
    schema: &HoldingSchema,
    config: &CompiledConfig,
) -> Result<BTreeMap<IdentifierType, (IdentifierType, usize)>> {
    let mut bindings = BTreeMap::new();

    for (id_type, column) in &schema.identifier_columns {
        let col = table.column_index(column).ok_or_else(|| {
            EngineError::malformed(
                &table.name,
                format!("{} column '{}' not found", id_type, column),
            )
        })?;
        bindings.insert(*id_type, (*id_type, col));
    }

    for id_type in IdentifierType::ALL {
        if bindings.contains_key(&id_type) {
            continue;
        }
        if let Some(col) = table.column_index(id_type.column_name()) {
            bindings.insert(id_type, (id_type, col));
        }
    }

    let detector = TypeDetector::new(config);
    let taken: Vec<usize> = bindings.values().map(|(_, c)| *c).collect();
    for (id_type, found) in detector.detect_all(table) {
        if bindings.contains_key(&id_type) {
            continue;
        }
        match found {
            Some(found) if !taken.contains(&found.index) => {
                bindings.insert(id_type, (id_type, found.index));
            }
            Some(_) => {}
            None => warn!(table = %table.name, "no {} column found", id_type),
        }
    }

    Ok(bindings)
}

fn flag_text(value: bool) -> String {
    let text = if value { "1" } else { "0" };
    text.to_string()
}

fn score_text(score: f64) -> String {
    format!("{:.1}", score)
}

fn classification_text(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.3}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holdings_table() -> Table {
        Table::from_rows(
            "holdings",
            &["name", "ticker", "holding_type", "value", "Security Code", "issuer_num", "is_fossil_local_list_issuer"],
            &[
                vec!["Apple Inc", "AAPL", "equity", "1,250.50", "US0378331005", "", ""],
                vec!["Delek Group", "DLEKG", "equity", "300", "1084128", "1095", "1"],
                vec!["Cash", "", "cash", "10", "0", "", ""],
                vec!["Aker BP", "AKERBP", "bond", "99", "NO0010345853", "", "n/a"],
                vec!["Bank Leumi", "", "equity", "5", "604611", "", ""],
            ],
        )
    }

    #[test]
    fn test_from_table_reads_fields() {
        let holdings =
            Holdings::from_table(&holdings_table(), &HoldingSchema::default(), &CompiledConfig::default()).unwrap();

        assert_eq!(holdings.len(), 5);
        assert_eq!(holdings.bindings.get(&IdentifierType::Isin).map(String::as_str), Some("Security Code"));
        assert_eq!(
            holdings.bindings.get(&IdentifierType::LocalIssuerNumber).map(String::as_str),
            Some("issuer_num")
        );

        let apple = &holdings.records[0];
        assert_eq!(apple.identifiers.get(IdentifierType::Isin), Some("US0378331005"));
        assert_eq!(apple.value, Some(1250.5));
        assert!(!apple.is_local());

        let delek = &holdings.records[1];
        assert_eq!(delek.identifiers.get(IdentifierType::LocalSecurityNumber), Some("1084128"));
        assert_eq!(delek.identifiers.get(IdentifierType::LocalIssuerNumber), Some("1095"));
        assert_eq!(delek.signals.get(SignalSource::LocalListIssuer), Some(true));
        assert!(delek.is_local());

        assert!(holdings.records[2].identifiers.is_empty());
        assert!(holdings.records[3].signals.is_empty());
    }

    #[test]
    fn test_digit_code_in_isin_column_is_local() {
        let holdings =
            Holdings::from_table(&holdings_table(), &HoldingSchema::default(), &CompiledConfig::default()).unwrap();

        let leumi = &holdings.records[4];
        assert_eq!(leumi.identifiers.get(IdentifierType::Isin), None);
        assert_eq!(leumi.identifiers.get(IdentifierType::LocalSecurityNumber), Some("604611"));
        assert!(leumi.is_local());
    }

    #[test]
    fn test_missing_name_column_is_malformed() {
        let table = Table::from_rows("holdings", &["isin"], &[vec!["US0378331005"]]);
        let err = Holdings::from_table(&table, &HoldingSchema::default(), &CompiledConfig::default()).unwrap_err();
        assert!(matches!(err, EngineError::MalformedInput { .. }));
    }

    #[test]
    fn test_explicit_binding_must_exist() {
        let mut schema = HoldingSchema::default();
        schema
            .identifier_columns
            .insert(IdentifierType::Lei, "LEI code".to_string());
        let err = Holdings::from_table(&holdings_table(), &schema, &CompiledConfig::default()).unwrap_err();
        assert!(matches!(err, EngineError::MalformedInput { .. }));
    }

    #[test]
    fn test_explicit_security_column_beats_isin_fallback() {
        let table = Table::from_rows(
            "holdings",
            &["name", "isin", "security_num"],
            &[vec!["Mixed", "1111111", "2222222"]],
        );
        let holdings = Holdings::from_table(&table, &HoldingSchema::default(), &CompiledConfig::default()).unwrap();
        assert_eq!(
            holdings.records[0].identifiers.get(IdentifierType::LocalSecurityNumber),
            Some("2222222")
        );
    }

    #[test]
    fn test_to_table_appends_result_columns() {
        let mut holdings =
            Holdings::from_table(&holdings_table(), &HoldingSchema::default(), &CompiledConfig::default()).unwrap();
        holdings.records[0].is_fossil = Some(0.0);
        holdings.records[1].is_fossil = Some(1.0);
        holdings.records[4].is_fossil = Some(0.5);
        holdings.records[1].is_fossil_conflict = true;

        let table = holdings.to_table();
        assert_eq!(table.columns[0], "name");
        assert!(table.has_column("is_fossil_ticker"));

        let fossil = table.column_index("is_fossil").unwrap();
        let conflict = table.column_index("is_fossil_conflict").unwrap();
        let issuer = table.column_index("issuer_num").unwrap();
        let security = table.column_index("security_num").unwrap();

        assert_eq!(table.cell(0, fossil), Some("0"));
        assert_eq!(table.cell(1, fossil), Some("1"));
        assert_eq!(table.cell(2, fossil), None);
        assert_eq!(table.cell(4, fossil), Some("0.500"));
        assert_eq!(table.cell(1, conflict), Some("true"));
        assert_eq!(table.cell(1, issuer), Some("1095"));
        assert_eq!(table.cell(4, security), Some("604611"));
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1,250.50"), Some(1250.5));
        assert_eq!(parse_amount("₪ -30"), Some(-30.0));
        assert_eq!(parse_amount("n/a"), None);
    }
}
