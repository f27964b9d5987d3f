// 📚 Reference Inputs
// The entity reference list (company screens), the national registry list
// and the previously classified table, each built from a loaded `Table`.

use crate::config::CompiledConfig;
use crate::consolidation::{is_mixed, known_mean};
use crate::error::{EngineError, Result};
use crate::identifiers::{IdentifierSet, IdentifierType, Identified};
use crate::propagation::AmbiguousGroup;
use crate::signals::parse_flag;
use crate::table::Table;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

fn required_column(table: &Table, column: &str) -> Result<usize> {
    table.column_index(column).ok_or_else(|| {
        EngineError::malformed(&table.name, format!("required column '{}' not found", column))
    })
}

// ============================================================================
// ENTITY REFERENCE LIST
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEntity {
    /// Upper-cased, trimmed company name
    pub company: String,
    pub country: Option<String>,
    pub tickers: Vec<String>,
    pub coal: bool,
    pub oil_gas: bool,
    pub fossil_utility: bool,
    /// Any of the three screens
    pub fossil: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityListSchema {
    pub company_column: String,
    pub country_column: String,
    pub tickers_column: String,
    pub coal_column: String,
    pub oil_gas_column: String,
    pub utility_column: String,
}

impl Default for EntityListSchema {
    fn default() -> Self {
        EntityListSchema {
            company_column: "Company".to_string(),
            country_column: "Country".to_string(),
            tickers_column: "Tickers".to_string(),
            coal_column: "Fossil Free Funds: Coal screen".to_string(),
            oil_gas_column: "Fossil Free Funds: Oil / gas screen".to_string(),
            utility_column: "Fossil Free Funds: Fossil-fired utility screen".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntityReferenceList {
    entities: Vec<ReferenceEntity>,
}

impl EntityReferenceList {
    pub fn new(entities: Vec<ReferenceEntity>) -> Self {
        EntityReferenceList { entities }
    }

    /// Company column is required; screens missing from the table count as unset
    pub fn from_table(table: &Table, schema: &EntityListSchema) -> Result<Self> {
        let company_col = required_column(table, &schema.company_column)?;
        let country_col = table.column_index(&schema.country_column);
        let tickers_col = table.column_index(&schema.tickers_column);
        let screen = |column: &str, row: usize| {
            table
                .column_index(column)
                .and_then(|c| table.cell(row, c))
                .and_then(parse_flag)
                .unwrap_or(false)
        };

        let mut entities = Vec::new();
        for row in 0..table.len() {
            let Some(company) = table
                .cell(row, company_col)
                .map(|c| c.trim().to_uppercase())
                .filter(|c| !c.is_empty())
            else {
                continue;
            };

            let tickers = tickers_col
                .and_then(|c| table.cell(row, c))
                .map(split_tickers)
                .unwrap_or_default();

            let coal = screen(&schema.coal_column, row);
            let oil_gas = screen(&schema.oil_gas_column, row);
            let fossil_utility = screen(&schema.utility_column, row);

            entities.push(ReferenceEntity {
                company,
                country: country_col
                    .and_then(|c| table.cell(row, c))
                    .map(|c| c.trim().to_string()),
                tickers,
                coal,
                oil_gas,
                fossil_utility,
                fossil: coal || oil_gas || fossil_utility,
            });
        }

        let list = EntityReferenceList { entities };
        info!(
            "entity reference list: {} companies, {} fossil, {} tickers",
            list.len(),
            list.fossil_count(),
            list.ticker_count()
        );
        Ok(list)
    }

    pub fn entities(&self) -> &[ReferenceEntity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn fossil_count(&self) -> usize {
        self.entities.iter().filter(|e| e.fossil).count()
    }

    pub fn ticker_count(&self) -> usize {
        self.entities.iter().map(|e| e.tickers.len()).sum()
    }
}

fn split_tickers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .collect()
}

// ============================================================================
// LOCAL AUTHORITY LIST
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalAuthoritySchema {
    pub issuer_column: String,
    pub corporate_column: String,
    pub flag_column: String,
}

impl Default for LocalAuthoritySchema {
    fn default() -> Self {
        LocalAuthoritySchema {
            issuer_column: "issuer_num".to_string(),
            corporate_column: "corporate_num".to_string(),
            flag_column: "blacklist".to_string(),
        }
    }
}

/// National registry classification, by issuer and by corporate number
#[derive(Debug, Clone, Default)]
pub struct LocalAuthorityList {
    by_issuer: HashMap<String, Option<bool>>,
    by_corporate: HashMap<String, Option<bool>>,
}

impl LocalAuthorityList {
    pub fn from_table(
        table: &Table,
        schema: &LocalAuthoritySchema,
        config: &CompiledConfig,
    ) -> Result<Self> {
        let flag_col = required_column(table, &schema.flag_column)?;
        let issuer_col = table.column_index(&schema.issuer_column);
        let corporate_col = table.column_index(&schema.corporate_column);
        if issuer_col.is_none() && corporate_col.is_none() {
            return Err(EngineError::malformed(
                &table.name,
                format!(
                    "neither '{}' nor '{}' present",
                    schema.issuer_column, schema.corporate_column
                ),
            ));
        }

        let normalizer = &config.normalizer;
        let mut list = LocalAuthorityList::default();
        let mut unflagged = 0;

        for row in 0..table.len() {
            let flag = table.cell(row, flag_col).and_then(parse_flag);
            if flag.is_none() {
                unflagged += 1;
            }
            if let Some(issuer) = issuer_col.and_then(|c| normalizer.normalize_opt(table.cell(row, c))) {
                list.by_issuer.entry(issuer).or_insert(flag);
            }
            if let Some(corp) = corporate_col.and_then(|c| normalizer.normalize_opt(table.cell(row, c))) {
                list.by_corporate.entry(corp).or_insert(flag);
            }
        }

        if unflagged > 0 {
            warn!(
                table = %table.name,
                "{} registry rows without a usable classification flag",
                unflagged
            );
        }
        info!(
            "local authority list: {} issuers, {} corporate numbers",
            list.by_issuer.len(),
            list.by_corporate.len()
        );

        Ok(list)
    }

    pub fn insert(&mut self, issuer: Option<&str>, corporate: Option<&str>, flag: Option<bool>) {
        if let Some(issuer) = issuer {
            self.by_issuer.entry(issuer.to_string()).or_insert(flag);
        }
        if let Some(corp) = corporate {
            self.by_corporate.entry(corp.to_string()).or_insert(flag);
        }
    }

    /// Outer `None`: not listed. Inner `None`: listed without a usable flag
    pub fn by_issuer(&self, issuer: &str) -> Option<Option<bool>> {
        self.by_issuer.get(issuer).copied()
    }

    pub fn by_corporate(&self, corporate: &str) -> Option<Option<bool>> {
        self.by_corporate.get(corporate).copied()
    }
}

// ============================================================================
// PREVIOUS CLASSIFICATIONS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviousSchema {
    /// ISIN or local security number
    pub security_column: String,
    /// Issuer or corporate number
    pub issuer_column: String,
    pub lei_column: String,
    pub fossil_column: String,
    pub date_column: String,
}

impl Default for PreviousSchema {
    fn default() -> Self {
        PreviousSchema {
            security_column: "security_num".to_string(),
            issuer_column: "issuer_or_corp_num".to_string(),
            lei_column: "lei".to_string(),
            fossil_column: "is_fossil".to_string(),
            date_column: "classification_date".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviousClassification {
    pub row: usize,
    pub identifiers: IdentifierSet,
    pub is_fossil: Option<bool>,
    pub classified_on: Option<NaiveDate>,
}

impl Identified for PreviousClassification {
    fn identifiers(&self) -> &IdentifierSet {
        &self.identifiers
    }

    fn identifiers_mut(&mut self) -> &mut IdentifierSet {
        &mut self.identifiers
    }
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let date_part = raw.split(|c: char| c == ' ' || c == 'T').next().unwrap_or(raw);
    ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d.%m.%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

#[derive(Debug, Clone, Default)]
pub struct PreviousClassifications {
    records: Vec<PreviousClassification>,
}

impl PreviousClassifications {
    pub fn new(records: Vec<PreviousClassification>) -> Self {
        PreviousClassifications { records }
    }

    pub fn from_table(table: &Table, schema: &PreviousSchema, config: &CompiledConfig) -> Result<Self> {
        let fossil_col = required_column(table, &schema.fossil_column)?;
        let security_col = table.column_index(&schema.security_column);
        let issuer_col = table.column_index(&schema.issuer_column);
        let lei_col = table.column_index(&schema.lei_column);
        let date_col = table.column_index(&schema.date_column);

        if security_col.is_none() && issuer_col.is_none() && lei_col.is_none() {
            return Err(EngineError::malformed(
                &table.name,
                "no security, issuer or LEI column to key previous classifications by",
            ));
        }

        let bound = [
            (security_col, IdentifierType::Isin),
            (issuer_col, IdentifierType::LocalIssuerNumber),
            (lei_col, IdentifierType::Lei),
        ];

        let mut records = Vec::with_capacity(table.len());
        for row in 0..table.len() {
            let mut identifiers = IdentifierSet::new();
            for (column, id_type) in bound {
                if let Some(raw) = column.and_then(|c| table.cell(row, c)) {
                    identifiers.assign(id_type, raw, &config.normalizer, &config.grammars);
                }
            }

            records.push(PreviousClassification {
                row,
                identifiers,
                is_fossil: table.cell(row, fossil_col).and_then(parse_flag),
                classified_on: date_col.and_then(|c| table.cell(row, c)).and_then(parse_date),
            });
        }

        info!("loaded {} previous classifications", records.len());
        Ok(PreviousClassifications { records })
    }

    pub fn records(&self) -> &[PreviousClassification] {
        &self.records
    }

    /// Mutable access for running the identifier mapping chain
    pub fn records_mut(&mut self) -> &mut [PreviousClassification] {
        &mut self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Securities, issuers and corporate numbers classified both ways in history
    pub fn ambiguous_keys(&self) -> Vec<AmbiguousGroup> {
        let mut found = Vec::new();
        for key in [
            IdentifierType::Isin,
            IdentifierType::LocalSecurityNumber,
            IdentifierType::LocalIssuerNumber,
            IdentifierType::LocalCorporateNumber,
        ] {
            let mut groups: BTreeMap<&str, Vec<&PreviousClassification>> = BTreeMap::new();
            for record in &self.records {
                if let Some(value) = record.identifiers.get(key) {
                    groups.entry(value).or_default().push(record);
                }
            }
            for (value, members) in groups {
                let mean = known_mean(
                    members
                        .iter()
                        .filter_map(|r| r.is_fossil)
                        .map(|v| if v { 1.0 } else { 0.0 }),
                );
                if let Some(mean) = mean.filter(|m| is_mixed(*m)) {
                    warn!(
                        "previously classified {} {} both fossil and non-fossil",
                        key, value
                    );
                    found.push(AmbiguousGroup {
                        key,
                        value: value.to_string(),
                        mean,
                        members: members.iter().map(|r| r.row).collect(),
                    });
                }
            }
        }
        found
    }

    /// Lookups keyed by security, issuer and LEI, most recent date wins
    pub fn index(&self) -> PreviousIndex {
        let mut index = PreviousIndex::default();
        for record in &self.records {
            let Some(fossil) = record.is_fossil else {
                continue;
            };
            let entry = (record.classified_on, fossil);
            for (id_type, value) in record.identifiers.iter() {
                let map = match id_type {
                    IdentifierType::Isin | IdentifierType::LocalSecurityNumber => {
                        &mut index.by_security
                    }
                    IdentifierType::LocalIssuerNumber => &mut index.by_issuer,
                    IdentifierType::Lei => &mut index.by_lei,
                    IdentifierType::LocalCorporateNumber => continue,
                };
                map.entry(value.to_string())
                    .and_modify(|current| {
                        if entry.0 > current.0 {
                            *current = entry;
                        }
                    })
                    .or_insert(entry);
            }
        }
        debug!(
            "previous classification index: {} securities, {} issuers, {} LEIs",
            index.by_security.len(),
            index.by_issuer.len(),
            index.by_lei.len()
        );
        index
    }
}

#[derive(Debug, Clone, Default)]
pub struct PreviousIndex {
    by_security: HashMap<String, (Option<NaiveDate>, bool)>,
    by_issuer: HashMap<String, (Option<NaiveDate>, bool)>,
    by_lei: HashMap<String, (Option<NaiveDate>, bool)>,
}

impl PreviousIndex {
    pub fn security(&self, value: &str) -> Option<bool> {
        self.by_security.get(value).map(|(_, v)| *v)
    }

    pub fn issuer(&self, value: &str) -> Option<bool> {
        self.by_issuer.get(value).map(|(_, v)| *v)
    }

    pub fn lei(&self, value: &str) -> Option<bool> {
        self.by_lei.get(value).map(|(_, v)| *v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity_table() -> Table {
        Table::from_rows(
            "companies",
            &[
                "Company",
                "Country",
                "Tickers",
                "Fossil Free Funds: Coal screen",
                "Fossil Free Funds: Oil / gas screen",
                "Fossil Free Funds: Fossil-fired utility screen",
            ],
            &[
                vec![" Exxon Mobil Corp ", "US", "xom, XOM.N", "", "Y", ""],
                vec!["Duke Energy", "US", "DUK", "", "", "Y"],
                vec!["Apple Inc", "US", "AAPL", "", "", ""],
                vec!["No Ticker Co", "IL", "", "", "", ""],
                vec!["", "US", "XYZ", "Y", "", ""],
            ],
        )
    }

    #[test]
    fn test_entity_list_flags_and_tickers() {
        let list = EntityReferenceList::from_table(&entity_table(), &EntityListSchema::default()).unwrap();
        assert_eq!(list.len(), 4);
        assert_eq!(list.fossil_count(), 2);

        let exxon = &list.entities()[0];
        assert_eq!(exxon.company, "EXXON MOBIL CORP");
        assert_eq!(exxon.tickers, vec!["XOM".to_string(), "XOM.N".to_string()]);
        assert!(exxon.oil_gas && exxon.fossil);
        assert!(list.entities()[1].fossil_utility);
        assert!(list.entities()[3].tickers.is_empty());
    }

    #[test]
    fn test_entity_list_requires_company_column() {
        let table = Table::from_rows("companies", &["Name"], &[vec!["Exxon"]]);
        let err = EntityReferenceList::from_table(&table, &EntityListSchema::default()).unwrap_err();
        assert!(matches!(err, EngineError::MalformedInput { .. }));
    }

    #[test]
    fn test_local_authority_list() {
        let table = Table::from_rows(
            "registry",
            &["issuer_num", "corporate_num", "blacklist"],
            &[
                vec!["123", "520000118", "כן - נפט"],
                vec!["456", "", "לא"],
                vec!["789", "520000999", "בבדיקה"],
                vec!["123", "", "לא"],
            ],
        );
        let list = LocalAuthorityList::from_table(&table, &LocalAuthoritySchema::default(), &CompiledConfig::default())
            .unwrap();

        assert_eq!(list.by_issuer("123"), Some(Some(true)));
        assert_eq!(list.by_corporate("520000118"), Some(Some(true)));
        assert_eq!(list.by_issuer("456"), Some(Some(false)));
        assert_eq!(list.by_issuer("789"), Some(None));
        assert_eq!(list.by_issuer("999"), None);
    }

    fn previous_table() -> Table {
        Table::from_rows(
            "previous",
            &["security_num", "issuer_or_corp_num", "lei", "is_fossil", "classification_date"],
            &[
                vec!["US0378331005", "", "", "0", "2020-03-31"],
                vec!["US0378331005", "", "", "1", "2020-12-31"],
                vec!["1081124", "123", "", "1", "2020-06-30"],
                vec!["1082222", "123", "", "0", "2019-06-30"],
                vec!["", "520000118", "5493001KJTIIGC8Y1R12", "1.0", "30/09/2020"],
            ],
        )
    }

    #[test]
    fn test_previous_latest_date_wins() {
        let config = CompiledConfig::default();
        let previous =
            PreviousClassifications::from_table(&previous_table(), &PreviousSchema::default(), &config).unwrap();
        let index = previous.index();

        assert_eq!(index.security("US0378331005"), Some(true));
        assert_eq!(index.security("1081124"), Some(true));
        assert_eq!(index.issuer("123"), Some(true));
        assert_eq!(index.lei("5493001KJTIIGC8Y1R12"), Some(true));
        assert_eq!(index.security("9999999"), None);
    }

    #[test]
    fn test_previous_identifier_slots() {
        let config = CompiledConfig::default();
        let previous =
            PreviousClassifications::from_table(&previous_table(), &PreviousSchema::default(), &config).unwrap();
        let records = previous.records();

        assert_eq!(records[2].identifiers.get(IdentifierType::LocalSecurityNumber), Some("1081124"));
        assert_eq!(records[4].identifiers.get(IdentifierType::LocalCorporateNumber), Some("520000118"));
        assert_eq!(
            records[4].classified_on,
            NaiveDate::from_ymd_opt(2020, 9, 30)
        );
    }

    #[test]
    fn test_previous_ambiguity_reported() {
        let config = CompiledConfig::default();
        let previous =
            PreviousClassifications::from_table(&previous_table(), &PreviousSchema::default(), &config).unwrap();
        let ambiguous = previous.ambiguous_keys();

        assert_eq!(ambiguous.len(), 2);
        assert_eq!(ambiguous[0].key, IdentifierType::Isin);
        assert_eq!(ambiguous[0].members, vec![0, 1]);
        assert_eq!(ambiguous[1].key, IdentifierType::LocalIssuerNumber);
        assert_eq!(ambiguous[1].value, "123");
    }

    #[test]
    fn test_previous_ambiguity_on_corporate_number() {
        let config = CompiledConfig::default();
        let table = Table::from_rows(
            "previous",
            &["security_num", "issuer_or_corp_num", "is_fossil"],
            &[
                vec!["", "520000118", "1"],
                vec!["", "520000118", "0"],
                vec!["", "520018078", "0"],
            ],
        );
        let previous = PreviousClassifications::from_table(&table, &PreviousSchema::default(), &config).unwrap();
        let ambiguous = previous.ambiguous_keys();

        assert_eq!(ambiguous.len(), 1);
        assert_eq!(ambiguous[0].key, IdentifierType::LocalCorporateNumber);
        assert_eq!(ambiguous[0].value, "520000118");
        assert_eq!(ambiguous[0].members, vec![0, 1]);
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("2021-03-31"), NaiveDate::from_ymd_opt(2021, 3, 31));
        assert_eq!(parse_date("2021-03-31 00:00:00"), NaiveDate::from_ymd_opt(2021, 3, 31));
        assert_eq!(parse_date("31/03/2021"), NaiveDate::from_ymd_opt(2021, 3, 31));
        assert_eq!(parse_date("Q1 2021"), None);
    }
}
