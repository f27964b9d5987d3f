// 🔗 Cross-Identifier Mapper
// Reduces unclean reference tables to a function (by-value -> add-value)
// and joins it onto records without overriding what they already carry.

use crate::error::{EngineError, Result};
use crate::identifiers::{IdentifierType, Identified, Normalizer};
use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

// ============================================================================
// MAPPING STEP
// ============================================================================

/// What to do when the target slot already holds a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Existing non-null values are never overwritten
    PreferExisting,

    /// Keep whichever non-empty value is shorter (ties keep the existing one)
    PreferShorter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingStep {
    /// Key of the reference table the step reads
    pub table: String,
    pub by: IdentifierType,
    pub add: IdentifierType,
    pub policy: MergePolicy,
}

impl MappingStep {
    pub fn new(table: &str, by: IdentifierType, add: IdentifierType, policy: MergePolicy) -> Self {
        MappingStep {
            table: table.to_string(),
            by,
            add,
            policy,
        }
    }

    pub fn label(&self) -> String {
        format!("{}: {} -> {}", self.table, self.by, self.add)
    }
}

// ============================================================================
// REFERENCE TABLE
// ============================================================================

/// A raw table plus the column each identifier type lives in
#[derive(Debug, Clone)]
pub struct ReferenceTable {
    pub table: Table,
    bindings: BTreeMap<IdentifierType, usize>,
}

impl ReferenceTable {
    pub fn new(table: Table) -> Self {
        ReferenceTable {
            table,
            bindings: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.table.name
    }

    /// Bind `id_type` to a named column
    pub fn bind(mut self, id_type: IdentifierType, column: &str) -> Result<Self> {
        let index = self.table.column_index(column).ok_or_else(|| {
            EngineError::malformed(&self.table.name, format!("no column named '{}'", column))
        })?;
        self.bindings.insert(id_type, index);
        Ok(self)
    }

    /// Bind every type the detector finds and that is not bound yet
    pub fn bind_detected(mut self, detector: &crate::detection::TypeDetector) -> Self {
        for (id_type, found) in detector.detect_all(&self.table) {
            if let Some(found) = found {
                self.bindings.entry(id_type).or_insert(found.index);
            }
        }
        self
    }

    /// Bind every type whose canonical column name appears in the header
    pub fn bind_by_header(mut self) -> Self {
        for id_type in IdentifierType::ALL {
            if let Some(index) = self.table.column_index(id_type.column_name()) {
                self.bindings.entry(id_type).or_insert(index);
            }
        }
        self
    }

    pub fn column_of(&self, id_type: IdentifierType) -> Option<usize> {
        self.bindings.get(&id_type).copied()
    }
}

// ============================================================================
// PROJECTION
// ============================================================================

/// Deduplicated lookup from one identifier value to another
#[derive(Debug, Clone, Default)]
pub struct Projection {
    pub by: Option<IdentifierType>,
    pub add: Option<IdentifierType>,
    lookup: HashMap<String, String>,
    /// Rows dropped for missing either value
    pub discarded: usize,
    /// Rows dropped because their key was already taken
    pub duplicates: usize,
}

impl Projection {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lookup.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// Build from already-normalized pairs, first occurrence wins
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (Option<String>, Option<String>)>,
    {
        let mut projection = Projection::default();
        for (key, value) in pairs {
            match (key, value) {
                (Some(key), Some(value)) => {
                    if projection.lookup.contains_key(&key) {
                        projection.duplicates += 1;
                    } else {
                        projection.lookup.insert(key, value);
                    }
                }
                _ => projection.discarded += 1,
            }
        }
        projection
    }
}

/// Reduce `reference` to a `by -> add` function
pub fn prepare_mapping(
    reference: &ReferenceTable,
    by: IdentifierType,
    add: IdentifierType,
    normalizer: &Normalizer,
) -> Result<Projection> {
    let by_col = reference
        .column_of(by)
        .ok_or_else(|| EngineError::missing(reference.name(), by))?;
    let add_col = reference
        .column_of(add)
        .ok_or_else(|| EngineError::missing(reference.name(), add))?;

    let table = &reference.table;
    let pairs = (0..table.len()).map(|row| {
        (
            normalizer.normalize_opt(table.cell(row, by_col)),
            normalizer.normalize_opt(table.cell(row, add_col)),
        )
    });

    let mut projection = Projection::from_pairs(pairs);
    projection.by = Some(by);
    projection.add = Some(add);

    debug!(
        table = %reference.name(),
        "prepared {} -> {} mapping: {} keys, {} discarded, {} duplicate keys",
        by,
        add,
        projection.len(),
        projection.discarded,
        projection.duplicates
    );

    Ok(projection)
}

// ============================================================================
// JOIN
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingCoverage {
    pub step: String,
    pub total: usize,
    /// Records carrying the join key
    pub keyed: usize,
    /// Records carrying the added identifier after the join
    pub covered: usize,
    /// Empty slots filled by the join
    pub filled: usize,
    /// Populated slots replaced under `PreferShorter`
    pub replaced: usize,
}

/// Pick between an existing issuer number and a freshly joined one
///
/// Non-empty beats empty; when both are present the shorter one wins,
/// ties keep the existing value.
pub fn choose_best_issuer_num(existing: Option<&str>, candidate: Option<&str>) -> Option<String> {
    let existing = existing.filter(|s| !s.is_empty());
    let candidate = candidate.filter(|s| !s.is_empty());

    match (existing, candidate) {
        (None, None) => None,
        (Some(e), None) => Some(e.to_string()),
        (None, Some(c)) => Some(c.to_string()),
        (Some(e), Some(c)) => {
            if c.chars().count() < e.chars().count() {
                Some(c.to_string())
            } else {
                Some(e.to_string())
            }
        }
    }
}

/// Fill-missing-without-override join, keyed by any per-record key
pub fn left_join_prefer_existing<T, F>(
    records: &mut [T],
    key_of: F,
    add: IdentifierType,
    projection: &Projection,
    policy: MergePolicy,
) -> MappingCoverage
where
    T: Identified,
    F: Fn(&T) -> Option<String>,
{
    let mut coverage = MappingCoverage {
        total: records.len(),
        ..Default::default()
    };

    for record in records.iter_mut() {
        let Some(key) = key_of(record) else {
            continue;
        };
        coverage.keyed += 1;

        if let Some(joined) = projection.get(&key) {
            let ids = record.identifiers_mut();
            let existing = ids.get(add).map(str::to_string);
            match (existing, policy) {
                (None, _) => {
                    ids.put_normalized(add, joined.to_string());
                    coverage.filled += 1;
                }
                (Some(_), MergePolicy::PreferExisting) => {}
                (Some(existing), MergePolicy::PreferShorter) => {
                    if let Some(best) = choose_best_issuer_num(Some(&existing), Some(joined)) {
                        if best != existing {
                            ids.put_normalized(add, best);
                            coverage.replaced += 1;
                        }
                    }
                }
            }
        }

        if record.identifiers().contains(add) {
            coverage.covered += 1;
        }
    }

    coverage
}

/// Join `projection` onto `records` through their `by` identifier
pub fn apply_mapping<T: Identified>(
    records: &mut [T],
    by: IdentifierType,
    add: IdentifierType,
    projection: &Projection,
    policy: MergePolicy,
) -> MappingCoverage {
    let mut coverage = left_join_prefer_existing(
        records,
        |r| r.identifiers().get(by).map(str::to_string),
        add,
        projection,
        policy,
    );
    coverage.step = format!("{} -> {}", by, add);

    info!(
        "{} coverage: {} with {} out of {} with {} ({} filled, {} replaced, {} rows)",
        coverage.step,
        coverage.covered,
        add,
        coverage.keyed,
        by,
        coverage.filled,
        coverage.replaced,
        coverage.total
    );

    coverage
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::IdentifierSet;

    #[derive(Debug, Default)]
    struct Row {
        ids: IdentifierSet,
    }

    impl Identified for Row {
        fn identifiers(&self) -> &IdentifierSet {
            &self.ids
        }
        fn identifiers_mut(&mut self) -> &mut IdentifierSet {
            &mut self.ids
        }
    }

    fn row(pairs: &[(IdentifierType, &str)]) -> Row {
        let normalizer = Normalizer::default();
        let mut r = Row::default();
        for (t, v) in pairs {
            r.ids.set(*t, v, &normalizer);
        }
        r
    }

    fn securities() -> ReferenceTable {
        let table = Table::from_rows(
            "securities",
            &["sec", "isin", "issuer"],
            &[
                vec!["1081124", "il0010811243", "1040"],
                vec!["1081124", "IL0010811243", "999"],
                vec!["604611", "IL0006046119", ""],
                vec!["nan", "IL0006912120", "691"],
                vec!["1100007", "IL0011000077", "0"],
            ],
        );
        ReferenceTable::new(table)
            .bind(IdentifierType::LocalSecurityNumber, "sec")
            .unwrap()
            .bind(IdentifierType::Isin, "isin")
            .unwrap()
            .bind(IdentifierType::LocalIssuerNumber, "issuer")
            .unwrap()
    }

    #[test]
    fn test_prepare_mapping_dedups_first_wins() {
        let projection = prepare_mapping(
            &securities(),
            IdentifierType::LocalSecurityNumber,
            IdentifierType::LocalIssuerNumber,
            &Normalizer::default(),
        )
        .unwrap();

        assert_eq!(projection.get("1081124"), Some("1040"));
        assert_eq!(projection.len(), 1);
        assert_eq!(projection.duplicates, 1);
        // Missing issuer, missing key, and a sentinel issuer
        assert_eq!(projection.discarded, 3);
    }

    #[test]
    fn test_prepare_mapping_normalizes_values() {
        let projection = prepare_mapping(
            &securities(),
            IdentifierType::Isin,
            IdentifierType::LocalSecurityNumber,
            &Normalizer::default(),
        )
        .unwrap();
        assert_eq!(projection.get("IL0010811243"), Some("1081124"));
    }

    #[test]
    fn test_prepare_mapping_missing_column() {
        let err = prepare_mapping(
            &securities(),
            IdentifierType::Isin,
            IdentifierType::Lei,
            &Normalizer::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::MissingIdentifier { identifier: IdentifierType::Lei, .. }
        ));
    }

    #[test]
    fn test_bind_unknown_column_is_malformed() {
        let result = ReferenceTable::new(Table::from_rows("t", &["a"], &[])).bind(IdentifierType::Lei, "b");
        assert!(matches!(result, Err(EngineError::MalformedInput { .. })));
    }

    #[test]
    fn test_bind_by_header() {
        let table = Table::from_rows("t", &["name", " isin ", "issuer_num"], &[]);
        let reference = ReferenceTable::new(table).bind_by_header();
        assert_eq!(reference.column_of(IdentifierType::Isin), Some(1));
        assert_eq!(reference.column_of(IdentifierType::LocalIssuerNumber), Some(2));
        assert_eq!(reference.column_of(IdentifierType::Lei), None);
    }

    #[test]
    fn test_apply_mapping_never_overwrites() {
        let projection = Projection::from_pairs(vec![
            (Some("US0378331005".to_string()), Some("LEIAPPLE000000000001".to_string())),
            (Some("US5949181045".to_string()), Some("LEIMSFT0000000000001".to_string())),
        ]);
        let mut rows = vec![
            row(&[(IdentifierType::Isin, "US0378331005")]),
            row(&[
                (IdentifierType::Isin, "US5949181045"),
                (IdentifierType::Lei, "EXISTINGLEI000000001"),
            ]),
            row(&[]),
        ];

        let coverage = apply_mapping(
            &mut rows,
            IdentifierType::Isin,
            IdentifierType::Lei,
            &projection,
            MergePolicy::PreferExisting,
        );

        assert_eq!(rows[0].ids.get(IdentifierType::Lei), Some("LEIAPPLE000000000001"));
        assert_eq!(rows[1].ids.get(IdentifierType::Lei), Some("EXISTINGLEI000000001"));
        assert_eq!(rows[2].ids.get(IdentifierType::Lei), None);
        assert_eq!(coverage.keyed, 2);
        assert_eq!(coverage.covered, 2);
        assert_eq!(coverage.filled, 1);
        assert_eq!(coverage.replaced, 0);
    }

    #[test]
    fn test_choose_best_issuer_num() {
        assert_eq!(choose_best_issuer_num(None, None), None);
        assert_eq!(choose_best_issuer_num(Some("1040"), None), Some("1040".to_string()));
        assert_eq!(choose_best_issuer_num(Some(""), Some("77")), Some("77".to_string()));
        assert_eq!(choose_best_issuer_num(Some("001040"), Some("1040")), Some("1040".to_string()));
        assert_eq!(choose_best_issuer_num(Some("1040"), Some("520000118")), Some("1040".to_string()));
        assert_eq!(choose_best_issuer_num(Some("1040"), Some("2020")), Some("1040".to_string()));
    }

    #[test]
    fn test_prefer_shorter_policy_replaces() {
        let projection =
            Projection::from_pairs(vec![(Some("1081124".to_string()), Some("1040".to_string()))]);
        let mut rows = vec![row(&[
            (IdentifierType::LocalSecurityNumber, "1081124"),
            (IdentifierType::LocalIssuerNumber, "520000118"),
        ])];

        let coverage = apply_mapping(
            &mut rows,
            IdentifierType::LocalSecurityNumber,
            IdentifierType::LocalIssuerNumber,
            &projection,
            MergePolicy::PreferShorter,
        );

        assert_eq!(rows[0].ids.get(IdentifierType::LocalIssuerNumber), Some("1040"));
        assert_eq!(coverage.replaced, 1);
    }

    #[test]
    fn test_chained_mapping_fans_out() {
        let normalizer = Normalizer::default();
        let refs = securities();
        let mut rows = vec![row(&[(IdentifierType::Isin, "IL0010811243")])];

        let to_sec = prepare_mapping(&refs, IdentifierType::Isin, IdentifierType::LocalSecurityNumber, &normalizer).unwrap();
        apply_mapping(&mut rows, IdentifierType::Isin, IdentifierType::LocalSecurityNumber, &to_sec, MergePolicy::PreferExisting);

        let to_issuer = prepare_mapping(&refs, IdentifierType::LocalSecurityNumber, IdentifierType::LocalIssuerNumber, &normalizer).unwrap();
        apply_mapping(&mut rows, IdentifierType::LocalSecurityNumber, IdentifierType::LocalIssuerNumber, &to_issuer, MergePolicy::PreferShorter);

        assert_eq!(rows[0].ids.get(IdentifierType::LocalSecurityNumber), Some("1081124"));
        assert_eq!(rows[0].ids.get(IdentifierType::LocalIssuerNumber), Some("1040"));
    }
}
