// 🪪 Identifier Types + Normalizer
// Every identifier value is normalized (trimmed, upper-cased, sentinels
// removed) before it is stored, compared or matched against a grammar.

use crate::error::{EngineError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ============================================================================
// IDENTIFIER TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierType {
    /// International security code (12 chars, country prefix, check digit)
    Isin,

    /// Local corporate registry number (9 digits, leading 5)
    LocalCorporateNumber,

    /// Legal-entity identifier (20 chars)
    Lei,

    /// Local exchange security number
    LocalSecurityNumber,

    /// Local exchange issuer number
    LocalIssuerNumber,
}

impl IdentifierType {
    pub const ALL: [IdentifierType; 5] = [
        IdentifierType::Isin,
        IdentifierType::LocalCorporateNumber,
        IdentifierType::Lei,
        IdentifierType::LocalSecurityNumber,
        IdentifierType::LocalIssuerNumber,
    ];

    /// Column name used when the type is written to an output table
    pub fn column_name(&self) -> &'static str {
        match self {
            IdentifierType::Isin => "isin",
            IdentifierType::LocalCorporateNumber => "corporate_num",
            IdentifierType::Lei => "lei",
            IdentifierType::LocalSecurityNumber => "security_num",
            IdentifierType::LocalIssuerNumber => "issuer_num",
        }
    }

    /// Slot for a value found in this type's column that fails its grammar
    ///
    /// Local holdings carry their exchange number in the ISIN column, and
    /// issuer columns often hold a corporate number instead.
    pub fn fallback(&self) -> Option<IdentifierType> {
        match self {
            IdentifierType::Isin => Some(IdentifierType::LocalSecurityNumber),
            IdentifierType::LocalIssuerNumber => Some(IdentifierType::LocalCorporateNumber),
            _ => None,
        }
    }

    pub fn default_pattern(&self) -> &'static str {
        match self {
            IdentifierType::Isin => r"^[A-Z]{2}[A-Z0-9]{9}[0-9]$",
            IdentifierType::LocalCorporateNumber => r"^5[0-9]{8}$",
            IdentifierType::Lei => r"^[A-Z0-9]{18}[0-9]{2}$",
            IdentifierType::LocalSecurityNumber => r"^[0-9]{5,9}$",
            IdentifierType::LocalIssuerNumber => r"^[0-9]{1,6}$",
        }
    }
}

impl fmt::Display for IdentifierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IdentifierType::Isin => "ISIN",
            IdentifierType::LocalCorporateNumber => "local corporate number",
            IdentifierType::Lei => "LEI",
            IdentifierType::LocalSecurityNumber => "local security number",
            IdentifierType::LocalIssuerNumber => "local issuer number",
        };
        f.write_str(name)
    }
}

// ============================================================================
// NORMALIZER
// ============================================================================

pub const DEFAULT_NULL_SENTINELS: [&str; 4] = ["0", "NAN", "NONE", ""];

#[derive(Debug, Clone)]
pub struct Normalizer {
    sentinels: BTreeSet<String>,
}

impl Normalizer {
    pub fn new<I, S>(sentinels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Normalizer {
            sentinels: sentinels
                .into_iter()
                .map(|s| s.as_ref().trim().to_uppercase())
                .collect(),
        }
    }

    /// Upper-cased, trimmed value, or `None` for empty and sentinel values
    pub fn normalize(&self, value: &str) -> Option<String> {
        let cleaned = value.trim().to_uppercase();
        if cleaned.is_empty() || self.sentinels.contains(&cleaned) {
            None
        } else {
            Some(cleaned)
        }
    }

    pub fn normalize_opt(&self, value: Option<&str>) -> Option<String> {
        value.and_then(|v| self.normalize(v))
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Normalizer::new(DEFAULT_NULL_SENTINELS)
    }
}

/// Normalize with the default sentinel set
pub fn normalize(value: &str) -> Option<String> {
    Normalizer::default().normalize(value)
}

// ============================================================================
// GRAMMARS
// ============================================================================

/// Compiled, anchored grammar per identifier type
#[derive(Debug, Clone)]
pub struct Grammars {
    patterns: BTreeMap<IdentifierType, Regex>,
}

impl Grammars {
    pub fn compile(patterns: &BTreeMap<IdentifierType, String>) -> Result<Self> {
        let mut compiled = BTreeMap::new();
        for id_type in IdentifierType::ALL {
            let pattern = patterns
                .get(&id_type)
                .map(String::as_str)
                .unwrap_or_else(|| id_type.default_pattern());
            let anchored = anchor(pattern);
            let regex = Regex::new(&anchored).map_err(|source| EngineError::InvalidGrammar {
                identifier: id_type,
                pattern: pattern.to_string(),
                source,
            })?;
            compiled.insert(id_type, regex);
        }
        Ok(Grammars { patterns: compiled })
    }

    /// Does an already-normalized value fit the grammar of `id_type`?
    pub fn matches(&self, id_type: IdentifierType, normalized: &str) -> bool {
        self.patterns
            .get(&id_type)
            .map(|re| re.is_match(normalized))
            .unwrap_or(false)
    }
}

impl Default for Grammars {
    fn default() -> Self {
        let patterns = IdentifierType::ALL
            .iter()
            .map(|t| (*t, anchor(t.default_pattern())))
            .map(|(t, p)| (t, Regex::new(&p).expect("built-in grammar compiles")))
            .collect();
        Grammars { patterns }
    }
}

fn anchor(pattern: &str) -> String {
    let start = if pattern.starts_with('^') { "" } else { "^" };
    let end = if pattern.ends_with('$') { "" } else { "$" };
    format!("{}{}{}", start, pattern, end)
}

// ============================================================================
// IDENTIFIER SET
// ============================================================================

/// Identifier values carried by one record, at most one per type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentifierSet {
    values: BTreeMap<IdentifierType, String>,
}

impl IdentifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id_type: IdentifierType) -> Option<&str> {
        self.values.get(&id_type).map(String::as_str)
    }

    pub fn contains(&self, id_type: IdentifierType) -> bool {
        self.values.contains_key(&id_type)
    }

    /// Normalize `raw` and store it; returns whether a value was stored
    pub fn set(&mut self, id_type: IdentifierType, raw: &str, normalizer: &Normalizer) -> bool {
        match normalizer.normalize(raw) {
            Some(value) => {
                self.values.insert(id_type, value);
                true
            }
            None => {
                self.values.remove(&id_type);
                false
            }
        }
    }

    /// Store a value that already went through the normalizer
    pub(crate) fn put_normalized(&mut self, id_type: IdentifierType, value: String) {
        self.values.insert(id_type, value);
    }

    /// Place a raw cell read from a `bound` column into the slot whose
    /// grammar it fits: the bound type, else its fallback. Never replaces
    /// a value already present. Returns the slot used.
    pub fn assign(
        &mut self,
        bound: IdentifierType,
        raw: &str,
        normalizer: &Normalizer,
        grammars: &Grammars,
    ) -> Option<IdentifierType> {
        let value = normalizer.normalize(raw)?;
        let slot = std::iter::once(bound)
            .chain(bound.fallback())
            .find(|t| grammars.matches(*t, &value))?;
        if self.contains(slot) {
            return None;
        }
        self.values.insert(slot, value);
        Some(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = (IdentifierType, &str)> {
        self.values.iter().map(|(t, v)| (*t, v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Anything carrying an identifier set (holdings, previous classifications)
pub trait Identified {
    fn identifiers(&self) -> &IdentifierSet;
    fn identifiers_mut(&mut self) -> &mut IdentifierSet;
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_sentinels() {
        assert_eq!(normalize("0"), None);
        assert_eq!(normalize(""), None);
        assert_eq!(normalize("NaN"), None);
        assert_eq!(normalize("none"), None);
        assert_eq!(normalize("   "), None);
    }

    #[test]
    fn test_normalize_trims_and_uppercases() {
        assert_eq!(normalize(" abc "), Some("ABC".to_string()));
        assert_eq!(normalize("il0011234567"), Some("IL0011234567".to_string()));
    }

    #[test]
    fn test_normalize_idempotent() {
        for raw in ["  us0378331005 ", "0", "nan", "Mixed Case", "100"] {
            let once = normalize(raw);
            let twice = once.as_deref().and_then(normalize);
            assert_eq!(once, twice, "normalize not idempotent for {:?}", raw);
        }
    }

    #[test]
    fn test_default_grammars() {
        let grammars = Grammars::default();
        assert!(grammars.matches(IdentifierType::Isin, "US0378331005"));
        assert!(!grammars.matches(IdentifierType::Isin, "US037833100X"));
        assert!(grammars.matches(IdentifierType::LocalCorporateNumber, "520000118"));
        assert!(!grammars.matches(IdentifierType::LocalCorporateNumber, "420000118"));
        assert!(grammars.matches(IdentifierType::Lei, "5493001KJTIIGC8Y1R12"));
    }

    #[test]
    fn test_grammar_is_anchored() {
        let mut patterns = BTreeMap::new();
        patterns.insert(IdentifierType::LocalCorporateNumber, "5[0-9]{8}".to_string());
        let grammars = Grammars::compile(&patterns).unwrap();
        assert!(grammars.matches(IdentifierType::LocalCorporateNumber, "520000118"));
        assert!(!grammars.matches(IdentifierType::LocalCorporateNumber, "X520000118X"));
    }

    #[test]
    fn test_invalid_grammar_rejected() {
        let mut patterns = BTreeMap::new();
        patterns.insert(IdentifierType::Lei, "([A-Z".to_string());
        let err = Grammars::compile(&patterns).unwrap_err();
        assert!(matches!(err, EngineError::InvalidGrammar { identifier: IdentifierType::Lei, .. }));
    }

    #[test]
    fn test_identifier_set_normalizes() {
        let normalizer = Normalizer::default();
        let mut ids = IdentifierSet::new();
        assert!(ids.set(IdentifierType::Isin, " us0378331005", &normalizer));
        assert_eq!(ids.get(IdentifierType::Isin), Some("US0378331005"));
        assert!(!ids.set(IdentifierType::Isin, "nan", &normalizer));
        assert!(!ids.contains(IdentifierType::Isin));
    }

    #[test]
    fn test_assign_uses_grammar_and_fallback() {
        let normalizer = Normalizer::default();
        let grammars = Grammars::default();
        let mut ids = IdentifierSet::new();

        let slot = ids.assign(IdentifierType::Isin, "1081124", &normalizer, &grammars);
        assert_eq!(slot, Some(IdentifierType::LocalSecurityNumber));

        let slot = ids.assign(IdentifierType::LocalIssuerNumber, "520000118", &normalizer, &grammars);
        assert_eq!(slot, Some(IdentifierType::LocalCorporateNumber));

        assert_eq!(ids.assign(IdentifierType::Lei, "garbage", &normalizer, &grammars), None);
        assert!(!ids.contains(IdentifierType::Lei));
    }
}
