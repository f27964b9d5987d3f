// ⚙️ Engine Configuration - grammars, word lists and thresholds as data
// Loaded from JSON (or Default) and compiled once before the engine runs.

use crate::error::{EngineError, Result as EngineResult};
use crate::identifiers::{Grammars, IdentifierType, Normalizer, DEFAULT_NULL_SENTINELS};
use crate::mapping::{MappingStep, MergePolicy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

pub const SECURITIES_TABLE: &str = "securities";
pub const LEI_TABLE: &str = "isin_lei";

// ============================================================================
// THRESHOLDS
// ============================================================================

/// All scores are on a 0-100 scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchThresholds {
    /// Name corroboration a ticker match needs before its flag counts
    pub ticker_corroboration: f64,

    /// Name-match score needed to keep the match as provisional metadata
    pub name_acceptance: f64,

    /// Name-match score needed before the matched flag counts
    pub name_classification: f64,

    /// First-word partial score a candidate needs to be fully compared
    pub first_word: f64,

    pub max_first_word_candidates: usize,

    /// Shorter names are not scored for ticker corroboration
    pub min_corroboration_name_len: usize,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        MatchThresholds {
            ticker_corroboration: 80.0,
            name_acceptance: 60.0,
            name_classification: 90.0,
            first_word: 95.0,
            max_first_word_candidates: 10,
            min_corroboration_name_len: 3,
        }
    }
}

// ============================================================================
// ENGINE CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Anchored grammar per identifier type; missing types use built-ins
    pub grammars: BTreeMap<IdentifierType, String>,

    pub null_sentinels: Vec<String>,

    /// Types `detect_all` looks for by grammar
    pub detectable_types: Vec<IdentifierType>,

    /// Columns never considered by the detector (exact names)
    pub detector_denylist: Vec<String>,

    /// Columns never considered by the detector (name prefixes)
    pub detector_deny_prefixes: Vec<String>,

    /// A ticker is cut at the first of these characters
    pub ticker_separators: String,

    /// A cleaned company name ends after the first of these words
    pub legal_suffixes: Vec<String>,

    /// Words dropped from names before fuzzy comparison
    pub stop_words: Vec<String>,

    pub thresholds: MatchThresholds,

    /// Identifier fan-out chain, applied in order
    pub mapping_steps: Vec<MappingStep>,

    /// Ticker columns of the securities table used to fill missing
    /// issuer numbers, tried in this order (Hebrew tickers first)
    pub issuer_ticker_columns: Vec<String>,

    /// Ticker matching is skipped for records carrying any of these
    pub ticker_skip_if_present: Vec<IdentifierType>,

    /// Equivalence keys for propagation, in pass order
    pub propagation_keys: Vec<IdentifierType>,

    pub max_propagation_rounds: usize,

    /// Name matching goes parallel above this many distinct names
    pub parallel_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        use IdentifierType::*;

        EngineConfig {
            grammars: IdentifierType::ALL
                .iter()
                .map(|t| (*t, t.default_pattern().to_string()))
                .collect(),
            null_sentinels: DEFAULT_NULL_SENTINELS.iter().map(|s| s.to_string()).collect(),
            detectable_types: vec![Isin, LocalCorporateNumber, Lei],
            detector_denylist: Vec::new(),
            detector_deny_prefixes: Vec::new(),
            ticker_separators: " /\\%.".to_string(),
            legal_suffixes: to_strings(&[
                "INC", "LTD", "CORP", "PLC", "LLC", "ASA", "AG", "SA", "NV", "SE", "BM", "בעמ",
            ]),
            stop_words: to_strings(&[
                "LTD", "INC", "CORP", "CO", "GROUP", "PLC", "HOLDINGS", "&", "AND", "FLOAT",
                "אגח",
            ]),
            thresholds: MatchThresholds::default(),
            mapping_steps: vec![
                MappingStep::new(SECURITIES_TABLE, LocalSecurityNumber, Isin, MergePolicy::PreferExisting),
                MappingStep::new(SECURITIES_TABLE, Isin, LocalSecurityNumber, MergePolicy::PreferExisting),
                MappingStep::new(SECURITIES_TABLE, LocalSecurityNumber, LocalIssuerNumber, MergePolicy::PreferShorter),
                MappingStep::new(SECURITIES_TABLE, Isin, LocalIssuerNumber, MergePolicy::PreferShorter),
                MappingStep::new(SECURITIES_TABLE, LocalCorporateNumber, LocalIssuerNumber, MergePolicy::PreferShorter),
                MappingStep::new(SECURITIES_TABLE, LocalIssuerNumber, LocalCorporateNumber, MergePolicy::PreferExisting),
                MappingStep::new(LEI_TABLE, Isin, Lei, MergePolicy::PreferExisting),
            ],
            issuer_ticker_columns: to_strings(&["ticker_he", "ticker_en"]),
            ticker_skip_if_present: vec![LocalIssuerNumber],
            propagation_keys: vec![LocalSecurityNumber, Isin, LocalIssuerNumber, Lei],
            max_propagation_rounds: 4,
            parallel_threshold: 64,
        }
    }
}

fn to_strings(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

impl EngineConfig {
    /// Load configuration from a JSON file; absent fields keep defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: EngineConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        let t = &self.thresholds;
        for (name, value) in [
            ("ticker_corroboration", t.ticker_corroboration),
            ("name_acceptance", t.name_acceptance),
            ("name_classification", t.name_classification),
            ("first_word", t.first_word),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(EngineError::Config(format!(
                    "threshold {} must be within 0-100, got {}",
                    name, value
                )));
            }
        }
        if t.name_acceptance > t.name_classification {
            return Err(EngineError::Config(format!(
                "name_acceptance ({}) above name_classification ({})",
                t.name_acceptance, t.name_classification
            )));
        }
        if t.max_first_word_candidates == 0 {
            return Err(EngineError::Config(
                "max_first_word_candidates must be at least 1".to_string(),
            ));
        }
        for step in &self.mapping_steps {
            if step.by == step.add {
                return Err(EngineError::Config(format!(
                    "mapping step on '{}' maps {} onto itself",
                    step.table, step.by
                )));
            }
        }
        if self.max_propagation_rounds == 0 {
            return Err(EngineError::Config(
                "max_propagation_rounds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate and compile into the object every component is built from
    pub fn compile(self) -> EngineResult<CompiledConfig> {
        self.validate()?;

        let grammars = Grammars::compile(&self.grammars)?;
        let normalizer = Normalizer::new(&self.null_sentinels);
        let stop_words = upper_set(&self.stop_words);
        let legal_suffixes = upper_set(&self.legal_suffixes);
        let ticker_separators = self.ticker_separators.chars().collect();

        Ok(CompiledConfig {
            normalizer,
            grammars,
            stop_words,
            legal_suffixes,
            ticker_separators,
            config: self,
        })
    }
}

fn upper_set(words: &[String]) -> BTreeSet<String> {
    words
        .iter()
        .map(|w| w.trim().to_uppercase())
        .filter(|w| !w.is_empty())
        .collect()
}

// ============================================================================
// COMPILED CONFIG
// ============================================================================

#[derive(Debug, Clone)]
pub struct CompiledConfig {
    pub config: EngineConfig,
    pub normalizer: Normalizer,
    pub grammars: Grammars,
    pub stop_words: BTreeSet<String>,
    pub legal_suffixes: BTreeSet<String>,
    pub ticker_separators: Vec<char>,
}

impl CompiledConfig {
    pub fn thresholds(&self) -> &MatchThresholds {
        &self.config.thresholds
    }
}

impl Default for CompiledConfig {
    fn default() -> Self {
        let config = EngineConfig::default();
        CompiledConfig {
            normalizer: Normalizer::new(&config.null_sentinels),
            grammars: Grammars::default(),
            stop_words: upper_set(&config.stop_words),
            legal_suffixes: upper_set(&config.legal_suffixes),
            ticker_separators: config.ticker_separators.chars().collect(),
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_compiles() {
        let compiled = EngineConfig::default().compile().unwrap();
        assert_eq!(compiled.thresholds().ticker_corroboration, 80.0);
        assert!(compiled.stop_words.contains("HOLDINGS"));
        assert!(compiled.ticker_separators.contains(&'%'));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{ "thresholds": { "name_classification": 95.0 }, "stop_words": ["sa"] }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.thresholds.name_classification, 95.0);
        assert_eq!(config.thresholds.name_acceptance, 60.0);
        assert_eq!(config.stop_words, vec!["sa".to_string()]);
        assert_eq!(config.propagation_keys.len(), 4);

        let compiled = config.compile().unwrap();
        assert!(compiled.stop_words.contains("SA"));
    }

    #[test]
    fn test_acceptance_above_classification_rejected() {
        let mut config = EngineConfig::default();
        config.thresholds.name_acceptance = 95.0;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_self_mapping_rejected() {
        let mut config = EngineConfig::default();
        config.mapping_steps.push(MappingStep::new(
            LEI_TABLE,
            IdentifierType::Lei,
            IdentifierType::Lei,
            MergePolicy::PreferExisting,
        ));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, r#"{ "max_propagation_rounds": 2 }"#).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.max_propagation_rounds, 2);
        assert!(EngineConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
