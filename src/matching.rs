// 🎯 Fuzzy Entity Matcher - ticker and company-name strategies
// Both strategies distrust themselves: a weak match keeps its metadata
// but contributes an unknown signal instead of a guess.

use crate::config::{CompiledConfig, MatchThresholds};
use crate::reference::ReferenceEntity;
use crate::similarity::{process, IndelRatio, SimilarityBackend};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

// ============================================================================
// CLEANING
// ============================================================================

/// Drop trailing digits, then cut at the first separator character
///
/// Tickers carry coupon or maturity suffixes (`AKERBP 4 3/4`, `BRK.B`,
/// `XOM2`) that must not take part in matching.
pub fn clean_ticker(raw: &str, separators: &[char]) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches(|c: char| c.is_ascii_digit());
    let head = match trimmed.find(|c: char| separators.contains(&c)) {
        Some(pos) => &trimmed[..pos],
        None => trimmed,
    };
    let cleaned = head.trim().to_uppercase();
    if cleaned.is_empty() || cleaned == "NAN" || cleaned == "NONE" {
        None
    } else {
        Some(cleaned)
    }
}

/// Cut an instrument name just before its ticker when the ticker shows up
/// as the third word or later (`AKER BP ASA AKERBP 4 3/4` -> `AKER BP ASA`)
pub fn cut_name_at_ticker(name: &str, ticker: &str) -> String {
    let Some(ticker_first) = ticker.split_whitespace().next() else {
        return name.to_string();
    };
    let words: Vec<&str> = name.split_whitespace().collect();
    let position = words
        .iter()
        .skip(1)
        .position(|w| w.eq_ignore_ascii_case(ticker_first))
        .map(|p| p + 1);

    match position {
        Some(p) if p > 1 => words[..p].join(" "),
        _ => name.to_string(),
    }
}

/// Company-name cleaning for fuzzy comparison
#[derive(Debug, Clone)]
pub struct NameCleaner {
    legal_suffixes: BTreeSet<String>,
    stop_words: BTreeSet<String>,
}

impl NameCleaner {
    pub fn new(config: &CompiledConfig) -> Self {
        NameCleaner {
            legal_suffixes: config.legal_suffixes.clone(),
            stop_words: config.stop_words.clone(),
        }
    }

    /// Upper-case, strip special characters, and end the name at the first
    /// hyphen, after the first legal suffix, or before a repeated word
    ///
    /// `ACME CORP ACME 5% NOTES` -> `ACME CORP`
    pub fn clean_company(&self, name: &str) -> String {
        let upper = name.to_uppercase();
        let before_hyphen = upper.split('-').next().unwrap_or("");
        let stripped: String = before_hyphen
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect();

        let mut kept: Vec<&str> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for word in stripped.split_whitespace() {
            if !seen.insert(word) {
                break;
            }
            kept.push(word);
            // A suffix only ends the name after at least one other word
            if kept.len() > 1 && self.legal_suffixes.contains(word) {
                break;
            }
        }

        while kept
            .last()
            .map_or(false, |w| w.chars().all(|c| c.is_ascii_digit()))
        {
            kept.pop();
        }

        kept.join(" ")
    }

    pub fn remove_stop_words(&self, name: &str) -> String {
        name.split_whitespace()
            .filter(|w| !self.stop_words.contains(&w.to_uppercase()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Form used on the holding side: cleaned, then stop words removed
    pub fn prepare_holding_name(&self, name: &str) -> String {
        self.remove_stop_words(&self.clean_company(name))
    }

    /// Form used on the reference side: upper-cased, stop words removed
    pub fn prepare_reference_name(&self, name: &str) -> String {
        self.remove_stop_words(&name.trim().to_uppercase())
    }
}

// ============================================================================
// BEST MATCH
// ============================================================================

fn first_word(s: &str) -> String {
    let processed = process(s);
    processed
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_string()
}

/// Best candidate for `query` and its 0-100 score, `("", 0)` when none
///
/// Exact membership short-circuits to 100. Otherwise only candidates whose
/// first word partially matches the query's first word above
/// `thresholds.first_word` (at most `max_first_word_candidates` of them)
/// get the full six-metric comparison.
pub fn best_match<S: AsRef<str>>(
    query: &str,
    candidates: &[S],
    backend: &dyn SimilarityBackend,
    thresholds: &MatchThresholds,
) -> (String, f64) {
    if query.is_empty() {
        return (String::new(), 0.0);
    }
    if candidates.iter().any(|c| c.as_ref() == query) {
        return (query.to_string(), 100.0);
    }

    let query_first = first_word(query);
    if query_first.is_empty() {
        return (String::new(), 0.0);
    }

    let mut scored: Vec<(usize, u32)> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (i, backend.partial_ratio(&query_first, &first_word(c.as_ref()))))
        .collect();
    // Stable: equal scores keep candidate order
    scored.sort_by(|a, b| b.1.cmp(&a.1));

    let mut winner = String::new();
    let mut max_score = 0.0;
    for (index, first_score) in scored
        .into_iter()
        .take(thresholds.max_first_word_candidates)
    {
        if (first_score as f64) <= thresholds.first_word {
            continue;
        }
        let candidate = candidates[index].as_ref();
        let score = backend.aggregate(query, candidate);
        if score > max_score {
            max_score = score;
            winner = candidate.to_string();
        }
    }

    (winner, max_score)
}

// ============================================================================
// TICKER MATCHING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerMatch {
    pub ticker: String,
    pub company: String,
    pub fossil: bool,
    /// Name corroboration, unknown when a name was too short to score
    pub score: Option<f64>,
}

impl TickerMatch {
    /// The flag only counts when the names corroborate the ticker
    pub fn signal(&self, threshold: f64) -> Option<bool> {
        match self.score {
            Some(score) if score > threshold => Some(self.fossil),
            _ => None,
        }
    }
}

pub struct TickerMatcher {
    /// Cleaned ticker -> (company, fossil), one entry per distinct company
    by_ticker: HashMap<String, Vec<(String, bool)>>,
    separators: Vec<char>,
    min_name_len: usize,
    backend: Arc<dyn SimilarityBackend>,
}

impl TickerMatcher {
    pub fn new(
        entities: &[ReferenceEntity],
        config: &CompiledConfig,
        backend: Arc<dyn SimilarityBackend>,
    ) -> Self {
        let separators = config.ticker_separators.clone();
        let mut by_ticker: HashMap<String, Vec<(String, bool)>> = HashMap::new();

        for entity in entities {
            for ticker in &entity.tickers {
                let Some(clean) = clean_ticker(ticker, &separators) else {
                    continue;
                };
                let slot = by_ticker.entry(clean).or_default();
                if !slot.iter().any(|(company, _)| company == &entity.company) {
                    slot.push((entity.company.clone(), entity.fossil));
                }
            }
        }

        debug!("ticker index holds {} cleaned tickers", by_ticker.len());

        TickerMatcher {
            by_ticker,
            separators,
            min_name_len: config.thresholds().min_corroboration_name_len,
            backend,
        }
    }

    /// Partial ratio of the lower-cased names, unknown for short names
    pub fn corroboration_score(&self, holding_name: &str, reference_name: &str) -> Option<f64> {
        let a = holding_name.trim().to_lowercase();
        let b = reference_name.trim().to_lowercase();
        if a.chars().count() < self.min_name_len || b.chars().count() < self.min_name_len {
            return None;
        }
        Some(self.backend.partial_ratio(&a, &b) as f64)
    }

    /// Best-corroborated reference row sharing the record's cleaned ticker
    pub fn match_ticker(&self, holding_name: &str, ticker: &str) -> Option<TickerMatch> {
        let clean = clean_ticker(ticker, &self.separators)?;
        let candidates = self.by_ticker.get(&clean)?;

        let mut best: Option<TickerMatch> = None;
        for (company, fossil) in candidates {
            let score = self.corroboration_score(holding_name, company);
            let better = match &best {
                None => true,
                Some(current) => match (score, current.score) {
                    (Some(s), Some(c)) => s > c,
                    (Some(_), None) => true,
                    _ => false,
                },
            };
            if better {
                best = Some(TickerMatch {
                    ticker: clean.clone(),
                    company: company.clone(),
                    fossil: *fossil,
                    score,
                });
            }
        }
        best
    }
}

// ============================================================================
// NAME MATCHING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameMatch {
    /// Cleaned holding name that was looked up
    pub query: String,
    /// Cleaned reference name that won
    pub company: String,
    pub score: f64,
    pub fossil: bool,
}

impl NameMatch {
    pub fn signal(&self, threshold: f64) -> Option<bool> {
        if self.score > threshold {
            Some(self.fossil)
        } else {
            None
        }
    }
}

pub struct NameMatcher {
    cleaner: NameCleaner,
    candidates: Vec<String>,
    /// Cleaned reference name -> fossil flag of its first row
    flags: HashMap<String, bool>,
    thresholds: MatchThresholds,
    parallel_threshold: usize,
    backend: Arc<dyn SimilarityBackend>,
}

impl NameMatcher {
    pub fn new(
        entities: &[ReferenceEntity],
        config: &CompiledConfig,
        backend: Arc<dyn SimilarityBackend>,
    ) -> Self {
        let cleaner = NameCleaner::new(config);
        let mut candidates = Vec::new();
        let mut flags = HashMap::new();

        for entity in entities {
            let name = cleaner.prepare_reference_name(&entity.company);
            if name.is_empty() || flags.contains_key(&name) {
                continue;
            }
            flags.insert(name.clone(), entity.fossil);
            candidates.push(name);
        }

        NameMatcher {
            cleaner,
            candidates,
            flags,
            thresholds: config.thresholds().clone(),
            parallel_threshold: config.config.parallel_threshold,
            backend,
        }
    }

    pub fn cleaner(&self) -> &NameCleaner {
        &self.cleaner
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn best_match(&self, query: &str) -> (String, f64) {
        best_match(query, &self.candidates, self.backend.as_ref(), &self.thresholds)
    }

    /// Match raw holding names, one result per input in input order
    ///
    /// Each distinct cleaned name is scored once; matches at or below the
    /// acceptance threshold are dropped.
    pub fn match_names(&self, names: &[&str]) -> Vec<Option<NameMatch>> {
        let cleaned: Vec<String> = names
            .iter()
            .map(|n| self.cleaner.prepare_holding_name(n))
            .collect();

        let mut unique: Vec<&str> = cleaned
            .iter()
            .map(String::as_str)
            .filter(|n| !n.is_empty())
            .collect();
        unique.sort_unstable();
        unique.dedup();

        info!(
            "fuzzy matching {} distinct names against {} reference names",
            unique.len(),
            self.candidates.len()
        );

        let scored = self.score_all(&unique);
        let results: HashMap<&str, (String, f64)> = unique.iter().copied().zip(scored).collect();

        cleaned
            .iter()
            .map(|query| {
                let (company, score) = results.get(query.as_str())?;
                if *score <= self.thresholds.name_acceptance {
                    return None;
                }
                let fossil = *self.flags.get(company)?;
                Some(NameMatch {
                    query: query.clone(),
                    company: company.clone(),
                    score: *score,
                    fossil,
                })
            })
            .collect()
    }

    #[cfg(feature = "parallel")]
    fn score_all(&self, queries: &[&str]) -> Vec<(String, f64)> {
        if queries.len() > self.parallel_threshold {
            use rayon::prelude::*;
            return queries.par_iter().map(|q| self.best_match(q)).collect();
        }
        queries.iter().map(|q| self.best_match(q)).collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn score_all(&self, queries: &[&str]) -> Vec<(String, f64)> {
        queries.iter().map(|q| self.best_match(q)).collect()
    }
}

/// Default backend shared by both matchers
pub fn default_backend() -> Arc<dyn SimilarityBackend> {
    Arc::new(IndelRatio)
}

// ============================================================================
// TESTS
// ============================================================================
