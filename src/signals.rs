// 🚦 Classification Signals
// One nullable fossil / not-fossil judgement per source. Signals are
// write-once: a known value is never replaced or removed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    /// Previous classification, matched by ISIN or local security number
    PrevSecurity,

    /// Previous classification, matched by issuer number
    PrevIssuer,

    /// Previous classification, matched by LEI
    PrevLei,

    /// National registry list, matched by issuer number
    LocalListIssuer,

    /// National registry list, matched by corporate number
    LocalListCorporate,

    /// Reference list, matched by cleaned ticker and corroborated by name
    TickerMatch,

    /// Reference list, matched by fuzzy company name
    NameMatch,
}

impl SignalSource {
    pub const ALL: [SignalSource; 7] = [
        SignalSource::PrevSecurity,
        SignalSource::PrevIssuer,
        SignalSource::PrevLei,
        SignalSource::LocalListIssuer,
        SignalSource::LocalListCorporate,
        SignalSource::TickerMatch,
        SignalSource::NameMatch,
    ];

    /// Regulatory sources take precedence over inferred ones
    pub fn is_local_authority(&self) -> bool {
        matches!(
            self,
            SignalSource::LocalListIssuer | SignalSource::LocalListCorporate
        )
    }

    pub fn column_name(&self) -> &'static str {
        match self {
            SignalSource::PrevSecurity => "is_fossil_prev_security",
            SignalSource::PrevIssuer => "is_fossil_prev_issuer",
            SignalSource::PrevLei => "is_fossil_prev_lei",
            SignalSource::LocalListIssuer => "is_fossil_local_list_issuer",
            SignalSource::LocalListCorporate => "is_fossil_local_list_corporate",
            SignalSource::TickerMatch => "is_fossil_ticker",
            SignalSource::NameMatch => "is_fossil_company_name",
        }
    }
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name().trim_start_matches("is_fossil_"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalSet {
    values: BTreeMap<SignalSource, Option<bool>>,
}

impl SignalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a signal; returns false if a known value was already there
    pub fn record(&mut self, source: SignalSource, value: Option<bool>) -> bool {
        match self.values.get(&source) {
            Some(Some(_)) => false,
            _ => {
                self.values.insert(source, value);
                true
            }
        }
    }

    /// `None` when the source never reported or reported unknown
    pub fn get(&self, source: SignalSource) -> Option<bool> {
        self.values.get(&source).copied().flatten()
    }

    /// Whether the source produced an entry at all, known or not
    pub fn has_entry(&self, source: SignalSource) -> bool {
        self.values.contains_key(&source)
    }

    /// Known values only, in source order
    pub fn present(&self) -> impl Iterator<Item = (SignalSource, bool)> + '_ {
        self.values
            .iter()
            .filter_map(|(source, value)| value.map(|v| (*source, v)))
    }

    pub fn is_empty(&self) -> bool {
        self.present().next().is_none()
    }
}

/// Parse a yes/no flag as found in registry lists and screen columns
pub fn parse_flag(raw: &str) -> Option<bool> {
    let value = raw.trim();
    if value.starts_with("כן") {
        return Some(true);
    }
    if value.starts_with("לא") {
        return Some(false);
    }
    match value.to_uppercase().as_str() {
        "Y" | "YES" | "TRUE" | "1" | "1.0" => Some(true),
        "N" | "NO" | "FALSE" | "0" | "0.0" => Some(false),
        _ => None,
    }
}
