// ⚖️ Classification Consolidator
// Local-authority signals win over inferred ones; disagreement between any
// two present signals is flagged, never resolved.

use crate::signals::{SignalSet, SignalSource};
use serde::{Deserialize, Serialize};

/// Mean of the known values, `None` when there are none
pub fn known_mean<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Evidence is mixed when the mean lies strictly between 0 and 1
pub fn is_mixed(mean: f64) -> bool {
    mean > 0.0 && mean < 1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consolidation {
    pub is_fossil: Option<bool>,
    pub conflict: bool,
    /// Which group decided `is_fossil`
    pub decided_by_local_authority: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Consolidator;

impl Consolidator {
    pub fn new() -> Self {
        Consolidator
    }

    pub fn consolidate(&self, signals: &SignalSet) -> Consolidation {
        let local = group_max(signals, true);
        let general = group_max(signals, false);

        let conflict = known_mean(signals.present().map(|(_, v)| bool_value(v)))
            .map(is_mixed)
            .unwrap_or(false);

        Consolidation {
            is_fossil: local.or(general),
            conflict,
            decided_by_local_authority: local.is_some(),
        }
    }
}

fn group_max(signals: &SignalSet, local_authority: bool) -> Option<bool> {
    signals
        .present()
        .filter(|(source, _)| source.is_local_authority() == local_authority)
        .map(|(_, value)| value)
        .max()
}

fn bool_value(v: bool) -> f64 {
    if v {
        1.0
    } else {
        0.0
    }
}

/// Known signals of a record, for review output
pub fn present_signals(signals: &SignalSet) -> Vec<(SignalSource, bool)> {
    signals.present().collect()
}
