// 🧬 Equivalence-Class Propagator
// Records sharing an identifier value are assumed to be the same issuer or
// security; unknown classifications inside such a class take the class mean.

use crate::consolidation::{is_mixed, known_mean};
use crate::identifiers::{IdentifierType, Identified};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// A record carrying a (possibly fractional) classification
pub trait Classified {
    fn classification(&self) -> Option<f64>;
    fn set_classification(&mut self, value: f64);
}

/// An equivalence class holding both fossil and non-fossil evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbiguousGroup {
    pub key: IdentifierType,
    pub value: String,
    pub mean: f64,
    /// Row numbers of the members
    pub members: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropagationPass {
    pub key: Option<IdentifierType>,
    pub groups: usize,
    pub filled: usize,
    pub ambiguous: Vec<AmbiguousGroup>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropagationSummary {
    pub rounds: usize,
    pub converged: bool,
    pub filled: usize,
    /// Distinct ambiguous classes, first sighting kept
    pub ambiguous: Vec<AmbiguousGroup>,
}

pub struct Propagator {
    keys: Vec<IdentifierType>,
    max_rounds: usize,
}

impl Propagator {
    pub fn new(keys: Vec<IdentifierType>, max_rounds: usize) -> Self {
        Propagator {
            keys,
            max_rounds: max_rounds.max(1),
        }
    }

    /// One pass over one key; `row_of` names members in the ambiguity log
    pub fn propagate<T, F>(&self, records: &mut [T], key: IdentifierType, row_of: F) -> PropagationPass
    where
        T: Identified + Classified,
        F: Fn(&T) -> usize,
    {
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (index, record) in records.iter().enumerate() {
            if let Some(value) = record.identifiers().get(key) {
                groups.entry(value.to_string()).or_default().push(index);
            }
        }

        let mut pass = PropagationPass {
            key: Some(key),
            groups: groups.len(),
            ..Default::default()
        };

        for (value, members) in groups {
            let Some(mean) = known_mean(members.iter().filter_map(|&i| records[i].classification()))
            else {
                continue;
            };

            if is_mixed(mean) {
                let rows: Vec<usize> = members.iter().map(|&i| row_of(&records[i])).collect();
                warn!(
                    "{} {} has both fossil and non-fossil members (mean {:.2}, rows {:?})",
                    key, value, mean, rows
                );
                pass.ambiguous.push(AmbiguousGroup {
                    key,
                    value: value.clone(),
                    mean,
                    members: rows,
                });
            }

            for &i in &members {
                if records[i].classification().is_none() {
                    records[i].set_classification(mean);
                    pass.filled += 1;
                }
            }
        }

        debug!(
            "propagation by {}: {} classes, {} records filled",
            key, pass.groups, pass.filled
        );

        pass
    }

    /// Run every key in order, repeating until nothing changes
    pub fn propagate_all<T, F>(&self, records: &mut [T], row_of: F) -> PropagationSummary
    where
        T: Identified + Classified,
        F: Fn(&T) -> usize,
    {
        let mut summary = PropagationSummary::default();
        let mut seen: BTreeSet<(IdentifierType, String)> = BTreeSet::new();

        for round in 1..=self.max_rounds {
            let mut filled_this_round = 0;
            for &key in &self.keys {
                let pass = self.propagate(records, key, &row_of);
                filled_this_round += pass.filled;
                for group in pass.ambiguous {
                    if seen.insert((group.key, group.value.clone())) {
                        summary.ambiguous.push(group);
                    }
                }
            }

            summary.rounds = round;
            summary.filled += filled_this_round;
            if filled_this_round == 0 {
                summary.converged = true;
                break;
            }
        }

        if !summary.converged {
            warn!(
                "propagation stopped after {} rounds without reaching a fixpoint",
                summary.rounds
            );
        }
        info!(
            "propagation filled {} records in {} rounds, {} ambiguous classes",
            summary.filled,
            summary.rounds,
            summary.ambiguous.len()
        );

        summary
    }
}
