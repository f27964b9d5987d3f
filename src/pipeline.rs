// 🏭 Classification Pipeline
// Mapping chain -> signals -> fuzzy matches -> consolidation -> propagation.
// A broken reference step is reported and skipped; it never aborts a run.

use crate::config::{CompiledConfig, SECURITIES_TABLE};
use crate::consolidation::{present_signals, Consolidator};
use crate::holdings::{Holding, Holdings};
use crate::identifiers::IdentifierType;
use crate::mapping::{
    apply_mapping, left_join_prefer_existing, prepare_mapping, MappingCoverage, MappingStep,
    MergePolicy, Projection, ReferenceTable,
};
use crate::matching::{clean_ticker, cut_name_at_ticker, default_backend, NameMatcher, TickerMatcher};
use crate::propagation::{AmbiguousGroup, Propagator};
use crate::reference::{EntityReferenceList, LocalAuthorityList, PreviousClassifications};
use crate::signals::{SignalSource, SignalSet};
use crate::similarity::SimilarityBackend;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// INPUTS
// ============================================================================

/// Everything one run reads; only the holdings are required
#[derive(Debug, Clone, Default)]
pub struct EngineInputs {
    pub holdings: Holdings,
    /// Reference mapping tables keyed by the name mapping steps use
    pub references: BTreeMap<String, ReferenceTable>,
    pub entities: Option<EntityReferenceList>,
    pub local_authority: Option<LocalAuthorityList>,
    pub previous: Option<PreviousClassifications>,
}

impl EngineInputs {
    pub fn new(holdings: Holdings) -> Self {
        EngineInputs {
            holdings,
            ..Default::default()
        }
    }

    pub fn with_reference(mut self, key: &str, table: ReferenceTable) -> Self {
        self.references.insert(key.to_string(), table);
        self
    }

    pub fn with_entities(mut self, entities: EntityReferenceList) -> Self {
        self.entities = Some(entities);
        self
    }

    pub fn with_local_authority(mut self, list: LocalAuthorityList) -> Self {
        self.local_authority = Some(list);
        self
    }

    pub fn with_previous(mut self, previous: PreviousClassifications) -> Self {
        self.previous = Some(previous);
        self
    }
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedStep {
    pub step: String,
    pub table: String,
    pub reason: String,
}

/// A record whose present signals disagree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub row: usize,
    pub name: Option<String>,
    pub signals: Vec<(SignalSource, bool)>,
    pub is_fossil: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationCounts {
    pub fossil: usize,
    pub not_fossil: usize,
    pub fractional: usize,
    pub unknown: usize,
}

impl ClassificationCounts {
    pub fn tally(records: &[Holding]) -> Self {
        let mut counts = ClassificationCounts::default();
        for record in records {
            match record.is_fossil {
                None => counts.unknown += 1,
                Some(v) if v == 1.0 => counts.fossil += 1,
                Some(v) if v == 0.0 => counts.not_fossil += 1,
                Some(_) => counts.fractional += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub holdings: usize,
    pub coverage: Vec<MappingCoverage>,
    pub skipped: Vec<SkippedStep>,
    pub issuers_by_ticker: usize,
    /// Known values per signal source
    pub signal_coverage: BTreeMap<SignalSource, usize>,
    pub conflicts: Vec<ConflictRecord>,
    /// Keys classified both ways in the previously classified table
    pub previous_ambiguities: Vec<AmbiguousGroup>,
    /// Equivalence classes with mixed evidence
    pub ambiguous_groups: Vec<AmbiguousGroup>,
    pub propagation_rounds: usize,
    pub before_propagation: ClassificationCounts,
    pub counts: ClassificationCounts,
}

pub struct PipelineOutcome {
    pub holdings: Holdings,
    pub report: RunReport,
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct ClassificationEngine {
    config: CompiledConfig,
    backend: Arc<dyn SimilarityBackend>,
    consolidator: Consolidator,
    propagator: Propagator,
}

impl ClassificationEngine {
    pub fn new(config: CompiledConfig) -> Self {
        let propagator = Propagator::new(
            config.config.propagation_keys.clone(),
            config.config.max_propagation_rounds,
        );
        ClassificationEngine {
            config,
            backend: default_backend(),
            consolidator: Consolidator::new(),
            propagator,
        }
    }

    /// Swap the string-similarity backend used by both matchers
    pub fn with_backend(mut self, backend: Arc<dyn SimilarityBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn config(&self) -> &CompiledConfig {
        &self.config
    }

    pub fn run(&self, inputs: EngineInputs) -> PipelineOutcome {
        let EngineInputs {
            mut holdings,
            references,
            entities,
            local_authority,
            previous,
        } = inputs;

        let mut report = RunReport {
            holdings: holdings.len(),
            ..Default::default()
        };
        info!("classifying {} holdings", holdings.len());

        // 1. Ticker section off the instrument name
        for holding in holdings.records.iter_mut() {
            if let (Some(name), Some(ticker)) = (&holding.instrument_name, &holding.ticker) {
                holding.company_name = Some(cut_name_at_ticker(name, ticker));
            }
        }

        // 2. Identifier fan-out
        let chain = self.prepare_chain(&references, &mut report.skipped);
        for (step, projection) in &chain {
            let mut coverage =
                apply_mapping(&mut holdings.records, step.by, step.add, projection, step.policy);
            coverage.step = step.label();
            report.coverage.push(coverage);
        }

        // 3. Issuer numbers through local tickers
        if let Some(securities) = references.get(SECURITIES_TABLE) {
            report.issuers_by_ticker = self.fill_issuers_by_ticker(&mut holdings.records, securities);
        }

        // 4. Previous classifications, mapped through the same chain
        if let Some(mut previous) = previous {
            for (step, projection) in &chain {
                let mut coverage =
                    apply_mapping(previous.records_mut(), step.by, step.add, projection, step.policy);
                coverage.step = format!("previous {}", step.label());
                report.coverage.push(coverage);
            }
            report.previous_ambiguities = previous.ambiguous_keys();
            self.apply_previous(&mut holdings.records, &previous);
        }

        // 5. National registry list
        if let Some(list) = &local_authority {
            self.apply_local_authority(&mut holdings.records, list);
        }

        // 6-7. Reference list matching
        if let Some(entities) = &entities {
            self.match_tickers(&mut holdings.records, entities);
            self.match_names(&mut holdings.records, entities);
        }

        report.signal_coverage = signal_coverage(&holdings.records);

        // 8. Consolidation
        for holding in holdings.records.iter_mut() {
            let result = self.consolidator.consolidate(&holding.signals);
            holding.is_fossil = result.is_fossil.map(|v| if v { 1.0 } else { 0.0 });
            holding.is_fossil_conflict = result.conflict;
            if result.conflict {
                debug!(row = holding.row, "conflicting signals");
                report.conflicts.push(ConflictRecord {
                    row: holding.row,
                    name: holding.instrument_name.clone(),
                    signals: present_signals(&holding.signals),
                    is_fossil: result.is_fossil,
                });
            }
        }
        report.before_propagation = ClassificationCounts::tally(&holdings.records);
        if !report.conflicts.is_empty() {
            warn!("{} holdings have conflicting signals", report.conflicts.len());
        }

        // 9. Equivalence-class propagation
        let summary = self
            .propagator
            .propagate_all(&mut holdings.records, |h: &Holding| h.row);
        report.propagation_rounds = summary.rounds;
        report.ambiguous_groups = summary.ambiguous;
        report.counts = ClassificationCounts::tally(&holdings.records);

        info!(
            "final is_fossil: {} fossil, {} not fossil, {} fractional, {} unknown",
            report.counts.fossil,
            report.counts.not_fossil,
            report.counts.fractional,
            report.counts.unknown
        );

        PipelineOutcome { holdings, report }
    }

    /// Prepare every configured step, reporting the ones that cannot run
    fn prepare_chain(
        &self,
        references: &BTreeMap<String, ReferenceTable>,
        skipped: &mut Vec<SkippedStep>,
    ) -> Vec<(MappingStep, Projection)> {
        let mut chain = Vec::new();
        for step in &self.config.config.mapping_steps {
            let Some(reference) = references.get(&step.table) else {
                debug!("reference table '{}' not supplied, step {} skipped", step.table, step.label());
                skipped.push(SkippedStep {
                    step: step.label(),
                    table: step.table.clone(),
                    reason: "reference table not supplied".to_string(),
                });
                continue;
            };

            match prepare_mapping(reference, step.by, step.add, &self.config.normalizer) {
                Ok(projection) => chain.push((step.clone(), projection)),
                Err(err) => {
                    warn!("mapping step {} skipped: {}", step.label(), err);
                    skipped.push(SkippedStep {
                        step: step.label(),
                        table: step.table.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        chain
    }

    fn fill_issuers_by_ticker(&self, records: &mut [Holding], securities: &ReferenceTable) -> usize {
        let Some(issuer_col) = securities.column_of(IdentifierType::LocalIssuerNumber) else {
            debug!("securities table has no issuer column, ticker fill skipped");
            return 0;
        };
        let separators = &self.config.ticker_separators;
        let normalizer = &self.config.normalizer;
        let table = &securities.table;

        let mut filled = 0;
        for column in &self.config.config.issuer_ticker_columns {
            let Some(ticker_col) = table.column_index(column) else {
                continue;
            };
            let projection = Projection::from_pairs((0..table.len()).map(|row| {
                (
                    table.cell(row, ticker_col).and_then(|t| clean_ticker(t, separators)),
                    normalizer.normalize_opt(table.cell(row, issuer_col)),
                )
            }));

            let coverage = left_join_prefer_existing(
                records,
                |h: &Holding| {
                    if !h.is_local() || h.identifiers.contains(IdentifierType::LocalIssuerNumber) {
                        return None;
                    }
                    h.ticker.as_deref().and_then(|t| clean_ticker(t, separators))
                },
                IdentifierType::LocalIssuerNumber,
                &projection,
                MergePolicy::PreferExisting,
            );
            debug!("issuers filled through '{}': {}", column, coverage.filled);
            filled += coverage.filled;
        }

        info!("issuer numbers filled by ticker: {}", filled);
        filled
    }

    fn apply_previous(&self, records: &mut [Holding], previous: &PreviousClassifications) {
        let index = previous.index();
        for holding in records.iter_mut() {
            let ids = &holding.identifiers;
            let by_security = ids
                .get(IdentifierType::Isin)
                .and_then(|v| index.security(v))
                .or_else(|| {
                    ids.get(IdentifierType::LocalSecurityNumber)
                        .and_then(|v| index.security(v))
                });
            let by_issuer = ids
                .get(IdentifierType::LocalIssuerNumber)
                .and_then(|v| index.issuer(v));
            let by_lei = ids.get(IdentifierType::Lei).and_then(|v| index.lei(v));

            record_found(&mut holding.signals, SignalSource::PrevSecurity, by_security);
            record_found(&mut holding.signals, SignalSource::PrevIssuer, by_issuer);
            record_found(&mut holding.signals, SignalSource::PrevLei, by_lei);
        }
    }

    fn apply_local_authority(&self, records: &mut [Holding], list: &LocalAuthorityList) {
        for holding in records.iter_mut() {
            if let Some(flag) = holding
                .identifiers
                .get(IdentifierType::LocalIssuerNumber)
                .and_then(|v| list.by_issuer(v))
            {
                holding.signals.record(SignalSource::LocalListIssuer, flag);
            }
            if let Some(flag) = holding
                .identifiers
                .get(IdentifierType::LocalCorporateNumber)
                .and_then(|v| list.by_corporate(v))
            {
                holding.signals.record(SignalSource::LocalListCorporate, flag);
            }
        }
    }

    fn match_tickers(&self, records: &mut [Holding], entities: &EntityReferenceList) {
        let matcher = TickerMatcher::new(entities.entities(), &self.config, self.backend.clone());
        let threshold = self.config.thresholds().ticker_corroboration;
        let skip_if = &self.config.config.ticker_skip_if_present;

        let mut matched = 0;
        for holding in records.iter_mut() {
            if skip_if.iter().any(|t| holding.identifiers.contains(*t)) {
                continue;
            }
            let Some(ticker) = holding.ticker.as_deref() else {
                continue;
            };
            let name = holding.match_name().unwrap_or("");
            if let Some(found) = matcher.match_ticker(name, ticker) {
                holding.signals.record(SignalSource::TickerMatch, found.signal(threshold));
                holding.ticker_match = Some(found);
                matched += 1;
            }
        }
        info!("ticker matches: {}", matched);
    }

    fn match_names(&self, records: &mut [Holding], entities: &EntityReferenceList) {
        let matcher = NameMatcher::new(entities.entities(), &self.config, self.backend.clone());
        let threshold = self.config.thresholds().name_classification;

        let results = {
            let names: Vec<&str> = records.iter().map(|h| h.match_name().unwrap_or("")).collect();
            matcher.match_names(&names)
        };

        let mut matched = 0;
        for (holding, found) in records.iter_mut().zip(results) {
            if let Some(found) = found {
                holding.signals.record(SignalSource::NameMatch, found.signal(threshold));
                holding.name_match = Some(found);
                matched += 1;
            }
        }
        info!("name matches above acceptance: {}", matched);
    }
}

fn record_found(signals: &mut SignalSet, source: SignalSource, value: Option<bool>) {
    if value.is_some() {
        signals.record(source, value);
    }
}

fn signal_coverage(records: &[Holding]) -> BTreeMap<SignalSource, usize> {
    let mut coverage = BTreeMap::new();
    for source in SignalSource::ALL {
        let known = records
            .iter()
            .filter(|h| h.signals.get(source).is_some())
            .count();
        info!("{} signal coverage: {} out of {}", source, known, records.len());
        coverage.insert(source, known);
    }
    coverage
}
