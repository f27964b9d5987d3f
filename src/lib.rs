// Fossil Classification - Core Library
// Identity resolution and fossil-fuel classification of fund holdings.
// Exposes all modules for use in the CLI and tests

pub mod error;
pub mod identifiers;
pub mod table;
pub mod config;
pub mod detection;
pub mod mapping;
pub mod signals;
pub mod similarity;
pub mod matching;
pub mod reference;
pub mod holdings;
pub mod consolidation;
pub mod propagation;
pub mod pipeline;
pub mod store;

// Re-export commonly used types
pub use error::{EngineError, Result as EngineResult};
pub use identifiers::{normalize, Grammars, IdentifierSet, IdentifierType, Identified, Normalizer};
pub use table::{load_csv, read_csv, write_csv, write_csv_to, Table};
pub use config::{CompiledConfig, EngineConfig, MatchThresholds, LEI_TABLE, SECURITIES_TABLE};
pub use detection::{DetectedColumn, TypeDetector};
pub use mapping::{
    apply_mapping, choose_best_issuer_num, left_join_prefer_existing, prepare_mapping,
    MappingCoverage, MappingStep, MergePolicy, Projection, ReferenceTable,
};
pub use signals::{parse_flag, SignalSet, SignalSource};
pub use similarity::{IndelRatio, LevenshteinRatio, SimilarityBackend};
pub use matching::{
    best_match, clean_ticker, cut_name_at_ticker, default_backend,
    NameCleaner, NameMatch, NameMatcher, TickerMatch, TickerMatcher,
};
pub use reference::{
    EntityListSchema, EntityReferenceList, LocalAuthorityList, LocalAuthoritySchema,
    PreviousClassification, PreviousClassifications, PreviousSchema, ReferenceEntity,
};
pub use holdings::{Holding, HoldingSchema, Holdings};
pub use consolidation::{Consolidation, Consolidator};
pub use propagation::{AmbiguousGroup, Classified, PropagationSummary, Propagator};
pub use pipeline::{
    ClassificationCounts, ClassificationEngine, ConflictRecord, EngineInputs,
    PipelineOutcome, RunReport, SkippedStep,
};
pub use store::{
    count_holdings, get_holdings_for_run, get_run, insert_holdings, insert_review_items,
    insert_run, setup_database, RunRecord, StoredHolding,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
