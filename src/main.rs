// 🛢️ fossil-classify - command line entry point
// classify: holdings CSV + reference CSVs -> classified CSV (+ optional SQLite store)
// detect:   print which columns of a CSV hold which identifier types

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use fossil_classification::{
    insert_holdings, insert_review_items, insert_run, load_csv, setup_database, write_csv,
    ClassificationEngine, EngineConfig, EngineInputs, EntityListSchema, EntityReferenceList,
    HoldingSchema, Holdings, LocalAuthorityList, LocalAuthoritySchema, PreviousClassifications,
    PreviousSchema, ReferenceTable, RunRecord, TypeDetector, LEI_TABLE, SECURITIES_TABLE,
};

#[derive(Parser)]
#[command(name = "fossil-classify", version, about = "Classify fund holdings as fossil-fuel or not")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve identifiers and classify every holding
    Classify {
        /// Holdings CSV
        holdings: PathBuf,

        /// Securities mapping table (security_num, isin, issuer_num, corporate_num, tickers)
        #[arg(long)]
        securities: Option<PathBuf>,

        /// ISIN to LEI mapping table
        #[arg(long)]
        isin_lei: Option<PathBuf>,

        /// Entity reference list with fossil screens
        #[arg(long)]
        entities: Option<PathBuf>,

        /// National registry list (issuer / corporate number + flag)
        #[arg(long)]
        registry: Option<PathBuf>,

        /// Previously classified identifiers
        #[arg(long)]
        previous: Option<PathBuf>,

        /// Engine configuration JSON
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output CSV
        #[arg(short, long, default_value = "classified.csv")]
        output: PathBuf,

        /// SQLite database to store the run in
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Print the detected identifier columns of a CSV
    Detect {
        csv: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fossil_classification=info,fossil_classify=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Classify {
            holdings,
            securities,
            isin_lei,
            entities,
            registry,
            previous,
            config,
            output,
            db,
        } => run_classify(ClassifyArgs {
            holdings,
            securities,
            isin_lei,
            entities,
            registry,
            previous,
            config,
            output,
            db,
        }),
        Command::Detect { csv, config } => run_detect(&csv, config.as_deref()),
    }
}

struct ClassifyArgs {
    holdings: PathBuf,
    securities: Option<PathBuf>,
    isin_lei: Option<PathBuf>,
    entities: Option<PathBuf>,
    registry: Option<PathBuf>,
    previous: Option<PathBuf>,
    config: Option<PathBuf>,
    output: PathBuf,
    db: Option<PathBuf>,
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path),
        None => Ok(EngineConfig::default()),
    }
}

/// Bind identifier columns by canonical header first, then by grammar
fn load_reference(path: &Path, detector: &TypeDetector) -> Result<ReferenceTable> {
    let table = load_csv(path)?;
    info!("loaded reference table {} ({} rows)", table.name, table.len());
    Ok(ReferenceTable::new(table).bind_by_header().bind_detected(detector))
}

fn run_classify(args: ClassifyArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?
        .compile()
        .context("Invalid engine configuration")?;
    let detector = TypeDetector::new(&config);

    // 1. Holdings
    let table = load_csv(&args.holdings)?;
    let holdings = Holdings::from_table(&table, &HoldingSchema::default(), &config)
        .with_context(|| format!("Failed to read holdings from {:?}", args.holdings))?;
    info!("loaded {} holdings", holdings.len());

    // 2. References
    let mut inputs = EngineInputs::new(holdings);
    if let Some(path) = &args.securities {
        inputs = inputs.with_reference(SECURITIES_TABLE, load_reference(path, &detector)?);
    }
    if let Some(path) = &args.isin_lei {
        inputs = inputs.with_reference(LEI_TABLE, load_reference(path, &detector)?);
    }
    if let Some(path) = &args.entities {
        let list = EntityReferenceList::from_table(&load_csv(path)?, &EntityListSchema::default())?;
        inputs = inputs.with_entities(list);
    }
    if let Some(path) = &args.registry {
        let list =
            LocalAuthorityList::from_table(&load_csv(path)?, &LocalAuthoritySchema::default(), &config)?;
        inputs = inputs.with_local_authority(list);
    }
    if let Some(path) = &args.previous {
        let previous =
            PreviousClassifications::from_table(&load_csv(path)?, &PreviousSchema::default(), &config)?;
        inputs = inputs.with_previous(previous);
    }

    // 3. Run
    let engine = ClassificationEngine::new(config);
    let outcome = engine.run(inputs);

    // 4. Output
    write_csv(&outcome.holdings.to_table(), &args.output)?;
    info!("wrote {:?}", args.output);

    // 5. Store
    if let Some(db_path) = &args.db {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database {:?}", db_path))?;
        setup_database(&conn)?;

        let run = RunRecord::new(&args.holdings.display().to_string(), outcome.report.clone());
        insert_run(&conn, &run)?;
        insert_holdings(&conn, &run.run_id, &outcome.holdings.records)?;
        let review = insert_review_items(&conn, &run.run_id, &outcome.report)?;
        info!("stored run {} with {} review items", run.run_id, review);
    }

    Ok(())
}

fn run_detect(csv: &Path, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?
        .compile()
        .context("Invalid engine configuration")?;
    let table = load_csv(csv)?;
    let detector = TypeDetector::new(&config);

    println!("{} ({} rows)", table.name, table.len());
    for (id_type, found) in detector.detect_all(&table) {
        match found {
            Some(col) => println!(
                "  {:<24} {} ({}/{} values match)",
                id_type.to_string(),
                col.column,
                col.matches,
                col.rows
            ),
            None => println!("  {:<24} -", id_type.to_string()),
        }
    }

    Ok(())
}
