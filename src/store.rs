// 🗄️ Classification Store - SQLite persistence for runs, holdings and review items
// Holdings are deduplicated per run by a SHA-256 fingerprint, so storing the
// same outcome twice is a no-op.

use crate::holdings::Holding;
use crate::pipeline::RunReport;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub source: String,
    pub holdings: usize,
    pub report: RunReport,
}

impl RunRecord {
    pub fn new(source: &str, report: RunReport) -> Self {
        RunRecord {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            source: source.to_string(),
            holdings: report.holdings,
            report,
        }
    }
}

/// Row stored for one classified holding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredHolding {
    pub fingerprint: String,
    pub row: usize,
    pub name: Option<String>,
    pub owner: Option<String>,
    pub period: Option<String>,
    pub value: Option<f64>,
    pub isin: Option<String>,
    pub lei: Option<String>,
    pub issuer_num: Option<String>,
    pub is_fossil: Option<f64>,
    pub is_fossil_conflict: bool,
}

/// Stable identity of a holding row: source row, period, owner, name,
/// holding type, value and identifiers
pub fn compute_fingerprint(holding: &Holding) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}|", holding.row));
    hasher.update(holding.period.as_deref().unwrap_or(""));
    hasher.update("|");
    hasher.update(holding.owner.as_deref().unwrap_or(""));
    hasher.update("|");
    hasher.update(holding.instrument_name.as_deref().unwrap_or(""));
    hasher.update("|");
    hasher.update(holding.holding_type.as_deref().unwrap_or(""));
    hasher.update(format!("|{:?}", holding.value));
    for (id_type, value) in holding.identifiers.iter() {
        hasher.update(format!("|{}={}", id_type.column_name(), value));
    }
    format!("{:x}", hasher.finalize())
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            started_at TEXT NOT NULL,
            source TEXT NOT NULL,
            holdings INTEGER NOT NULL,
            report TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS holdings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            row_number INTEGER NOT NULL,
            name TEXT,
            owner TEXT,
            period TEXT,
            value REAL,
            isin TEXT,
            lei TEXT,
            issuer_num TEXT,
            is_fossil REAL,
            is_fossil_conflict INTEGER NOT NULL,
            signals TEXT NOT NULL,
            UNIQUE(run_id, fingerprint)
        )",
        [],
    )?;

    // Conflicting records and ambiguous classes awaiting manual review
    conn.execute(
        "CREATE TABLE IF NOT EXISTS review_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            subject TEXT NOT NULL,
            detail TEXT NOT NULL,
            resolved INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_holdings_run ON holdings(run_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_review_run ON review_items(run_id)",
        [],
    )?;

    Ok(())
}

pub fn insert_run(conn: &Connection, run: &RunRecord) -> Result<()> {
    let report_json = serde_json::to_string(&run.report)?;
    conn.execute(
        "INSERT INTO runs (run_id, started_at, source, holdings, report)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            run.run_id,
            run.started_at.to_rfc3339(),
            run.source,
            run.holdings as i64,
            report_json,
        ],
    )
    .with_context(|| format!("Failed to insert run {}", run.run_id))?;
    Ok(())
}

pub fn get_run(conn: &Connection, run_id: &str) -> Result<Option<RunRecord>> {
    let row = conn
        .query_row(
            "SELECT run_id, started_at, source, holdings, report FROM runs WHERE run_id = ?1",
            params![run_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((run_id, started_at, source, holdings, report_json)) = row else {
        return Ok(None);
    };

    let started_at = DateTime::parse_from_rfc3339(&started_at)
        .context("Failed to parse run timestamp")?
        .with_timezone(&Utc);
    let report: RunReport = serde_json::from_str(&report_json).context("Failed to parse run report")?;

    Ok(Some(RunRecord {
        run_id,
        started_at,
        source,
        holdings: holdings as usize,
        report,
    }))
}

/// Insert holdings for a run; returns how many were new
pub fn insert_holdings(conn: &Connection, run_id: &str, holdings: &[Holding]) -> Result<usize> {
    use crate::identifiers::IdentifierType;

    let mut inserted = 0;
    let mut duplicates = 0;

    for holding in holdings {
        let fingerprint = compute_fingerprint(holding);
        let signals_json = serde_json::to_string(&holding.signals)?;

        let result = conn.execute(
            "INSERT INTO holdings (
                run_id, fingerprint, row_number, name, owner, period, value,
                isin, lei, issuer_num, is_fossil, is_fossil_conflict, signals
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                run_id,
                fingerprint,
                holding.row as i64,
                holding.instrument_name,
                holding.owner,
                holding.period,
                holding.value,
                holding.identifiers.get(IdentifierType::Isin),
                holding.identifiers.get(IdentifierType::Lei),
                holding.identifiers.get(IdentifierType::LocalIssuerNumber),
                holding.is_fossil,
                holding.is_fossil_conflict,
                signals_json,
            ],
        );

        match result {
            Ok(_) => inserted += 1,
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                duplicates += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!("stored {} holdings, skipped {} duplicates", inserted, duplicates);

    Ok(inserted)
}

/// Store conflicts and ambiguous classes from the report for review
pub fn insert_review_items(conn: &Connection, run_id: &str, report: &RunReport) -> Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO review_items (run_id, kind, subject, detail) VALUES (?1, ?2, ?3, ?4)",
    )?;

    let mut count = 0;
    for conflict in &report.conflicts {
        stmt.execute(params![
            run_id,
            "conflict",
            format!("row {}", conflict.row),
            serde_json::to_string(conflict)?,
        ])?;
        count += 1;
    }
    for (kind, groups) in [
        ("ambiguous_group", &report.ambiguous_groups),
        ("previous_ambiguity", &report.previous_ambiguities),
    ] {
        for group in groups {
            stmt.execute(params![
                run_id,
                kind,
                format!("{} {}", group.key.column_name(), group.value),
                serde_json::to_string(group)?,
            ])?;
            count += 1;
        }
    }

    Ok(count)
}

pub fn get_holdings_for_run(conn: &Connection, run_id: &str) -> Result<Vec<StoredHolding>> {
    let mut stmt = conn.prepare(
        "SELECT fingerprint, row_number, name, owner, period, value,
                isin, lei, issuer_num, is_fossil, is_fossil_conflict
         FROM holdings
         WHERE run_id = ?1
         ORDER BY row_number",
    )?;

    let holdings = stmt
        .query_map(params![run_id], |row| {
            Ok(StoredHolding {
                fingerprint: row.get(0)?,
                row: row.get::<_, i64>(1)? as usize,
                name: row.get(2)?,
                owner: row.get(3)?,
                period: row.get(4)?,
                value: row.get(5)?,
                isin: row.get(6)?,
                lei: row.get(7)?,
                issuer_num: row.get(8)?,
                is_fossil: row.get(9)?,
                is_fossil_conflict: row.get(10)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(holdings)
}

pub fn count_holdings(conn: &Connection, run_id: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM holdings WHERE run_id = ?1",
        params![run_id],
        |row| row.get(0),
    )?;

    Ok(count)
}

pub fn count_open_review_items(conn: &Connection, run_id: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM review_items WHERE run_id = ?1 AND resolved = 0",
        params![run_id],
        |row| row.get(0),
    )?;

    Ok(count)
}
