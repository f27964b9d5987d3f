// End-to-end runs of the classification engine: in-memory tables, then a
// CSV -> engine -> CSV -> SQLite round trip through temporary files.

use fossil_classification::{
    count_holdings, get_holdings_for_run, get_run, insert_holdings, insert_review_items,
    insert_run, load_csv, setup_database, write_csv, ClassificationEngine, CompiledConfig,
    EngineConfig, EngineInputs, HoldingSchema, Holdings, IdentifierType, LocalAuthorityList,
    LocalAuthoritySchema, PreviousClassifications, PreviousSchema, ReferenceTable, RunRecord,
    SignalSource, Table, SECURITIES_TABLE,
};
use rusqlite::Connection;
use std::fs;
use std::path::Path;

fn engine() -> ClassificationEngine {
    ClassificationEngine::new(EngineConfig::default().compile().unwrap())
}

fn securities() -> ReferenceTable {
    let table = Table::from_rows(
        "securities",
        &["security_num", "isin", "issuer_num", "corporate_num"],
        &[
            vec!["", "US0000000AA1", "123", ""],
            vec!["1081124", "IL0010811243", "1095", "520000118"],
        ],
    );
    ReferenceTable::new(table).bind_by_header()
}

fn write_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn column(table: &Table, name: &str) -> Vec<Option<String>> {
    let col = table.column_index(name).unwrap();
    (0..table.len())
        .map(|row| table.cell(row, col).map(str::to_string))
        .collect()
}

#[test]
fn test_issuer_resolved_through_mapping_inherits_registry_verdict() {
    let config = CompiledConfig::default();
    let holdings_table = Table::from_rows(
        "holdings",
        &["name", "isin", "issuer_num", "is_fossil_local_list_issuer"],
        &[
            vec!["Alpha Energy", "US0000000AA1", "", ""],
            vec!["Beta Energy", "", "123", "1"],
        ],
    );
    let holdings = Holdings::from_table(&holdings_table, &HoldingSchema::default(), &config).unwrap();

    let outcome = engine().run(EngineInputs::new(holdings).with_reference(SECURITIES_TABLE, securities()));
    let records = &outcome.holdings.records;

    // Record A only gets the issuer through the mapping table
    assert_eq!(records[0].identifiers.get(IdentifierType::LocalIssuerNumber), Some("123"));
    assert_eq!(records[0].signals.get(SignalSource::LocalListIssuer), None);

    assert_eq!(outcome.report.before_propagation.fossil, 1);
    assert_eq!(outcome.report.before_propagation.unknown, 1);

    assert_eq!(records[0].is_fossil, Some(1.0));
    assert_eq!(records[1].is_fossil, Some(1.0));
    assert!(!records[0].is_fossil_conflict);
    assert_eq!(outcome.report.counts.fossil, 2);
    assert!(outcome.report.ambiguous_groups.is_empty());
}

#[test]
fn test_mixed_class_is_flagged_and_fills_unknowns_fractionally() {
    let config = CompiledConfig::default();
    let holdings_table = Table::from_rows(
        "holdings",
        &["name", "isin", "is_fossil_prev_security", "is_fossil_company_name"],
        &[
            vec!["Delta Bond 2025", "US0378331005", "1", ""],
            vec!["Delta Bond 2030", "US0378331005", "", "0"],
            vec!["Delta Bond 2040", "US0378331005", "", ""],
        ],
    );
    let holdings = Holdings::from_table(&holdings_table, &HoldingSchema::default(), &config).unwrap();

    let outcome = engine().run(EngineInputs::new(holdings));
    let records = &outcome.holdings.records;

    assert_eq!(records[0].is_fossil, Some(1.0));
    assert_eq!(records[1].is_fossil, Some(0.0));
    assert_eq!(records[2].is_fossil, Some(0.5));
    assert_eq!(outcome.report.counts.fractional, 1);

    assert_eq!(outcome.report.ambiguous_groups.len(), 1);
    let group = &outcome.report.ambiguous_groups[0];
    assert_eq!(group.key, IdentifierType::Isin);
    assert_eq!(group.members, vec![0, 1, 2]);
}

#[test]
fn test_csv_run_written_and_stored() {
    let dir = tempfile::tempdir().unwrap();
    let holdings_path = write_file(
        dir.path(),
        "holdings.csv",
        "name,isin,issuer_num,value\n\
         Alpha Energy,US0000000AA1,,\"1,250.00\"\n\
         Beta Energy,,123,300\n\
         Gamma Retail,US0378331005,,75.5\n",
    );
    let registry_path = write_file(
        dir.path(),
        "registry.csv",
        "issuer_num,corporate_num,blacklist\n123,,כן\n",
    );
    let previous_path = write_file(
        dir.path(),
        "previous.csv",
        "security_num,issuer_or_corp_num,lei,is_fossil,classification_date\n\
         US0378331005,,,0,2021-06-30\n",
    );

    let config = EngineConfig::default().compile().unwrap();
    let holdings =
        Holdings::from_table(&load_csv(&holdings_path).unwrap(), &HoldingSchema::default(), &config).unwrap();
    let registry = LocalAuthorityList::from_table(
        &load_csv(&registry_path).unwrap(),
        &LocalAuthoritySchema::default(),
        &config,
    )
    .unwrap();
    let previous = PreviousClassifications::from_table(
        &load_csv(&previous_path).unwrap(),
        &PreviousSchema::default(),
        &config,
    )
    .unwrap();

    let outcome = ClassificationEngine::new(config).run(
        EngineInputs::new(holdings)
            .with_reference(SECURITIES_TABLE, securities())
            .with_local_authority(registry)
            .with_previous(previous),
    );
    assert_eq!(outcome.holdings.records[0].value, Some(1250.0));

    // Output CSV keeps the source columns and adds the results
    let output_path = dir.path().join("classified.csv");
    write_csv(&outcome.holdings.to_table(), &output_path).unwrap();
    let output = load_csv(&output_path).unwrap();

    assert_eq!(&output.columns[..4], &["name", "isin", "issuer_num", "value"]);
    assert_eq!(
        column(&output, "is_fossil"),
        vec![Some("1".to_string()), Some("1".to_string()), Some("0".to_string())]
    );
    assert_eq!(
        column(&output, "issuer_num"),
        vec![Some("123".to_string()), Some("123".to_string()), None]
    );
    assert_eq!(
        column(&output, "is_fossil_prev_security"),
        vec![None, None, Some("0".to_string())]
    );

    // Stored run
    let conn = Connection::open(dir.path().join("runs.db")).unwrap();
    setup_database(&conn).unwrap();
    let run = RunRecord::new("holdings.csv", outcome.report.clone());
    insert_run(&conn, &run).unwrap();

    assert_eq!(insert_holdings(&conn, &run.run_id, &outcome.holdings.records).unwrap(), 3);
    assert_eq!(insert_holdings(&conn, &run.run_id, &outcome.holdings.records).unwrap(), 0);
    assert_eq!(count_holdings(&conn, &run.run_id).unwrap(), 3);
    assert_eq!(insert_review_items(&conn, &run.run_id, &outcome.report).unwrap(), 0);

    let stored = get_holdings_for_run(&conn, &run.run_id).unwrap();
    assert_eq!(stored[0].issuer_num.as_deref(), Some("123"));
    assert_eq!(stored[2].is_fossil, Some(0.0));

    let loaded = get_run(&conn, &run.run_id).unwrap().unwrap();
    assert_eq!(loaded.report.counts.fossil, 2);
    assert_eq!(loaded.report.counts.not_fossil, 1);
}
