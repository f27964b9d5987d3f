// 📋 Table - in-memory tabular input
// Header + string cells. Holding files, mapping tables, reference lists and
// previous classifications all arrive in this shape before being typed.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Source label used in logs and error messages
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Table {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table from string literals; empty cells become `None`
    pub fn from_rows(name: impl Into<String>, columns: &[&str], rows: &[Vec<&str>]) -> Self {
        let mut table = Table::new(name, columns.iter().map(|c| c.to_string()).collect());
        for row in rows {
            table.push_row(row.iter().map(|c| c.to_string()).collect());
        }
        table
    }

    /// Append a row, padding or truncating it to the header width
    pub fn push_row(&mut self, cells: Vec<String>) {
        let mut row: Vec<Option<String>> = cells
            .into_iter()
            .map(|c| if c.is_empty() { None } else { Some(c) })
            .collect();
        row.resize(self.columns.len(), None);
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        let wanted = column.trim();
        self.columns.iter().position(|c| c.trim() == wanted)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_index(column).is_some()
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .and_then(|c| c.as_deref())
    }

    /// All cells of one column, in row order
    pub fn column_values(&self, column: usize) -> impl Iterator<Item = Option<&str>> + '_ {
        self.rows
            .iter()
            .map(move |r| r.get(column).and_then(|c| c.as_deref()))
    }

    /// Adds a column if missing and returns its index
    pub fn ensure_column(&mut self, column: &str) -> usize {
        if let Some(idx) = self.column_index(column) {
            return idx;
        }
        self.columns.push(column.to_string());
        for row in &mut self.rows {
            row.push(None);
        }
        self.columns.len() - 1
    }

    pub fn set_cell(&mut self, row: usize, column: usize, value: Option<String>) {
        if let Some(cell) = self.rows.get_mut(row).and_then(|r| r.get_mut(column)) {
            *cell = value;
        }
    }
}

// ============================================================================
// CSV I/O
// ============================================================================

pub fn load_csv(csv_path: &Path) -> Result<Table> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("Failed to open CSV file: {:?}", csv_path))?;
    let name = csv_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| csv_path.display().to_string());
    read_csv(name, file)
}

pub fn read_csv<R: Read>(name: impl Into<String>, reader: R) -> Result<Table> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let columns: Vec<String> = rdr
        .headers()
        .context("Failed to read CSV header")?
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let h = if i == 0 { h.trim_start_matches('\u{feff}') } else { h };
            h.trim().to_string()
        })
        .collect();

    let mut table = Table::new(name, columns);
    for (line, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read CSV record {}", line + 1))?;
        table.push_row(record.iter().map(|c| c.to_string()).collect());
    }

    Ok(table)
}

pub fn write_csv(table: &Table, csv_path: &Path) -> Result<()> {
    let file = std::fs::File::create(csv_path)
        .with_context(|| format!("Failed to create CSV file: {:?}", csv_path))?;
    write_csv_to(table, file)
}

pub fn write_csv_to<W: Write>(table: &Table, writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(&table.columns)
        .context("Failed to write CSV header")?;
    for row in &table.rows {
        wtr.write_record(row.iter().map(|c| c.as_deref().unwrap_or("")))
            .context("Failed to write CSV record")?;
    }
    wtr.flush().context("Failed to flush CSV writer")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_csv_strips_bom_and_blanks() {
        let data = "\u{feff}Name , ISIN\nAcme Corp,US0378331005\nOther,\n";
        let table = read_csv("mem", data.as_bytes()).unwrap();

        assert_eq!(table.columns, vec!["Name", "ISIN"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.cell(0, 1), Some("US0378331005"));
        assert_eq!(table.cell(1, 1), None);
    }

    #[test]
    fn test_short_rows_are_padded() {
        let data = "a,b,c\n1\n";
        let table = read_csv("mem", data.as_bytes()).unwrap();
        assert_eq!(table.rows[0].len(), 3);
        assert_eq!(table.cell(0, 2), None);
    }

    #[test]
    fn test_ensure_column() {
        let mut table = Table::from_rows("t", &["a"], &[vec!["1"], vec!["2"]]);
        let idx = table.ensure_column("b");
        assert_eq!(idx, 1);
        assert_eq!(table.ensure_column("b"), 1);
        table.set_cell(1, idx, Some("x".to_string()));
        assert_eq!(table.cell(1, 1), Some("x"));
        assert_eq!(table.cell(0, 1), None);
    }

    #[test]
    fn test_write_then_read() {
        let table = Table::from_rows("t", &["name", "value"], &[vec!["ACME, INC", "10"]]);
        let mut buf = Vec::new();
        write_csv_to(&table, &mut buf).unwrap();
        let back = read_csv("t", buf.as_slice()).unwrap();
        assert_eq!(back.cell(0, 0), Some("ACME, INC"));
        assert_eq!(back.columns, table.columns);
    }
}
