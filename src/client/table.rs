//! Tabular results returned by the poller.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::ColumnMetadata;

/// Maximum width for any column in the text grid.
const MAX_COLUMN_WIDTH: usize = 40;

/// Minimum width for any column.
const MIN_COLUMN_WIDTH: usize = 4;

static NULL: Value = Value::Null;

/// Columns and rows of one statement, in server order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    #[serde(default)]
    columns: Vec<ColumnMetadata>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<ColumnMetadata>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows keyed by column name. Missing cells are `null`.
    ///
    /// Keys are sorted by name, and a repeated column name keeps only its
    /// last value. Use [`Table::named_rows`] when server order or duplicate
    /// names matter.
    pub fn records(&self) -> Vec<BTreeMap<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .enumerate()
                    .map(|(i, col)| (col.name.clone(), row.get(i).cloned().unwrap_or(Value::Null)))
                    .collect()
            })
            .collect()
    }

    /// Rows as `(column name, value)` pairs in server column order.
    ///
    /// Every column is present, including repeated names. Missing cells are `null`.
    pub fn named_rows(&self) -> Vec<Vec<(&str, &Value)>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .enumerate()
                    .map(|(i, col)| (col.name.as_str(), row.get(i).unwrap_or(&NULL)))
                    .collect()
            })
            .collect()
    }

    /// All values of the named column, in row order.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.columns.iter().position(|c| c.name == name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(index).unwrap_or(&NULL))
                .collect(),
        )
    }

    fn column_widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self
            .columns
            .iter()
            .map(|col| col.name.chars().count().max(MIN_COLUMN_WIDTH))
            .collect();

        for row in &self.rows {
            for (i, value) in row.iter().enumerate() {
                if let Some(width) = widths.get_mut(i) {
                    *width = (*width).max(cell_text(value).chars().count());
                }
            }
        }

        widths.iter().map(|&w| w.min(MAX_COLUMN_WIDTH)).collect()
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Truncates a string to fit within the given width, adding ellipsis if needed.
fn truncate(s: &str, max_width: usize) -> String {
    if s.chars().count() <= max_width {
        s.to_string()
    } else if max_width <= 3 {
        s.chars().take(max_width).collect()
    } else {
        let kept: String = s.chars().take(max_width - 3).collect();
        format!("{kept}...")
    }
}

fn write_border(f: &mut fmt::Formatter<'_>, widths: &[usize]) -> fmt::Result {
    let segments: Vec<String> = widths.iter().map(|w| "-".repeat(w + 2)).collect();
    writeln!(f, "+{}+", segments.join("+"))
}

fn write_row(
    f: &mut fmt::Formatter<'_>,
    widths: &[usize],
    cells: impl Iterator<Item = String>,
) -> fmt::Result {
    let padded: Vec<String> = cells
        .zip(widths)
        .map(|(cell, &width)| format!(" {:width$} ", truncate(&cell, width), width = width))
        .collect();
    writeln!(f, "|{}|", padded.join("|"))
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.columns.is_empty() {
            return writeln!(f, "(empty result)");
        }

        let widths = self.column_widths();
        write_border(f, &widths)?;
        write_row(f, &widths, self.columns.iter().map(|c| c.name.clone()))?;
        write_border(f, &widths)?;
        for row in &self.rows {
            let cells = (0..widths.len()).map(|i| row.get(i).map(cell_text).unwrap_or_default());
            write_row(f, &widths, cells)?;
        }
        write_border(f, &widths)?;

        let noun = if self.rows.len() == 1 { "row" } else { "rows" };
        writeln!(f, "({} {})", self.rows.len(), noun)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ColumnType;
    use serde_json::json;

    fn sample() -> Table {
        Table::new(
            vec![
                ColumnMetadata::new("a", ColumnType::String),
                ColumnMetadata::new("n", ColumnType::Float),
            ],
            vec![vec![json!("x"), json!(1.5)], vec![json!("y")]],
        )
    }

    #[test]
    fn test_records_keyed_by_column() {
        let records = sample().records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["a"], json!("x"));
        assert_eq!(records[0]["n"], json!(1.5));
        assert_eq!(records[1]["n"], Value::Null);
    }

    #[test]
    fn test_repeated_column_names() {
        let table = Table::new(
            vec![
                ColumnMetadata::new("b", ColumnType::Float),
                ColumnMetadata::new("a", ColumnType::Float),
                ColumnMetadata::new("b", ColumnType::Float),
            ],
            vec![vec![json!(1), json!(2), json!(3)]],
        );

        let records = table.records();
        assert_eq!(records[0].len(), 2);
        assert_eq!(records[0]["b"], json!(3));

        let named = table.named_rows();
        assert_eq!(
            named[0],
            vec![("b", &json!(1)), ("a", &json!(2)), ("b", &json!(3))]
        );
    }

    #[test]
    fn test_named_rows_fill_missing_cells() {
        let table = sample();
        let named = table.named_rows();
        assert_eq!(named[1], vec![("a", &json!("y")), ("n", &Value::Null)]);
    }

    #[test]
    fn test_column_access() {
        let table = sample();
        assert_eq!(table.column("a"), Some(vec![&json!("x"), &json!("y")]));
        assert_eq!(table.column("missing"), None);
        assert_eq!(table.column_names(), vec!["a", "n"]);
    }

    #[test]
    fn test_display_grid() {
        let rendered = sample().to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "+------+------+");
        assert_eq!(lines[1], "| a    | n    |");
        assert_eq!(lines[3], "| x    | 1.5  |");
        assert_eq!(lines[4], "| y    |      |");
        assert_eq!(lines[6], "(2 rows)");
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("héllo wörld", 8), "héllo...");
        assert_eq!(truncate("abc", 8), "abc");
        assert_eq!(truncate("abcdef", 2), "ab");
    }

    #[test]
    fn test_empty_table_display() {
        assert_eq!(Table::default().to_string(), "(empty result)\n");
    }
}
