//! Database row representation.

use crate::Result;
use crate::error::Error;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Column metadata shared across all rows in a result set.
///
/// Wrapped in `Arc` so all rows from the same query share the same column
/// information.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    /// Column names in order
    names: Vec<String>,
    /// Name -> index mapping for O(1) lookup
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    /// Create new column info from a list of column names.
    pub fn new(names: Vec<String>) -> Self {
        let name_to_index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names,
            name_to_index,
        }
    }

    /// Get the number of columns.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Get the index of a column by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Check if a column exists.
    pub fn contains(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    /// Get all column names.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned from a query.
///
/// Rows provide both index-based and name-based access to column values.
#[derive(Debug, Clone)]
pub struct Row {
    /// Column values in order
    values: Vec<Value>,
    /// Shared column metadata
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// Create a new row with the given columns and values.
    ///
    /// For multiple rows from the same result set, prefer `with_columns`
    /// to share the column metadata.
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        let columns = Arc::new(ColumnInfo::new(column_names));
        Self { values, columns }
    }

    /// Create a new row with shared column metadata.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    /// Get the shared column metadata.
    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    /// Get the number of columns in this row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if this row is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index. O(1) operation.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name. O(1) operation via HashMap lookup.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Check if a column exists by name.
    pub fn contains_column(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    /// Get all column names.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.names().iter().map(String::as_str)
    }

    /// Iterate over (column_name, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

/// Wire shape for a cached result set: one column header, dense value rows.
#[derive(Serialize, Deserialize)]
struct RowSetRepr {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// Encode a result set as JSON for cache storage.
///
/// All rows are assumed to come from the same query and therefore share one
/// column layout; an empty slice encodes with no columns.
pub fn encode_rows(rows: &[Row]) -> Result<serde_json::Value> {
    let repr = RowSetRepr {
        columns: rows
            .first()
            .map(|r| r.columns.names().to_vec())
            .unwrap_or_default(),
        rows: rows.iter().map(|r| r.values.clone()).collect(),
    };
    serde_json::to_value(&repr).map_err(Error::from)
}

/// Decode a result set previously produced by `encode_rows`.
pub fn decode_rows(json: &serde_json::Value) -> Result<Vec<Row>> {
    let repr: RowSetRepr = serde_json::from_value(json.clone())?;
    let columns = Arc::new(ColumnInfo::new(repr.columns));
    Ok(repr
        .rows
        .into_iter()
        .map(|values| Row::with_columns(Arc::clone(&columns), values))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_basic_access() {
        let row = Row::new(
            vec!["id".to_string(), "name".to_string()],
            vec![Value::Int(1), Value::Text("Alice".to_string())],
        );

        assert_eq!(row.len(), 2);
        assert!(!row.is_empty());

        assert_eq!(row.get(0), Some(&Value::Int(1)));
        assert_eq!(row.get(2), None);

        assert_eq!(row.get_by_name("id"), Some(&Value::Int(1)));
        assert_eq!(
            row.get_by_name("name"),
            Some(&Value::Text("Alice".to_string()))
        );
        assert_eq!(row.get_by_name("missing"), None);
    }

    #[test]
    fn test_row_shared_columns() {
        let columns = Arc::new(ColumnInfo::new(vec!["id".to_string()]));

        let row1 = Row::with_columns(Arc::clone(&columns), vec![Value::Int(1)]);
        let row2 = Row::with_columns(Arc::clone(&columns), vec![Value::Int(2)]);

        assert!(Arc::ptr_eq(&row1.column_info(), &row2.column_info()));
        assert_eq!(row1.get_by_name("id"), Some(&Value::Int(1)));
        assert_eq!(row2.get_by_name("id"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_row_contains_column() {
        let row = Row::new(vec!["exists".to_string()], vec![Value::Int(1)]);

        assert!(row.contains_column("exists"));
        assert!(!row.contains_column("missing"));
    }

    #[test]
    fn test_row_iterators() {
        let row = Row::new(
            vec!["a".to_string(), "b".to_string()],
            vec![Value::Int(1), Value::Int(2)],
        );

        let names: Vec<_> = row.column_names().collect();
        assert_eq!(names, vec!["a", "b"]);

        let pairs: Vec<_> = row.iter().collect();
        assert_eq!(pairs, vec![("a", &Value::Int(1)), ("b", &Value::Int(2))]);
    }

    #[test]
    fn test_encode_decode_rows() {
        let columns = Arc::new(ColumnInfo::new(vec!["id".to_string(), "name".to_string()]));
        let rows = vec![
            Row::with_columns(
                Arc::clone(&columns),
                vec![Value::Int(1), Value::Text("a".to_string())],
            ),
            Row::with_columns(Arc::clone(&columns), vec![Value::Int(2), Value::Null]),
        ];

        let json = encode_rows(&rows).unwrap();
        let decoded = decode_rows(&json).unwrap();

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].get_by_name("id"), Some(&Value::Int(1)));
        assert_eq!(
            decoded[0].get_by_name("name"),
            Some(&Value::Text("a".to_string()))
        );
        assert_eq!(decoded[1].get_by_name("name"), Some(&Value::Null));
    }

    #[test]
    fn test_encode_empty_result() {
        let json = encode_rows(&[]).unwrap();
        let decoded = decode_rows(&json).unwrap();
        assert!(decoded.is_empty());
    }
}
