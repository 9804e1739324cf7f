use std::sync::Arc;

use crate::types::RowValues;

/// Rows produced by one native query, in server order.
///
/// Drivers fill this in; callers never see it directly but read it through a
/// [`QueryResult`](super::QueryResult) cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Column names shared by all rows
    column_names: Arc<Vec<String>>,
    rows: Vec<Vec<RowValues>>,
}

impl ResultSet {
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>) -> ResultSet {
        ResultSet {
            column_names,
            rows: Vec::new(),
        }
    }

    /// Create a new result set with preallocated room for `capacity` rows
    #[must_use]
    pub fn with_capacity(column_names: Arc<Vec<String>>, capacity: usize) -> ResultSet {
        ResultSet {
            column_names,
            rows: Vec::with_capacity(capacity),
        }
    }

    /// Build a result set from column names and literal rows; handy for drivers and tests.
    #[must_use]
    pub fn from_rows<S: Into<String>>(columns: Vec<S>, rows: Vec<Vec<RowValues>>) -> ResultSet {
        ResultSet {
            column_names: Arc::new(columns.into_iter().map(Into::into).collect()),
            rows,
        }
    }

    #[must_use]
    pub fn column_names(&self) -> &Arc<Vec<String>> {
        &self.column_names
    }

    /// Append one row. The row must have one value per column.
    pub fn push_row(&mut self, row_values: Vec<RowValues>) {
        debug_assert_eq!(row_values.len(), self.column_names.len());
        self.rows.push(row_values);
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Arc<Vec<String>>, Vec<Vec<RowValues>>) {
        (self.column_names, self.rows)
    }
}
