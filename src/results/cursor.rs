use std::collections::HashMap;
use std::sync::Arc;

use crate::types::RowValues;

use super::ResultSet;

/// Forward-only cursor over a non-empty result set.
///
/// A fresh cursor is already positioned on the first row. Values handed out by
/// [`fetch`](Self::fetch) and [`get`](Self::get) borrow the cursor, so they cannot outlive
/// the next [`next_row`](Self::next_row) call.
#[derive(Debug)]
pub struct QueryResult {
    column_names: Arc<Vec<String>>,
    column_index: HashMap<String, usize>,
    row_count: usize,
    current: Vec<RowValues>,
    remaining: std::vec::IntoIter<Vec<RowValues>>,
}

impl QueryResult {
    /// Wrap a result set, or return `None` when it has no rows.
    #[must_use]
    pub fn from_result_set(result_set: ResultSet) -> Option<QueryResult> {
        let (column_names, rows) = result_set.into_parts();
        let row_count = rows.len();
        let mut remaining = rows.into_iter();
        let current = remaining.next()?;
        let column_index = column_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        Some(QueryResult {
            column_names,
            column_index,
            row_count,
            current,
            remaining,
        })
    }

    /// Values of the current row, in column order.
    #[must_use]
    pub fn fetch(&self) -> &[RowValues] {
        &self.current
    }

    /// Value of the current row at column `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&RowValues> {
        self.current.get(index)
    }

    /// Value of the current row in the column called `name`.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&RowValues> {
        self.column_index
            .get(name)
            .and_then(|&idx| self.current.get(idx))
    }

    /// Advance to the next row. Returns `false` once the rows are exhausted; the cursor then
    /// keeps no row and `fetch` returns an empty slice.
    pub fn next_row(&mut self) -> bool {
        match self.remaining.next() {
            Some(row) => {
                self.current = row;
                true
            }
            None => {
                self.current.clear();
                false
            }
        }
    }

    /// Total number of rows the query produced.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    #[must_use]
    pub fn field_count(&self) -> usize {
        self.column_names.len()
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }
}
