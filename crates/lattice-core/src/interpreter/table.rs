//! Tables parsed from `%table` results.

use serde::{Deserialize, Serialize};

use super::result::{InterpreterResult, ResultType};
use crate::error::{Error, Result};

/// Column definition of a [`TableData`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    name: String,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Tab separated table, stored column-major.
///
/// The first line holds the column names. Rows shorter than the header leave
/// the missing cells empty (`None`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableData {
    columns: Vec<ColumnDef>,
    data: Vec<Vec<Option<String>>>,
}

impl TableData {
    /// Parse the message of a table result.
    pub fn from_result(result: &InterpreterResult) -> Result<Self> {
        if result.result_type() != ResultType::Table {
            return Err(Error::NotTable);
        }
        Ok(Self::parse(result.message()))
    }

    /// Parse newline separated rows of tab separated cells.
    pub fn parse(text: &str) -> Self {
        let rows = split_trimmed(text, '\n');
        let Some((header, body)) = rows.split_first() else {
            return Self::default();
        };

        let columns: Vec<ColumnDef> = split_trimmed(header, '\t')
            .into_iter()
            .map(ColumnDef::new)
            .collect();
        let mut data = vec![Vec::with_capacity(body.len()); columns.len()];

        for row in body {
            let cells = split_trimmed(row, '\t');
            for (c, column) in data.iter_mut().enumerate() {
                column.push(cells.get(c).map(|cell| cell.to_string()));
            }
        }

        Self { columns, data }
    }

    pub fn column_defs(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, c: usize) -> Option<&[Option<String>]> {
        self.data.get(c).map(Vec::as_slice)
    }

    /// Cell at `row`, `column`; `None` when out of range or empty.
    pub fn data(&self, row: usize, column: usize) -> Option<&str> {
        self.data.get(column)?.get(row)?.as_deref()
    }

    /// Number of data rows.
    pub fn len(&self) -> usize {
        self.data.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split and drop trailing empty pieces.
fn split_trimmed(text: &str, separator: char) -> Vec<&str> {
    let mut pieces: Vec<&str> = text.split(separator).collect();
    while pieces.last().is_some_and(|piece| piece.is_empty()) {
        pieces.pop();
    }
    pieces
}
