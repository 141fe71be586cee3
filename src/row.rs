//! Engine-neutral result rows.

use crate::executor::EngineError;
use sea_query::{Value, ValueType};

/// One result row: column names paired with decoded values, in select order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Build a row from `(column, value)` pairs
    pub fn from_pairs<I, S, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: Into<Value>,
    {
        let mut row = Row::default();
        for (column, value) in pairs {
            row.push(column, value);
        }
        row
    }

    /// Append a column
    pub fn push(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.columns.push(column.into());
        self.values.push(value.into());
    }

    /// Column names in select order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value of `column`, if present
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    /// Raw value at position `idx`
    pub fn value_at(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Typed value of `column`
    ///
    /// Integer columns decode as `i64`; use `Option<T>` for nullable columns.
    pub fn get<T: ValueType>(&self, column: &str) -> Result<T, EngineError> {
        let value = self
            .value(column)
            .ok_or_else(|| EngineError::Parse(format!("column {column} not found in row")))?;
        <T as ValueType>::try_from(value.clone()).map_err(|_| {
            EngineError::Parse(format!(
                "column {column}: cannot convert {value:?} to {}",
                std::any::type_name::<T>()
            ))
        })
    }
}

/// Conversion from a result row
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> Result<Self, EngineError>;
}
