//! Executor Module
//!
//! Provides the `Executor` trait that abstracts statement execution over `may_postgres`.
//!
//! Every engine operation reaches the database through this trait, so the
//! engine works the same over a plain connection, a transaction, or a
//! scripted executor in tests.

use crate::row::Row;
use crate::transaction::Transaction;
use crate::value::{decode_row, with_converted_params};
use may_postgres::{Client, Error as PostgresError};
use sea_query::Value;
use std::fmt;
use std::sync::Arc;

/// Engine error type
///
/// This is the error of the wrapped engine. It never leaves the crate: the
/// facade classifies it and replaces it with a sentinel [`Error`](crate::Error).
#[derive(Debug)]
pub enum EngineError {
    /// `PostgreSQL` error from `may_postgres`
    Postgres(PostgresError),
    /// A singular fetch matched no row
    RecordNotFound,
    /// Commit or rollback on a transaction that already finished
    TransactionDone,
    /// Commit or rollback on an executor that is not a transaction
    InvalidTransaction,
    /// UPDATE or DELETE without any condition
    MissingWhereClause,
    /// Operation needs a single-column primary key
    PrimaryKeyRequired(String),
    /// Preload of a relation the record does not declare
    UnknownRelation(String),
    /// Statement could not be built
    Query(String),
    /// Row parsing/conversion error
    Parse(String),
    /// Batch callback failed
    Callback(crate::Error),
    /// Other execution errors
    Other(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Postgres(e) => write!(f, "PostgreSQL error: {e}"),
            EngineError::RecordNotFound => write!(f, "record not found"),
            EngineError::TransactionDone => {
                write!(f, "transaction has already been committed or rolled back")
            }
            EngineError::InvalidTransaction => write!(f, "invalid transaction"),
            EngineError::MissingWhereClause => write!(f, "WHERE conditions required"),
            EngineError::PrimaryKeyRequired(table) => {
                write!(f, "primary key required for table {table}")
            }
            EngineError::UnknownRelation(name) => write!(f, "unsupported relation: {name}"),
            EngineError::Query(s) => write!(f, "Query error: {s}"),
            EngineError::Parse(s) => write!(f, "Parse error: {s}"),
            EngineError::Callback(e) => write!(f, "batch callback failed: {e}"),
            EngineError::Other(s) => write!(f, "Execution error: {s}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Postgres(e) => Some(e),
            EngineError::Callback(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PostgresError> for EngineError {
    fn from(err: PostgresError) -> Self {
        EngineError::Postgres(err)
    }
}

/// Trait for executing compiled statements
///
/// SQL uses numbered `$n` placeholders; `values` are bound in order.
pub trait Executor: Send + Sync {
    /// Execute a statement and return the number of rows affected
    fn execute(&self, sql: &str, values: &[Value]) -> Result<u64, EngineError>;

    /// Execute a query and return all rows
    fn query(&self, sql: &str, values: &[Value]) -> Result<Vec<Row>, EngineError>;

    /// Open a transaction and return an executor scoped to it
    fn begin(&self) -> Result<Arc<dyn Executor>, EngineError>;

    /// Commit the transaction this executor is scoped to
    fn commit(&self) -> Result<(), EngineError>;

    /// Roll back the transaction this executor is scoped to
    fn rollback(&self) -> Result<(), EngineError>;
}

/// Implementation of `Executor` for `may_postgres::Client`
pub struct MayPostgresExecutor {
    client: Client,
}

impl MayPostgresExecutor {
    /// Create a new executor from a `may_postgres::Client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Get a reference to the underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl Executor for MayPostgresExecutor {
    fn execute(&self, sql: &str, values: &[Value]) -> Result<u64, EngineError> {
        with_converted_params(values, |params| Ok(self.client.execute(sql, params)?))
    }

    fn query(&self, sql: &str, values: &[Value]) -> Result<Vec<Row>, EngineError> {
        let rows = with_converted_params(values, |params| Ok(self.client.query(sql, params)?))?;
        rows.iter().map(decode_row).collect()
    }

    fn begin(&self) -> Result<Arc<dyn Executor>, EngineError> {
        let tx = Transaction::new(self.client.clone())?;
        Ok(Arc::new(tx))
    }

    fn commit(&self) -> Result<(), EngineError> {
        Err(EngineError::InvalidTransaction)
    }

    fn rollback(&self) -> Result<(), EngineError> {
        Err(EngineError::InvalidTransaction)
    }
}
