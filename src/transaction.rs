//! Transaction Module
//!
//! A transaction-scoped [`Executor`] over a shared `may_postgres` client.
//!
//! The transaction is opened with `BEGIN` on construction and finished by
//! exactly one `COMMIT` or `ROLLBACK`. Once finished, commit and rollback both
//! report [`EngineError::TransactionDone`], which the facade treats as an
//! expected outcome of a deferred rollback.

use crate::executor::{EngineError, Executor};
use crate::row::Row;
use crate::value::{decode_row, with_converted_params};
use may_postgres::Client;
use sea_query::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A database transaction
pub struct Transaction {
    client: Client,
    closed: AtomicBool,
}

impl Transaction {
    /// Start a new transaction on `client`
    pub(crate) fn new(client: Client) -> Result<Self, EngineError> {
        client.execute("BEGIN", &[])?;
        Ok(Self {
            client,
            closed: AtomicBool::new(false),
        })
    }

    /// Check if the transaction is closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn finish(&self, sql: &str) -> Result<(), EngineError> {
        // Only the first finisher gets to send COMMIT/ROLLBACK.
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EngineError::TransactionDone);
        }
        self.client.execute(sql, &[])?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.is_closed() {
            return Err(EngineError::TransactionDone);
        }
        Ok(())
    }
}

impl Executor for Transaction {
    fn execute(&self, sql: &str, values: &[Value]) -> Result<u64, EngineError> {
        self.ensure_open()?;
        with_converted_params(values, |params| Ok(self.client.execute(sql, params)?))
    }

    fn query(&self, sql: &str, values: &[Value]) -> Result<Vec<Row>, EngineError> {
        self.ensure_open()?;
        let rows = with_converted_params(values, |params| Ok(self.client.query(sql, params)?))?;
        rows.iter().map(decode_row).collect()
    }

    fn begin(&self) -> Result<Arc<dyn Executor>, EngineError> {
        // PostgreSQL has no nested BEGIN; savepoints are not modelled here.
        Err(EngineError::InvalidTransaction)
    }

    fn commit(&self) -> Result<(), EngineError> {
        self.finish("COMMIT")
    }

    fn rollback(&self) -> Result<(), EngineError> {
        self.finish("ROLLBACK")
    }
}
