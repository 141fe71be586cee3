//! Transaction envelope.
//!
//! A transaction is just another [`Db`] whose executor is scoped to an open
//! transaction. `begin` starts from a clean trace and preload queue.

use super::Db;
use crate::error::Error;
use crate::executor::EngineError;
use crate::preload::PreloadQueue;
use crate::trace::Trace;

impl Db {
    /// Open a transaction; commit or roll back through the returned facade
    pub fn begin(&self) -> Result<Db, Error> {
        match self.statement.begin() {
            Ok(statement) => Ok(Db {
                statement,
                trace: Trace::new(),
                preloads: PreloadQueue::new(),
            }),
            Err(err) => {
                tracing::error!(error = %err, "can't begin transaction");
                Err(Error::Internal)
            }
        }
    }

    pub fn commit(&self) -> Result<(), Error> {
        match self.statement.commit() {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::error!(error = %err, "can't commit transaction");
                Err(Error::Internal)
            }
        }
    }

    /// Roll back and hand `err` back unchanged; a failed rollback is only logged
    pub fn rollback_with_error<E>(&self, err: E) -> E {
        if let Err(rollback_err) = self.statement.rollback() {
            tracing::error!(error = %rollback_err, "can't rollback transaction");
        }
        err
    }

    /// Roll back, ignoring a transaction that has already finished
    pub fn rollback(&self) {
        match self.statement.rollback() {
            Ok(()) | Err(EngineError::TransactionDone) => {}
            Err(err) => tracing::error!(error = %err, "can't rollback transaction"),
        }
    }

    /// Run `f` in a transaction: commit on `Ok`, roll back on `Err`
    pub fn transaction<R>(&self, f: impl FnOnce(&Db) -> Result<R, Error>) -> Result<R, Error> {
        let tx = self.begin()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => Err(tx.rollback_with_error(err)),
        }
    }
}
