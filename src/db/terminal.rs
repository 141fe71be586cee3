//! Terminal operations of the facade.
//!
//! Each one applies the pending preloads, runs the engine operation and maps
//! failures onto the two sentinels. Not-found comes back silently; anything
//! else is logged with the trace, the operation's arguments and the call
//! trace, then replaced by [`Error::Internal`].

use super::Db;
use crate::call_trace;
use crate::clause::{Arg, Clause};
use crate::error::{classify, Error, ErrorClass};
use crate::executor::EngineError;
use crate::record::{Assignments, Record};
use crate::row::FromRow;
use crate::statement::Statement;
use crate::trace::pretty;
use sea_query::ValueType;
use serde_json::{json, Value as JsonValue};
use std::any::type_name;

fn with_conditions(mut args: JsonValue, key: &str, conditions: &[Clause]) -> JsonValue {
    if !conditions.is_empty() {
        if let Some(map) = args.as_object_mut() {
            map.insert(key.to_string(), pretty(conditions));
        }
    }
    args
}

impl Db {
    fn live(&self) -> Statement {
        self.preloads.apply(self.statement.clone())
    }

    /// Map `err` to a sentinel, logging everything except not-found.
    ///
    /// Must be called straight from the terminal operation so the call trace
    /// starts at the caller's frame.
    #[inline(never)]
    fn report(&self, err: &EngineError, message: &str, args: JsonValue) -> Error {
        if classify(Some(err as &(dyn std::error::Error + 'static))) == ErrorClass::NotFound {
            return Error::NotFound;
        }
        let frames = call_trace::collect(&self.settings().trace_namespaces);
        tracing::error!(
            error = %err,
            trace = %self.trace.to_json(),
            args = %args,
            call_trace = ?frames,
            "{}",
            message
        );
        Error::Internal
    }

    /// Lowest-keyed matching record
    pub fn first<M: Record>(&self, conditions: &[Clause]) -> Result<M, Error> {
        match self.live().first::<M>(conditions) {
            Ok(record) => Ok(record),
            Err(err) => Err(self.report(
                &err,
                "can't get first object from the database",
                with_conditions(json!({ "first_out": type_name::<M>() }), "first_where", conditions),
            )),
        }
    }

    /// Highest-keyed matching record
    pub fn last<M: Record>(&self, conditions: &[Clause]) -> Result<M, Error> {
        match self.live().last::<M>(conditions) {
            Ok(record) => Ok(record),
            Err(err) => Err(self.report(
                &err,
                "can't get last object from the database",
                with_conditions(json!({ "last_out": type_name::<M>() }), "last_where", conditions),
            )),
        }
    }

    /// Any matching record
    pub fn take<M: Record>(&self, conditions: &[Clause]) -> Result<M, Error> {
        match self.live().take::<M>(conditions) {
            Ok(record) => Ok(record),
            Err(err) => Err(self.report(
                &err,
                "can't take object from the database",
                with_conditions(json!({ "take_dest": type_name::<M>() }), "take_conds", conditions),
            )),
        }
    }

    pub fn find<M: Record>(&self, conditions: &[Clause]) -> Result<Vec<M>, Error> {
        match self.live().find::<M>(conditions) {
            Ok(records) => Ok(records),
            Err(err) => Err(self.report(
                &err,
                "can't find from the database",
                with_conditions(json!({ "find_out": type_name::<M>() }), "find_where", conditions),
            )),
        }
    }

    /// Rows of the raw statement or selected table, into any row type
    pub fn scan<T: FromRow>(&self) -> Result<Vec<T>, Error> {
        match self.live().scan::<T>() {
            Ok(rows) => Ok(rows),
            Err(err) => Err(self.report(
                &err,
                "can't scan from the database",
                json!({ "scan_dest": type_name::<T>() }),
            )),
        }
    }

    /// One column of every matching row
    pub fn pluck<T: ValueType>(&self, column: &str) -> Result<Vec<T>, Error> {
        match self.live().pluck::<T>(column) {
            Ok(values) => Ok(values),
            Err(err) => Err(self.report(
                &err,
                "can't pluck object from the database",
                json!({ "pluck_column": column, "pluck_type": type_name::<T>() }),
            )),
        }
    }

    pub fn count(&self) -> Result<i64, Error> {
        match self.live().count() {
            Ok(n) => Ok(n),
            Err(err) => Err(self.report(&err, "can't count objects in DB", json!({}))),
        }
    }

    /// Insert `value`, refreshing it from the returned row
    pub fn create<M: Record>(&self, value: &mut M) -> Result<(), Error> {
        match self.live().create(value) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.report(
                &err,
                "can't create value in database",
                json!({ "create_value": pretty(&*value) }),
            )),
        }
    }

    /// Insert or update `value` by primary key
    pub fn save<M: Record>(&self, value: &mut M) -> Result<(), Error> {
        match self.live().save(value) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.report(
                &err,
                "can't save object in a database",
                json!({ "save_value": pretty(&*value) }),
            )),
        }
    }

    /// `UPDATE` the rows selected by `model`/filters; returns rows affected
    pub fn updates(&self, attrs: &Assignments) -> Result<u64, Error> {
        match self.live().updates(attrs) {
            Ok(n) => Ok(n),
            Err(err) => Err(self.report(
                &err,
                "can't update object in database",
                json!({ "update_attrs": pretty(attrs) }),
            )),
        }
    }

    /// Update the rows matching the non-zero columns of `filter`.
    ///
    /// A filter with every column at its zero value is refused without
    /// touching the database.
    pub fn update_by_filter<M: Record>(&self, filter: &M, values: &Assignments) -> Result<u64, Error> {
        if filter.non_zero_values().is_empty() {
            tracing::error!(
                trace = %self.trace.to_json(),
                filter_type = type_name::<M>(),
                "update_by_filter called with an empty filter"
            );
            return Err(Error::Internal);
        }
        match self.live().update_by_filter(filter, values) {
            Ok(n) => Ok(n),
            Err(err) => Err(self.report(
                &err,
                "can't update object in database",
                json!({
                    "update_by_filter_filter": pretty(filter),
                    "update_by_filter_values": pretty(values),
                }),
            )),
        }
    }

    /// Delete `value` (by primary key when set) and/or the rows matching `conditions`
    pub fn delete<M: Record>(&self, value: &M, conditions: &[Clause]) -> Result<u64, Error> {
        match self.live().delete(value, conditions) {
            Ok(n) => Ok(n),
            Err(err) => Err(self.report(
                &err,
                "can't delete object from DB",
                with_conditions(json!({ "delete_value": pretty(value) }), "delete_where", conditions),
            )),
        }
    }

    /// Run a hand-written statement; returns rows affected
    pub fn exec(&self, sql: &str, values: &[Arg]) -> Result<u64, Error> {
        match self.live().exec(sql, values) {
            Ok(n) => Ok(n),
            Err(err) => Err(self.report(
                &err,
                "can't exec sql in DB",
                json!({ "exec_sql": sql, "exec_values": pretty(values) }),
            )),
        }
    }

    /// Walk the matching records `batch_size` at a time.
    ///
    /// `f` gets this facade (without the preloads applied) for follow-up
    /// queries, the batch and its 1-based number. An error from `f` stops
    /// the walk and is logged like any engine failure. Records need a
    /// single-column primary key; composite keys fail as an internal error.
    /// `limit` caps the total number of records walked; `offset` and
    /// `order` are not applied since batches are keyed on the primary key.
    pub fn batch_fetch<M, F>(&self, batch_size: usize, mut f: F) -> Result<(), Error>
    where
        M: Record,
        F: FnMut(&Db, &mut Vec<M>, usize) -> Result<(), Error>,
    {
        let result = self
            .live()
            .find_in_batches::<M, _>(batch_size, |records, batch| {
                f(self, records, batch).map_err(EngineError::Callback)
            });
        match result {
            Ok(()) => Ok(()),
            Err(err) => Err(self.report(
                &err,
                "can't batch fetch from the database",
                json!({ "batch_fetch_dest": type_name::<M>(), "batch_size": batch_size }),
            )),
        }
    }
}
