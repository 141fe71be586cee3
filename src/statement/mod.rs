//! The underlying query engine.
//!
//! A [`Statement`] is the engine handle the facade wraps: an executor plus
//! the accumulated query shape. Shaping calls consume the statement and
//! return the reshaped one; terminal operations compile the shape with
//! sea-query and run it through the [`Executor`].
//!
//! # Layout
//!
//! - **select**: shaping operations and SELECT compilation
//! - **execution**: terminal operations (fetch, insert, update, delete, batches)
//! - **eager**: preload resolution for fetched records

use crate::clause::{Arg, Clause};
use crate::config::Settings;
use crate::executor::{EngineError, Executor};
use crate::preload::Preload;
use crate::row::Row;
use sea_query::{JoinType, Value};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

mod eager;
mod execution;
mod select;

pub use eager::NestedPreload;

/// A parsed `JOIN` clause
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Join {
    pub(crate) kind: JoinType,
    pub(crate) table: String,
    pub(crate) alias: Option<String>,
    pub(crate) on: Clause,
}

/// Table metadata recorded by `model(..)`
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ModelRef {
    pub(crate) table: &'static str,
    pub(crate) primary_key: &'static [&'static str],
    pub(crate) soft_delete: Option<&'static str>,
    /// Non-zero primary key values of the model instance
    pub(crate) keys: Vec<(String, Value)>,
}

/// Accumulated query shape
#[derive(Debug, Clone, Default)]
pub(crate) struct Scope {
    pub(crate) table: Option<String>,
    pub(crate) model: Option<ModelRef>,
    /// `(negated, clause)` in call order
    pub(crate) conditions: Vec<(bool, Clause)>,
    pub(crate) select: Option<(String, Vec<Arg>)>,
    pub(crate) joins: Vec<Join>,
    pub(crate) orders: Vec<String>,
    pub(crate) groups: Vec<String>,
    pub(crate) havings: Vec<Clause>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) omit: Vec<String>,
    pub(crate) hints: Vec<(String, JsonValue)>,
    pub(crate) raw: Option<(String, Vec<Arg>)>,
    pub(crate) preloads: Vec<Preload>,
    pub(crate) unscoped: bool,
    pub(crate) ignore_conflicts: bool,
    pub(crate) debug: bool,
    /// First shaping error; reported by the next terminal operation
    pub(crate) error: Option<String>,
}

/// Engine handle: executor, settings and query shape
#[derive(Clone)]
pub struct Statement {
    executor: Arc<dyn Executor>,
    settings: Arc<Settings>,
    scope: Scope,
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl Statement {
    pub fn new(executor: Arc<dyn Executor>, settings: Arc<Settings>) -> Self {
        Self {
            executor,
            settings,
            scope: Scope::default(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn settings_arc(&self) -> Arc<Settings> {
        Arc::clone(&self.settings)
    }

    /// Preloads attached so far, oldest first
    pub fn preloads(&self) -> &[Preload] {
        &self.scope.preloads
    }

    /// Latest value stored under `name` by `hint`
    pub fn hint_value(&self, name: &str) -> Option<&JsonValue> {
        self.scope
            .hints
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// A fresh statement on a new transaction
    pub fn begin(&self) -> Result<Statement, EngineError> {
        let executor = self.executor.begin()?;
        Ok(Statement::new(executor, self.settings_arc()))
    }

    pub fn commit(&self) -> Result<(), EngineError> {
        self.executor.commit()
    }

    pub fn rollback(&self) -> Result<(), EngineError> {
        self.executor.rollback()
    }

    fn debug_enabled(&self) -> bool {
        self.scope.debug || self.settings.debug
    }

    fn log_statement(&self, sql: &str, values: &[Value], elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis() as u64;
        if self.debug_enabled() {
            tracing::info!(sql, params = ?values, elapsed_ms, "statement");
        }
        if elapsed_ms > self.settings.slow_threshold_ms {
            tracing::warn!(
                sql,
                elapsed_ms,
                threshold_ms = self.settings.slow_threshold_ms,
                "slow query"
            );
        }
    }

    pub(crate) fn run_query(&self, sql: &str, values: &[Value]) -> Result<Vec<Row>, EngineError> {
        let start = Instant::now();
        let result = self.executor.query(sql, values);
        self.log_statement(sql, values, start.elapsed());
        result
    }

    pub(crate) fn run_execute(&self, sql: &str, values: &[Value]) -> Result<u64, EngineError> {
        let start = Instant::now();
        let result = self.executor.execute(sql, values);
        self.log_statement(sql, values, start.elapsed());
        result
    }

    pub(crate) fn check(&self) -> Result<(), EngineError> {
        match &self.scope.error {
            Some(msg) => Err(EngineError::Query(msg.clone())),
            None => Ok(()),
        }
    }
}
