//! Preload resolution.
//!
//! Uses the "selectinload" strategy: after the parent records are fetched,
//! each preload issues one `IN (...)` query against the related table and the
//! rows are grouped back onto their parents by key. A dotted path such as
//! `Pets.Toys` loads one level per query, descending through
//! [`Record::preload_nested`].

use super::select::build;
use super::Statement;
use crate::clause::{ident, qualified, Clause};
use crate::executor::EngineError;
use crate::record::{find_relation, Record, Relation};
use crate::row::Row;
use crate::value::value_key;
use sea_query::{Asterisk, ExprTrait, Query, Value};
use std::collections::{HashMap, HashSet};

const RELATED_KEY: &[&str] = &["id"];

/// The rest of a dotted preload path, handed to [`Record::preload_nested`]
#[derive(Debug)]
pub struct NestedPreload<'a> {
    statement: &'a Statement,
    /// Levels already loaded, e.g. `Pets`
    loaded: String,
    /// Levels still to load, e.g. `Toys`
    rest: &'a str,
    conditions: &'a [Clause],
}

impl NestedPreload<'_> {
    /// Path still to be loaded below the current relation
    pub fn path(&self) -> &str {
        self.rest
    }

    /// Load the rest of the path onto `children`
    pub fn load<C: Record>(&self, children: &mut [&mut C]) -> Result<(), EngineError> {
        self.statement
            .load_path(children, &self.loaded, self.rest, self.conditions)
    }
}

impl Statement {
    /// Resolve every attached preload onto `records`, in attach order
    pub(crate) fn load_preloads<M: Record>(&self, records: &mut [M]) -> Result<(), EngineError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut parents: Vec<&mut M> = records.iter_mut().collect();
        for preload in &self.scope.preloads {
            self.load_path(&mut parents, "", &preload.field, &preload.conditions)?;
        }
        Ok(())
    }

    /// Load `path` below `loaded`. Conditions apply to the last level;
    /// intermediate levels reuse the conditions of their own preload, if any.
    fn load_path<M: Record>(
        &self,
        records: &mut [&mut M],
        loaded: &str,
        path: &str,
        conditions: &[Clause],
    ) -> Result<(), EngineError> {
        if records.is_empty() {
            return Ok(());
        }
        let Some((head, rest)) = path.split_once('.') else {
            let relation = find_relation::<M>(path)?;
            return self.load_relation(records, &relation, conditions);
        };

        let relation = find_relation::<M>(head)?;
        let loaded = if loaded.is_empty() {
            head.to_string()
        } else {
            format!("{loaded}.{head}")
        };
        let own_conditions = self
            .scope
            .preloads
            .iter()
            .rev()
            .find(|p| p.field == loaded)
            .map(|p| p.conditions.as_slice())
            .unwrap_or(&[]);
        self.load_relation(records, &relation, own_conditions)?;

        let nested = NestedPreload {
            statement: self,
            loaded,
            rest,
            conditions,
        };
        M::preload_nested(records, relation.name, &nested)
    }

    fn load_relation<M: Record>(
        &self,
        records: &mut [&mut M],
        relation: &Relation,
        conditions: &[Clause],
    ) -> Result<(), EngineError> {
        let mut seen = HashSet::new();
        let mut keys: Vec<Value> = Vec::new();
        for record in records.iter() {
            if let Some(value) = record.column_value(relation.from_col) {
                if let Some(key) = value_key(&value) {
                    if seen.insert(key) {
                        keys.push(value);
                    }
                }
            }
        }

        let mut by_key: HashMap<String, Vec<Row>> = HashMap::new();
        if !keys.is_empty() {
            let mut query = Query::select();
            query
                .column((ident(relation.to_table), Asterisk))
                .from(ident(relation.to_table))
                .and_where(qualified(relation.to_table, relation.to_col).is_in(keys));
            if let Some(column) = relation.soft_delete.filter(|_| !self.scope.unscoped) {
                query.and_where(qualified(relation.to_table, column).is_null());
            }
            for clause in conditions {
                query.cond_where(clause.to_condition(relation.to_table, RELATED_KEY)?);
            }
            let (sql, values) = build(&query);
            for row in self.run_query(&sql, &values)? {
                if let Some(key) = row.value(relation.to_col).and_then(value_key) {
                    by_key.entry(key).or_default().push(row);
                }
            }
        }

        for record in records.iter_mut() {
            let rows = record
                .column_value(relation.from_col)
                .and_then(|v| value_key(&v))
                .and_then(|key| by_key.get(&key))
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            record.attach(relation.name, rows)?;
        }
        Ok(())
    }
}
