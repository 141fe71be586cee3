//! Terminal operations.
//!
//! Each operation compiles the accumulated scope into one statement (plus
//! one statement per preload for reads), runs it through the executor and
//! maps rows back into records.

use super::select::{build, Target};
use super::{ModelRef, Statement};
use crate::clause::{column, expand_placeholders, ident, qualified, Clause};
use crate::executor::EngineError;
use crate::record::{Assignments, Record};
use crate::row::{FromRow, Row};
use sea_query::{
    Asterisk, Condition, Expr, ExprTrait, OnConflict, Order, PostgresQueryBuilder, Query,
    ValueType,
};

/// How a read picks its rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pick {
    /// Lowest primary key
    First,
    /// Highest primary key
    Last,
    /// Any single row
    Take,
    /// Every matching row
    All,
}

fn parse_rows<T: FromRow>(rows: &[Row]) -> Result<Vec<T>, EngineError> {
    rows.iter()
        .map(|row| {
            T::from_row(row).map_err(|e| EngineError::Parse(format!("Failed to parse row: {}", e)))
        })
        .collect()
}

impl Statement {
    fn raw_rows(&self) -> Option<Result<Vec<Row>, EngineError>> {
        let (sql, args) = self.scope.raw.as_ref()?;
        Some(
            self.check()
                .and_then(|_| expand_placeholders(sql, args))
                .and_then(|(sql, values)| self.run_query(&sql, &values)),
        )
    }

    fn read_rows(&self, target: &Target, extra: &[Clause], pick: Pick) -> Result<Vec<Row>, EngineError> {
        if let Some(rows) = self.raw_rows() {
            return rows;
        }
        let mut query = self.base_select(target, extra, false)?;
        self.apply_order(&mut query);
        match pick {
            Pick::First => {
                self.order_by_key(&mut query, target, Order::Asc)?;
                query.limit(1);
            }
            Pick::Last => {
                self.order_by_key(&mut query, target, Order::Desc)?;
                query.limit(1);
            }
            Pick::Take => {
                query.limit(1);
            }
            Pick::All => self.apply_paging(&mut query),
        }
        if pick != Pick::All {
            if let Some(offset) = self.scope.offset {
                query.offset(offset);
            }
        }
        let (sql, values) = build(&query);
        self.run_query(&sql, &values)
    }

    fn read_one<M: Record>(&self, extra: &[Clause], pick: Pick) -> Result<M, EngineError> {
        let target = Target::of::<M>(self);
        let rows = self.read_rows(&target, extra, pick)?;
        let row = rows.first().ok_or(EngineError::RecordNotFound)?;
        let mut records = vec![M::from_row(row)?];
        self.load_preloads(&mut records)?;
        records.pop().ok_or(EngineError::RecordNotFound)
    }

    /// First record ordered by primary key
    pub fn first<M: Record>(&self, extra: &[Clause]) -> Result<M, EngineError> {
        self.read_one(extra, Pick::First)
    }

    /// Last record ordered by primary key
    pub fn last<M: Record>(&self, extra: &[Clause]) -> Result<M, EngineError> {
        self.read_one(extra, Pick::Last)
    }

    /// One record, no ordering
    pub fn take<M: Record>(&self, extra: &[Clause]) -> Result<M, EngineError> {
        self.read_one(extra, Pick::Take)
    }

    /// Every matching record; an empty result is not an error
    pub fn find<M: Record>(&self, extra: &[Clause]) -> Result<Vec<M>, EngineError> {
        let target = Target::of::<M>(self);
        let rows = self.read_rows(&target, extra, Pick::All)?;
        let mut records = parse_rows::<M>(&rows)?;
        self.load_preloads(&mut records)?;
        Ok(records)
    }

    /// Rows of the raw statement, or of the selected table, into any `FromRow`
    pub fn scan<T: FromRow>(&self) -> Result<Vec<T>, EngineError> {
        let rows = match self.raw_rows() {
            Some(rows) => rows?,
            None => self.read_rows(&self.untyped_target()?, &[], Pick::All)?,
        };
        parse_rows(&rows)
    }

    /// A single column of every matching row
    pub fn pluck<T: ValueType>(&self, column_name: &str) -> Result<Vec<T>, EngineError> {
        let rows = match self.raw_rows() {
            Some(rows) => rows?,
            None => {
                let target = self.untyped_target()?;
                let mut query = self.base_select(&target, &[], true)?;
                query.clear_selects();
                query.expr(column(column_name));
                self.apply_order(&mut query);
                self.apply_paging(&mut query);
                let (sql, values) = build(&query);
                self.run_query(&sql, &values)?
            }
        };
        rows.iter()
            .map(|row| {
                let value = row
                    .value_at(0)
                    .cloned()
                    .ok_or_else(|| EngineError::Parse(format!("column {column_name} missing")))?;
                <T as ValueType>::try_from(value).map_err(|_| {
                    EngineError::Parse(format!(
                        "column {column_name}: cannot convert to {}",
                        std::any::type_name::<T>()
                    ))
                })
            })
            .collect()
    }

    /// Number of matching rows (groups, when grouped)
    pub fn count(&self) -> Result<i64, EngineError> {
        let target = self.untyped_target()?;
        let mut inner = self.base_select(&target, &[], true)?;
        inner.clear_selects();
        let query = if self.scope.groups.is_empty() {
            inner.expr(Expr::cust("COUNT(*)"));
            inner
        } else {
            inner.expr(Expr::cust("1"));
            let mut outer = Query::select();
            outer
                .expr(Expr::cust("COUNT(*)"))
                .from_subquery(inner, ident("grouped"));
            outer
        };
        let (sql, values) = build(&query);
        let rows = self.run_query(&sql, &values)?;
        match rows.first().and_then(|row| row.value_at(0)) {
            Some(value) => <i64 as ValueType>::try_from(value.clone())
                .map_err(|_| EngineError::Parse(format!("unexpected count value {value:?}"))),
            None => Ok(0),
        }
    }

    fn insert_columns<M: Record>(&self, record: &M, skip_zero_key: bool) -> Vec<(&'static str, sea_query::Value)> {
        record
            .values()
            .into_iter()
            .filter(|(name, _)| !self.scope.omit.iter().any(|o| o == name))
            .filter(|(name, value)| {
                !(skip_zero_key
                    && M::PRIMARY_KEY.contains(name)
                    && crate::value::is_zero_value(value))
            })
            .collect()
    }

    fn insert_returning<M: Record>(
        &self,
        record: &mut M,
        on_conflict: Option<OnConflict>,
    ) -> Result<(), EngineError> {
        self.check()?;
        let target = Target::of::<M>(self);
        let columns = self.insert_columns(record, true);

        let mut query = Query::insert();
        query.into_table(ident(&target.table));
        if columns.is_empty() {
            query.or_default_values();
        } else {
            query.columns(columns.iter().map(|(name, _)| ident(name)));
            query.values_panic(columns.into_iter().map(|(_, value)| Expr::val(value)));
        }
        if let Some(on_conflict) = on_conflict {
            query.on_conflict(on_conflict);
        }
        query.returning_col(Asterisk);

        let (sql, values) = query.build(PostgresQueryBuilder);
        let rows = self.run_query(&sql, &values.0)?;
        if let Some(row) = rows.first() {
            *record = M::from_row(row)?;
        }
        Ok(())
    }

    /// Insert `record`; a zero primary key is left to the database
    pub fn create<M: Record>(&self, record: &mut M) -> Result<(), EngineError> {
        let on_conflict = self
            .scope
            .ignore_conflicts
            .then(|| OnConflict::new().do_nothing().to_owned());
        self.insert_returning(record, on_conflict)
    }

    /// Insert when the primary key is zero, otherwise upsert every column
    pub fn save<M: Record>(&self, record: &mut M) -> Result<(), EngineError> {
        if record.has_zero_primary_key() {
            return self.create(record);
        }
        let updates: Vec<_> = self
            .insert_columns(record, false)
            .into_iter()
            .map(|(name, _)| name)
            .filter(|name| !M::PRIMARY_KEY.contains(name))
            .map(ident)
            .collect();
        let mut on_conflict = OnConflict::columns(M::PRIMARY_KEY.iter().map(|pk| ident(pk)));
        if updates.is_empty() {
            on_conflict.do_nothing();
        } else {
            on_conflict.update_columns(updates);
        }
        self.insert_returning(record, Some(on_conflict))
    }

    fn has_conditions(&self, extra: &[Clause]) -> bool {
        self.scope
            .model
            .as_ref()
            .map_or(false, |m| !m.keys.is_empty())
            || self.scope.conditions.iter().any(|(_, c)| !c.is_empty())
            || extra.iter().any(|c| !c.is_empty())
    }

    /// `UPDATE ... SET` on the selected table; refuses to run without a condition
    pub fn updates(&self, set: &Assignments) -> Result<u64, EngineError> {
        self.check()?;
        let target = self.untyped_target()?;
        let set = set.without(&self.scope.omit);
        if set.is_empty() {
            return Ok(0);
        }
        if !self.has_conditions(&[]) {
            return Err(EngineError::MissingWhereClause);
        }

        let mut query = Query::update();
        query.table(ident(&target.table));
        for (col, value) in set.iter() {
            query.value(ident(col), Expr::val(value.clone()));
        }
        query.cond_where(self.where_condition(&target, &[], true)?);
        if let Some(guard) = self.soft_delete_guard(&target) {
            query.and_where(guard);
        }

        let (sql, values) = query.build(PostgresQueryBuilder);
        self.run_execute(&sql, &values.0)
    }

    /// `updates` on `M`'s table, filtered by the non-zero columns of `filter`
    pub fn update_by_filter<M: Record>(&self, filter: &M, set: &Assignments) -> Result<u64, EngineError> {
        let fields = filter.non_zero_values();
        if fields.is_empty() {
            return Err(EngineError::MissingWhereClause);
        }
        let mut stmt = self.clone();
        stmt.scope.model = Some(ModelRef {
            table: M::TABLE,
            primary_key: M::PRIMARY_KEY,
            soft_delete: M::SOFT_DELETE,
            keys: Vec::new(),
        });
        stmt.filter(Clause::fields(fields)).updates(set)
    }

    /// Delete `record` (by primary key when set) plus any conditions.
    ///
    /// Soft-delete tables get their timestamp set instead, unless unscoped.
    pub fn delete<M: Record>(&self, record: &M, extra: &[Clause]) -> Result<u64, EngineError> {
        self.check()?;
        let target = Target::of::<M>(self);
        let keys: Vec<_> = record
            .primary_key_values()
            .into_iter()
            .filter(|(_, v)| !crate::value::is_zero_value(v))
            .collect();
        if keys.is_empty() && !self.has_conditions(extra) {
            return Err(EngineError::MissingWhereClause);
        }

        let mut cond = keys.into_iter().fold(Condition::all(), |cond, (col, value)| {
            cond.add(qualified(&target.table, col).eq(value))
        });
        cond = cond.add(self.where_condition(&target, extra, true)?);

        let (sql, values) = match self.soft_delete_guard(&target) {
            Some(guard) => {
                let column_name = target.soft_delete.unwrap_or_default();
                let mut query = Query::update();
                query
                    .table(ident(&target.table))
                    .value(ident(column_name), Expr::cust("CURRENT_TIMESTAMP"))
                    .cond_where(cond)
                    .and_where(guard);
                query.build(PostgresQueryBuilder)
            }
            None => {
                let mut query = Query::delete();
                query.from_table(ident(&target.table)).cond_where(cond);
                query.build(PostgresQueryBuilder)
            }
        };
        self.run_execute(&sql, &values.0)
    }

    /// Run a hand-written statement
    pub fn exec(&self, sql: &str, args: &[crate::clause::Arg]) -> Result<u64, EngineError> {
        self.check()?;
        let (sql, values) = expand_placeholders(sql, args)?;
        self.run_execute(&sql, &values)
    }

    /// Walk the matching records in primary-key order, `batch_size` at a time.
    ///
    /// Needs a single-column primary key. Stops at the first callback error.
    /// `limit` caps the total number of records walked; `offset` and `order`
    /// are not applied since batches are keyed on the primary key.
    pub fn find_in_batches<M, F>(&self, batch_size: usize, mut f: F) -> Result<(), EngineError>
    where
        M: Record,
        F: FnMut(&mut Vec<M>, usize) -> Result<(), EngineError>,
    {
        if batch_size == 0 {
            return Err(EngineError::Query("batch size must be positive".to_string()));
        }
        let target = Target::of::<M>(self);
        let pk = target.single_key()?;

        let mut last_key: Option<sea_query::Value> = None;
        let mut batch = 1;
        let mut remaining = self.scope.limit;
        loop {
            let page = match remaining {
                Some(0) => return Ok(()),
                Some(left) => left.min(batch_size as u64),
                None => batch_size as u64,
            };
            let mut query = self.base_select(&target, &[], false)?;
            if let Some(key) = &last_key {
                query.and_where(qualified(&target.table, pk).gt(key.clone()));
            }
            self.order_by_key(&mut query, &target, Order::Asc)?;
            query.limit(page);

            let (sql, values) = build(&query);
            let rows = self.run_query(&sql, &values)?;
            let mut records = parse_rows::<M>(&rows)?;
            if records.is_empty() {
                return Ok(());
            }
            self.load_preloads(&mut records)?;

            let fetched = records.len() as u64;
            last_key = records.last().and_then(|r| r.column_value(pk));
            f(&mut records, batch)?;

            if fetched < page || last_key.is_none() {
                return Ok(());
            }
            remaining = remaining.map(|left| left - fetched);
            batch += 1;
        }
    }
}
