//! Query shaping and SELECT compilation.

use super::{Join, ModelRef, Statement};
use crate::clause::{custom_expr, ident, qualified, Arg, Clause};
use crate::executor::EngineError;
use crate::preload::Preload;
use crate::record::Record;
use once_cell::sync::Lazy;
use regex::Regex;
use sea_query::{Asterisk, Condition, Expr, ExprTrait, JoinType, Order, Query, SelectStatement, Value};
use serde_json::Value as JsonValue;

static JOIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)^\s*(?P<kind>(?:(?:LEFT|RIGHT|FULL)(?:\s+OUTER)?|INNER|CROSS)\s+)?JOIN\s+(?P<table>[\w.]+)(?:\s+(?:AS\s+)?(?P<alias>\w+))?\s+ON\s+(?P<on>.+?)\s*$",
    )
    .expect("join regex is valid")
});

const DEFAULT_KEY: &[&str] = &["id"];

/// Table, key and soft-delete column a statement runs against
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub(crate) table: String,
    pub(crate) primary_key: &'static [&'static str],
    pub(crate) soft_delete: Option<&'static str>,
}

impl Target {
    pub(crate) fn of<M: Record>(stmt: &Statement) -> Self {
        let table = stmt
            .scope
            .table
            .clone()
            .unwrap_or_else(|| M::TABLE.to_string());
        let soft_delete = if table == M::TABLE { M::SOFT_DELETE } else { None };
        Self {
            table,
            primary_key: M::PRIMARY_KEY,
            soft_delete,
        }
    }

    pub(crate) fn single_key(&self) -> Result<&'static str, EngineError> {
        match self.primary_key {
            [pk] => Ok(*pk),
            _ => Err(EngineError::PrimaryKeyRequired(self.table.clone())),
        }
    }
}

fn parse_join(sql: &str, args: Vec<Arg>) -> Result<Join, String> {
    let caps = JOIN_RE
        .captures(sql)
        .ok_or_else(|| format!("unsupported join clause: {sql}"))?;
    let kind = match caps
        .name("kind")
        .map(|m| m.as_str().split_whitespace().next().unwrap_or("").to_ascii_uppercase())
        .as_deref()
    {
        None | Some("INNER") => JoinType::InnerJoin,
        Some("LEFT") => JoinType::LeftJoin,
        Some("RIGHT") => JoinType::RightJoin,
        Some("FULL") => JoinType::FullOuterJoin,
        Some("CROSS") => JoinType::CrossJoin,
        Some(other) => return Err(format!("unsupported join type: {other}")),
    };
    Ok(Join {
        kind,
        table: caps["table"].to_string(),
        alias: caps.name("alias").map(|m| m.as_str().to_string()),
        on: Clause::sql(&caps["on"], args),
    })
}

fn parse_order(item: &str) -> (String, Order) {
    let item = item.trim();
    let lower = item.to_ascii_lowercase();
    if let Some(col) = lower.strip_suffix(" desc") {
        (item[..col.len()].trim().to_string(), Order::Desc)
    } else if let Some(col) = lower.strip_suffix(" asc") {
        (item[..col.len()].trim().to_string(), Order::Asc)
    } else {
        (item.to_string(), Order::Asc)
    }
}

impl Statement {
    fn fail(mut self, msg: String) -> Self {
        if self.scope.error.is_none() {
            self.scope.error = Some(msg);
        }
        self
    }

    /// Add a condition
    pub fn filter(mut self, clause: Clause) -> Self {
        self.scope.conditions.push((false, clause));
        self
    }

    /// Add a negated condition
    pub fn not(mut self, clause: Clause) -> Self {
        self.scope.conditions.push((true, clause));
        self
    }

    /// Replace the projection with a SQL fragment
    pub fn select(mut self, sql: impl Into<String>, args: Vec<Arg>) -> Self {
        self.scope.select = Some((sql.into(), args));
        self
    }

    /// Override the table name
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.scope.table = Some(name.into());
        self
    }

    /// Run against `M`'s table, constrained to `record`'s primary key when set
    pub fn model<M: Record>(mut self, record: &M) -> Self {
        let keys = record
            .primary_key_values()
            .into_iter()
            .filter(|(_, v)| !crate::value::is_zero_value(v))
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        self.scope.model = Some(ModelRef {
            table: M::TABLE,
            primary_key: M::PRIMARY_KEY,
            soft_delete: M::SOFT_DELETE,
            keys,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.scope.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.scope.offset = Some(offset);
        self
    }

    /// Add an `ORDER BY` term such as `"name desc"`; commas separate several terms
    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.scope.orders.push(order.into());
        self
    }

    pub fn group(mut self, name: impl Into<String>) -> Self {
        self.scope.groups.push(name.into());
        self
    }

    pub fn having(mut self, clause: Clause) -> Self {
        self.scope.havings.push(clause);
        self
    }

    /// Add a `[LEFT|RIGHT|FULL|INNER|CROSS] JOIN table [alias] ON cond` clause
    pub fn join(mut self, sql: &str, args: Vec<Arg>) -> Self {
        match parse_join(sql, args) {
            Ok(join) => {
                self.scope.joins.push(join);
                self
            }
            Err(msg) => self.fail(msg),
        }
    }

    /// Columns left out of INSERT and UPDATE
    pub fn omit<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope.omit.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Store a named value on the statement; it does not change the SQL
    pub fn hint(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.scope.hints.push((name.into(), value));
        self
    }

    /// Use a hand-written statement for reads
    pub fn raw(mut self, sql: impl Into<String>, args: Vec<Arg>) -> Self {
        self.scope.raw = Some((sql.into(), args));
        self
    }

    /// Lift the soft-delete filter
    pub fn unscoped(mut self) -> Self {
        self.scope.unscoped = true;
        self
    }

    /// Add `ON CONFLICT DO NOTHING` to inserts
    pub fn on_conflict_do_nothing(mut self) -> Self {
        self.scope.ignore_conflicts = true;
        self
    }

    /// Log every statement at `info`
    pub fn debug(mut self) -> Self {
        self.scope.debug = true;
        self
    }

    /// Attach an eager load
    pub fn preload(mut self, field: impl Into<String>, conditions: Vec<Clause>) -> Self {
        self.scope.preloads.push(Preload::new(field, conditions));
        self
    }

    /// Target for operations that are not tied to a record type
    pub(crate) fn untyped_target(&self) -> Result<Target, EngineError> {
        let model = self.scope.model.as_ref();
        let table = self
            .scope
            .table
            .clone()
            .or_else(|| model.map(|m| m.table.to_string()))
            .ok_or_else(|| {
                EngineError::Query("no table selected: call table() or model() first".to_string())
            })?;
        let same_table = model.map_or(false, |m| m.table == table);
        Ok(Target {
            primary_key: model.map_or(DEFAULT_KEY, |m| m.primary_key),
            soft_delete: model.filter(|_| same_table).and_then(|m| m.soft_delete),
            table,
        })
    }

    /// Conditions for reads and writes on `target`: filters, extra clauses and the soft-delete guard
    pub(crate) fn where_condition(
        &self,
        target: &Target,
        extra: &[Clause],
        with_model_keys: bool,
    ) -> Result<Condition, EngineError> {
        let mut cond = Condition::all();
        if with_model_keys {
            if let Some(model) = &self.scope.model {
                for (column, value) in &model.keys {
                    cond = cond.add(qualified(&target.table, column).eq(value.clone()));
                }
            }
        }
        for (negated, clause) in &self.scope.conditions {
            let c = clause.to_condition(&target.table, target.primary_key)?;
            cond = cond.add(if *negated { c.not() } else { c });
        }
        for clause in extra {
            cond = cond.add(clause.to_condition(&target.table, target.primary_key)?);
        }
        Ok(cond)
    }

    pub(crate) fn soft_delete_guard(&self, target: &Target) -> Option<Expr> {
        match target.soft_delete {
            Some(column) if !self.scope.unscoped => Some(qualified(&target.table, column).is_null()),
            _ => None,
        }
    }

    /// `FROM`, projection, joins, `WHERE`, `GROUP BY` and `HAVING`
    pub(crate) fn base_select(
        &self,
        target: &Target,
        extra: &[Clause],
        with_model_keys: bool,
    ) -> Result<SelectStatement, EngineError> {
        self.check()?;
        let mut query = Query::select();
        query.from(ident(&target.table));

        match &self.scope.select {
            Some((sql, args)) => {
                query.expr(custom_expr(sql, args)?);
            }
            None => {
                query.column((ident(&target.table), Asterisk));
            }
        }

        for join in &self.scope.joins {
            let on = join.on.to_condition(&join.table, DEFAULT_KEY)?;
            match &join.alias {
                Some(alias) => {
                    query.join_as(join.kind, ident(&join.table), ident(alias), on);
                }
                None => {
                    query.join(join.kind, ident(&join.table), on);
                }
            }
        }

        query.cond_where(self.where_condition(target, extra, with_model_keys)?);
        if let Some(guard) = self.soft_delete_guard(target) {
            query.and_where(guard);
        }

        if !self.scope.groups.is_empty() {
            query.add_group_by(self.scope.groups.iter().map(|g| Expr::cust(g.clone())));
        }
        for having in &self.scope.havings {
            query.cond_having(having.to_condition(&target.table, target.primary_key)?);
        }
        Ok(query)
    }

    pub(crate) fn apply_order(&self, query: &mut SelectStatement) {
        for order in &self.scope.orders {
            for item in order.split(',').filter(|s| !s.trim().is_empty()) {
                let (expr, dir) = parse_order(item);
                query.order_by_expr(Expr::cust(expr), dir);
            }
        }
    }

    pub(crate) fn apply_paging(&self, query: &mut SelectStatement) {
        if let Some(limit) = self.scope.limit {
            query.limit(limit);
        }
        if let Some(offset) = self.scope.offset {
            query.offset(offset);
        }
    }

    /// Order by the primary key after any caller-supplied ordering
    pub(crate) fn order_by_key(
        &self,
        query: &mut SelectStatement,
        target: &Target,
        dir: Order,
    ) -> Result<(), EngineError> {
        let pk = target.single_key()?;
        query.order_by_expr(qualified(&target.table, pk), dir);
        Ok(())
    }

    /// Compiled `(sql, values)` for a plain read of `target`
    pub(crate) fn compile_find(
        &self,
        target: &Target,
        extra: &[Clause],
    ) -> Result<(String, Vec<Value>), EngineError> {
        let mut query = self.base_select(target, extra, false)?;
        self.apply_order(&mut query);
        self.apply_paging(&mut query);
        Ok(build(&query))
    }
}

pub(crate) fn build(query: &SelectStatement) -> (String, Vec<Value>) {
    let (sql, values) = query.build(sea_query::PostgresQueryBuilder);
    (sql, values.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::test_helpers::{MockExecutor, Pet};

    #[test]
    fn test_parse_join_variants() {
        let join = parse_join("LEFT JOIN owners o ON o.id = pets.owner_id", vec![]).unwrap();
        assert_eq!(join.kind, JoinType::LeftJoin);
        assert_eq!(join.table, "owners");
        assert_eq!(join.alias.as_deref(), Some("o"));

        let join = parse_join("join toys on toys.pet_id = pets.id and toys.kind = ?", args!["ball"]).unwrap();
        assert_eq!(join.kind, JoinType::InnerJoin);
        assert_eq!(join.alias, None);
        assert!(matches!(join.on, Clause::Sql { ref args, .. } if args.len() == 1));

        assert!(parse_join("NATURAL JOIN owners", vec![]).is_err());
    }

    #[test]
    fn test_parse_order() {
        assert_eq!(parse_order(" name DESC "), ("name".to_string(), Order::Desc));
        assert_eq!(parse_order("age asc"), ("age".to_string(), Order::Asc));
        assert_eq!(parse_order("created_at"), ("created_at".to_string(), Order::Asc));
    }

    #[test]
    fn test_compile_find_full_shape() {
        let stmt = MockExecutor::new()
            .statement()
            .filter(Clause::sql("status = ?", args!["active"]))
            .not(Clause::fields([("name", "Rex")]))
            .join("LEFT JOIN owners ON owners.id = pets.owner_id", vec![])
            .order("name desc, id")
            .limit(10)
            .offset(20);

        let (sql, values) = stmt.compile_find(&Target::of::<Pet>(&stmt), &[]).unwrap();
        assert!(sql.starts_with(r#"SELECT "pets".* FROM "pets" LEFT JOIN "owners""#), "{sql}");
        assert!(sql.contains("status = $1"), "{sql}");
        assert!(sql.contains("NOT"), "{sql}");
        assert!(sql.contains(r#""pets"."name" = $2"#), "{sql}");
        assert!(sql.contains("ORDER BY name DESC, id ASC"), "{sql}");
        assert!(sql.contains("LIMIT $3 OFFSET $4"), "{sql}");
        assert_eq!(values[0], Value::from("active"));
        assert_eq!(values[1], Value::from("Rex"));
    }

    #[test]
    fn test_soft_delete_guard_and_unscoped() {
        use crate::test_helpers::Toy;

        let stmt = MockExecutor::new().statement();
        let (sql, _) = stmt.compile_find(&Target::of::<Toy>(&stmt), &[]).unwrap();
        assert!(sql.contains(r#""toys"."deleted_at" IS NULL"#), "{sql}");

        let stmt = stmt.unscoped();
        let (sql, _) = stmt.compile_find(&Target::of::<Toy>(&stmt), &[]).unwrap();
        assert!(!sql.contains("deleted_at"), "{sql}");
    }

    #[test]
    fn test_group_having_select() {
        let stmt = MockExecutor::new()
            .statement()
            .table("pets")
            .select("status, COUNT(*) AS n", vec![])
            .group("status")
            .having(Clause::sql("COUNT(*) > ?", args![1]));
        let target = stmt.untyped_target().unwrap();
        let (sql, values) = stmt.compile_find(&target, &[]).unwrap();
        assert!(sql.starts_with("SELECT status, COUNT(*) AS n FROM \"pets\""), "{sql}");
        assert!(sql.contains("GROUP BY status HAVING COUNT(*) > $1"), "{sql}");
        assert_eq!(values, vec![Value::from(1i32)]);
    }

    #[test]
    fn test_bad_join_surfaces_at_compile() {
        let stmt = MockExecutor::new().statement().join("owners", vec![]);
        let err = stmt.compile_find(&Target::of::<Pet>(&stmt), &[]).unwrap_err();
        assert!(err.to_string().contains("unsupported join clause"));
    }

    #[test]
    fn test_untyped_target_needs_table() {
        let stmt = MockExecutor::new().statement();
        assert!(stmt.untyped_target().is_err());
        let stmt = stmt.model(&Pet::new(3, "Rex", "active"));
        let target = stmt.untyped_target().unwrap();
        assert_eq!(target.table, "pets");
    }
}
