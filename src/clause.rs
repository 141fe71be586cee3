//! Statically typed argument shapes for filters, joins and raw SQL.
//!
//! SQL fragments use `?` placeholders. Each placeholder consumes one [`Arg`]:
//! a scalar becomes one bind parameter, a list becomes a parenthesised bind
//! list and a raw fragment is inlined as-is. Placeholders inside quoted
//! literals are left alone.

use crate::executor::EngineError;
use sea_query::{Condition, DynIden, Expr, ExprTrait, Nullable, Value};

/// One argument of a SQL fragment
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Single bind parameter
    Value(Value),
    /// `(...)` list of bind parameters; an empty list renders as `(NULL)`
    List(Vec<Value>),
    /// SQL text inlined verbatim
    Raw(String),
}

impl Arg {
    pub fn value(value: impl Into<Value>) -> Self {
        Arg::Value(value.into())
    }

    pub fn list<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Arg::List(values.into_iter().map(Into::into).collect())
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Arg::Raw(sql.into())
    }
}

/// Conversion into an [`Arg`], used by [`args!`](crate::args)
pub trait IntoArg {
    fn into_arg(self) -> Arg;
}

impl IntoArg for Arg {
    fn into_arg(self) -> Arg {
        self
    }
}

macro_rules! scalar_args {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoArg for $ty {
                fn into_arg(self) -> Arg {
                    Arg::Value(self.into())
                }
            }
        )*
    };
}

scalar_args!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    f32,
    f64,
    char,
    &str,
    String,
    Value,
    serde_json::Value,
    uuid::Uuid,
    rust_decimal::Decimal,
    chrono::NaiveDate,
    chrono::NaiveTime,
    chrono::NaiveDateTime,
    chrono::DateTime<chrono::Utc>,
);

impl<T> IntoArg for Option<T>
where
    T: Into<Value> + Nullable,
{
    fn into_arg(self) -> Arg {
        Arg::Value(self.into())
    }
}

impl<T: Into<Value>> IntoArg for Vec<T> {
    fn into_arg(self) -> Arg {
        Arg::list(self)
    }
}

impl<T: Into<Value> + Clone> IntoArg for &[T] {
    fn into_arg(self) -> Arg {
        Arg::list(self.iter().cloned())
    }
}

impl<T: Into<Value>, const N: usize> IntoArg for [T; N] {
    fn into_arg(self) -> Arg {
        Arg::list(self)
    }
}

/// Build a `Vec<Arg>` from heterogeneous values
///
/// ```
/// use querylog::{args, Arg};
///
/// let args = args!["active", 3, vec![1, 2]];
/// assert_eq!(args.len(), 3);
/// assert!(matches!(args[2], Arg::List(_)));
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::Arg>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        vec![$($crate::IntoArg::into_arg($arg)),+]
    };
}

/// A condition as the caller wrote it
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// SQL fragment with `?` placeholders
    Sql { sql: String, args: Vec<Arg> },
    /// Column equality conditions, ANDed (struct/map style)
    Fields(Vec<(String, Value)>),
    /// Primary key equality, or membership for a list
    Key(Arg),
}

impl Clause {
    pub fn sql(sql: impl Into<String>, args: Vec<Arg>) -> Self {
        Clause::Sql {
            sql: sql.into(),
            args,
        }
    }

    pub fn fields<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Clause::Fields(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn key(key: impl IntoArg) -> Self {
        Clause::Key(key.into_arg())
    }

    /// Whether the clause constrains nothing
    pub fn is_empty(&self) -> bool {
        match self {
            Clause::Sql { sql, .. } => sql.trim().is_empty(),
            Clause::Fields(fields) => fields.is_empty(),
            Clause::Key(_) => false,
        }
    }

    /// Lower into a sea-query condition on `table`
    pub(crate) fn to_condition(
        &self,
        table: &str,
        primary_key: &[&str],
    ) -> Result<Condition, EngineError> {
        let condition = match self {
            Clause::Sql { sql, args } => Condition::all().add(custom_expr(sql, args)?),
            Clause::Fields(fields) => {
                fields
                    .iter()
                    .fold(Condition::all(), |cond, (column, value)| {
                        cond.add(qualified(table, column).eq(value.clone()))
                    })
            }
            Clause::Key(arg) => {
                let [pk] = primary_key else {
                    return Err(EngineError::PrimaryKeyRequired(table.to_string()));
                };
                let column = qualified(table, pk);
                let expr = match arg {
                    Arg::Value(v) => column.eq(v.clone()),
                    Arg::List(vs) if vs.is_empty() => Expr::cust("1 = 0"),
                    Arg::List(vs) => column.is_in(vs.clone()),
                    Arg::Raw(s) => column.eq(Expr::cust(s.clone())),
                };
                Condition::all().add(expr)
            }
        };
        Ok(condition)
    }
}

pub(crate) fn ident(name: &str) -> DynIden {
    DynIden::from(name.to_string())
}

/// Column reference; `table.column` is split into its parts
pub(crate) fn column(name: &str) -> Expr {
    match name.split_once('.') {
        Some((table, col)) => Expr::col((ident(table), ident(col))),
        None => Expr::col(ident(name)),
    }
}

/// `table.column` unless `column` is already qualified
pub(crate) fn qualified(table: &str, column_name: &str) -> Expr {
    if column_name.contains('.') {
        column(column_name)
    } else {
        Expr::col((ident(table), ident(column_name)))
    }
}

fn expand(sql: &str, args: &[Arg], escape_dollar: bool) -> Result<(String, Vec<Value>), EngineError> {
    let mut out = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let mut remaining = args.iter();
    let mut quote: Option<char> = None;

    let push_bind = |out: &mut String, values: &mut Vec<Value>, value: &Value| {
        values.push(value.clone());
        out.push('$');
        out.push_str(&values.len().to_string());
    };

    for ch in sql.chars() {
        if let Some(q) = quote {
            out.push(ch);
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => {
                quote = Some(ch);
                out.push(ch);
            }
            '?' => {
                let arg = remaining.next().ok_or_else(|| {
                    EngineError::Query(format!(
                        "not enough arguments for {sql:?}: {} given",
                        args.len()
                    ))
                })?;
                match arg {
                    Arg::Value(v) => push_bind(&mut out, &mut values, v),
                    Arg::List(vs) if vs.is_empty() => out.push_str("(NULL)"),
                    Arg::List(vs) => {
                        out.push('(');
                        for (i, v) in vs.iter().enumerate() {
                            if i > 0 {
                                out.push_str(", ");
                            }
                            push_bind(&mut out, &mut values, v);
                        }
                        out.push(')');
                    }
                    Arg::Raw(s) if escape_dollar => out.push_str(&s.replace('$', "$$")),
                    Arg::Raw(s) => out.push_str(s),
                }
            }
            '$' if escape_dollar => out.push_str("$$"),
            _ => out.push(ch),
        }
    }

    if remaining.next().is_some() {
        return Err(EngineError::Query(format!(
            "too many arguments for {sql:?}: {} given",
            args.len()
        )));
    }
    Ok((out, values))
}

/// Expand `?` placeholders into numbered `$n` binds.
///
/// Returns the rewritten SQL and the bind values in order.
pub fn expand_placeholders(sql: &str, args: &[Arg]) -> Result<(String, Vec<Value>), EngineError> {
    expand(sql, args, false)
}

/// A SQL fragment as a sea-query custom expression
pub(crate) fn custom_expr(sql: &str, args: &[Arg]) -> Result<Expr, EngineError> {
    let (escaped, values) = expand(sql, args, true)?;
    if values.is_empty() {
        let (plain, _) = expand(sql, args, false)?;
        return Ok(Expr::cust(plain));
    }
    Ok(Expr::cust_with_values(escaped, values))
}
