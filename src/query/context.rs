//! Mapping contexts: the strategy that renders one filter leaf as SQL.
//!
//! The compiler owns the boolean structure of a filter; everything that
//! depends on the caller's schema (column names, which keys may be filtered,
//! how operators are spelled) is decided here, one leaf at a time.
//!
//! ## Overriding
//!
//! Any `Fn(&str, Op, &Value) -> Result<Fragment, CompileError> + Send + Sync`
//! is a context, so a caller can qualify columns or reject keys inline and
//! fall back to [`DefaultContext`] for the rendering:
//!
//! ```
//! use service_common::query::{parse, CompileError, DefaultContext, Fragment, MappingContext, Op, Value};
//!
//! let ctx = |key: &str, op: Op, value: &Value| -> Result<Fragment, CompileError> {
//!     match key {
//!         "account" => DefaultContext.translate("t.account_id", op, value),
//!         other => Err(CompileError::translation(format!("field {other} not queryable"))),
//!     }
//! };
//!
//! let expr = parse(r#"{"$match": {"account": "acc:pending"}}"#).unwrap().unwrap();
//! assert_eq!(expr.compile(&ctx).unwrap().sql, "t.account_id = ?");
//!
//! let expr = parse(r#"{"$match": {"secret": "x"}}"#).unwrap().unwrap();
//! assert!(expr.compile(&ctx).is_err());
//! ```

use std::collections::HashMap;

use super::error::CompileError;
use super::expr::Op;
use super::placeholder;
use super::value::Value;

/// The fragment that is always true.
pub const TAUTOLOGY: &str = "1 = 1";

/// The fragment that is always false, used for an empty expanded `IN`.
pub const CONTRADICTION: &str = "1 = 0";

/// A rendered SQL predicate and its positional arguments.
///
/// Placeholders are `?`; `args[i]` binds the i-th placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    /// SQL text
    pub sql: String,
    /// Arguments, in placeholder order
    pub args: Vec<Value>,
}

impl Fragment {
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }

    /// `1 = 1` with no arguments.
    pub fn tautology() -> Self {
        Self::new(TAUTOLOGY, Vec::new())
    }

    pub fn is_tautology(&self) -> bool {
        self.sql == TAUTOLOGY && self.args.is_empty()
    }
}

/// Renders a single `(key, operator, value)` leaf.
///
/// Implementations must be pure: the same leaf always yields the same
/// fragment, and one context is shared by every thread compiling with it.
pub trait MappingContext: Send + Sync {
    /// Render one leaf.
    ///
    /// # Errors
    ///
    /// Whatever the context considers invalid (unknown field, unsupported
    /// operator). The compiler returns it to the caller unchanged.
    fn translate(&self, key: &str, op: Op, value: &Value) -> Result<Fragment, CompileError>;
}

impl<F> MappingContext for F
where
    F: Fn(&str, Op, &Value) -> Result<Fragment, CompileError> + Send + Sync,
{
    fn translate(&self, key: &str, op: Op, value: &Value) -> Result<Fragment, CompileError> {
        self(key, op, value)
    }
}

/// SQL spelling of the binary comparison operators.
///
/// `$exists` has no binary form; it renders as `IS NOT NULL` / `IS NULL`.
pub fn sql_operator(op: Op) -> Option<&'static str> {
    match op {
        Op::Match => Some("="),
        Op::Gte => Some(">="),
        Op::Gt => Some(">"),
        Op::Lte => Some("<="),
        Op::Lt => Some("<"),
        Op::Like => Some("LIKE"),
        Op::In => Some("IN"),
        Op::Exists => None,
    }
}

/// Stock context: the key is used verbatim as the column.
///
/// | operator  | fragment            | args      |
/// |-----------|---------------------|-----------|
/// | `$match`  | `key = ?`           | `[value]` |
/// | `$gte`    | `key >= ?`          | `[value]` |
/// | `$gt`     | `key > ?`           | `[value]` |
/// | `$lte`    | `key <= ?`          | `[value]` |
/// | `$lt`     | `key < ?`           | `[value]` |
/// | `$like`   | `key LIKE ?`        | `[value]` |
/// | `$exists` | `key IS NOT NULL` / `key IS NULL` | `[]` |
/// | `$in`     | `key IN ?`          | `[list]`  |
///
/// `$in` binds the whole list to one placeholder and relies on the driver to
/// expand it; wrap in [`ExpandInContext`] when the driver cannot.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultContext;

impl MappingContext for DefaultContext {
    fn translate(&self, key: &str, op: Op, value: &Value) -> Result<Fragment, CompileError> {
        match sql_operator(op) {
            Some(sql_op) => Ok(Fragment::new(
                format!("{key} {sql_op} ?"),
                vec![value.clone()],
            )),
            None => match value {
                Value::Bool(true) => Ok(Fragment::new(format!("{key} IS NOT NULL"), Vec::new())),
                Value::Bool(false) => Ok(Fragment::new(format!("{key} IS NULL"), Vec::new())),
                other => Err(CompileError::Unsupported {
                    op,
                    reason: format!("expects a boolean, found {}", other.type_name()),
                }),
            },
        }
    }
}

/// Rewrites list-bound `IN ?` placeholders into explicit `(?, ?, …)` lists.
///
/// The wrapped context renders the leaf first; for `$in` leaves every list
/// argument is then flattened into one argument per element and its
/// placeholder replaced by a parenthesised list of the same length. An empty
/// list has no valid `IN ()` spelling, so the leaf becomes `1 = 0`.
///
/// ```
/// use service_common::query::{DefaultContext, ExpandInContext, Expression, Value};
///
/// let ctx = ExpandInContext::new(DefaultContext);
/// let fragment = Expression::is_in("account", ["A", "B"]).compile(&ctx).unwrap();
/// assert_eq!(fragment.sql, "account IN (?, ?)");
/// assert_eq!(fragment.args, vec![Value::from("A"), Value::from("B")]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ExpandInContext<C> {
    inner: C,
}

impl<C: MappingContext> ExpandInContext<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: MappingContext> MappingContext for ExpandInContext<C> {
    fn translate(&self, key: &str, op: Op, value: &Value) -> Result<Fragment, CompileError> {
        let fragment = self.inner.translate(key, op, value)?;
        if op != Op::In {
            return Ok(fragment);
        }
        if matches!(value, Value::List(items) if items.is_empty()) {
            return Ok(Fragment::new(CONTRADICTION, Vec::new()));
        }

        let Fragment { sql, args } = fragment;
        if placeholder::count(&sql) != args.len() {
            return Err(CompileError::Unsupported {
                op,
                reason: format!(
                    "cannot expand '{sql}': placeholder count does not match {} argument(s)",
                    args.len()
                ),
            });
        }

        let mut flattened = Vec::with_capacity(args.len());
        let mut widths = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Value::List(items) => {
                    widths.push(Some(items.len()));
                    flattened.extend(items);
                }
                scalar => {
                    widths.push(None);
                    flattened.push(scalar);
                }
            }
        }

        let sql = placeholder::rewrite(&sql, |i| match widths.get(i).copied().flatten() {
            Some(n) => format!("({})", vec!["?"; n].join(", ")),
            None => "?".to_string(),
        });
        Ok(Fragment::new(sql, flattened))
    }
}

/// Context that exposes a fixed set of fields under public names.
///
/// Keys are mapped to physical column expressions and rendered with
/// [`DefaultContext`]; any key not registered is rejected with
/// [`CompileError::UnknownField`].
///
/// ```
/// use service_common::query::{parse, CompileError, FieldMapping};
///
/// let fields = FieldMapping::new()
///     .field("account", "t.account_id")
///     .field("balance", "t.balance");
///
/// let expr = parse(r#"{"$gte": {"balance": 10}}"#).unwrap().unwrap();
/// assert_eq!(expr.compile(&fields).unwrap().sql, "t.balance >= ?");
///
/// let expr = parse(r#"{"$match": {"password": "x"}}"#).unwrap().unwrap();
/// assert_eq!(
///     expr.compile(&fields).unwrap_err(),
///     CompileError::UnknownField { key: "password".to_string() }
/// );
/// ```
#[derive(Debug, Clone, Default)]
pub struct FieldMapping {
    columns: HashMap<String, String>,
}

impl FieldMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose `key` as `column`.
    pub fn field(mut self, key: impl Into<String>, column: impl Into<String>) -> Self {
        self.columns.insert(key.into(), column.into());
        self
    }

    /// Physical column for `key`, if exposed.
    pub fn column(&self, key: &str) -> Option<&str> {
        self.columns.get(key).map(String::as_str)
    }
}

impl MappingContext for FieldMapping {
    fn translate(&self, key: &str, op: Op, value: &Value) -> Result<Fragment, CompileError> {
        let column = self.column(key).ok_or_else(|| CompileError::UnknownField {
            key: key.to_string(),
        })?;
        DefaultContext.translate(column, op, value)
    }
}
