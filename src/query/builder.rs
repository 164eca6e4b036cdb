//! Compiler from filter AST to parameterised SQL.
//!
//! The compiler walks the tree depth-first and left-to-right, handing each
//! leaf to a [`MappingContext`] and assembling the boolean structure itself:
//!
//! - `Set` with no items → `1 = 1`
//! - `Set` → children joined by ` and ` / ` or `, each in parentheses
//! - `Not` → `not (<inner>)`
//!
//! Arguments are concatenated in the same walk order, so the n-th `?` in
//! the output always binds the n-th argument.
//!
//! `$n` placeholders are numbered leaf by leaf as the walk goes, so a quote
//! character inside one leaf's SQL cannot shift the numbering of the next.

use tracing::trace;

use super::context::{Fragment, MappingContext};
use super::error::CompileError;
use super::expr::{Expression, Op};
use super::placeholder;

/// Placeholder style of the final SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placeholder {
    /// `?` (MySQL, SQLite, most ODBC drivers)
    #[default]
    Question,
    /// `$1, $2, …` (PostgreSQL)
    Dollar,
}

/// Visitor that turns an [`Expression`] into a [`Fragment`].
///
/// ```
/// use service_common::query::{parse, Compiler, DefaultContext, Placeholder};
///
/// let expr = parse(r#"{"$and": [{"$match": {"a": "x"}}, {"$gt": {"b": 1}}]}"#)
///     .unwrap()
///     .unwrap();
///
/// let fragment = Compiler::new(&DefaultContext)
///     .placeholder(Placeholder::Dollar)
///     .compile(&expr)
///     .unwrap();
/// assert_eq!(fragment.sql, "(a = $1) and (b > $2)");
/// ```
pub struct Compiler<'a> {
    ctx: &'a dyn MappingContext,
    placeholder: Placeholder,
}

impl<'a> Compiler<'a> {
    pub fn new(ctx: &'a dyn MappingContext) -> Self {
        Self {
            ctx,
            placeholder: Placeholder::Question,
        }
    }

    /// Select the placeholder style of the output.
    pub fn placeholder(mut self, placeholder: Placeholder) -> Self {
        self.placeholder = placeholder;
        self
    }

    /// Compile `expr`.
    ///
    /// # Errors
    ///
    /// - The first error produced by the mapping context, unchanged.
    /// - [`CompileError::Unsupported`] when [`Placeholder::Dollar`] is selected
    ///   and a leaf's SQL does not hold one unquoted `?` per argument.
    pub fn compile(&self, expr: &Expression) -> Result<Fragment, CompileError> {
        let mut bound = 0;
        let fragment = self.visit(expr, &mut bound)?;
        trace!(
            sql_len = fragment.sql.len(),
            args = fragment.args.len(),
            "Compiled filter expression"
        );
        Ok(fragment)
    }

    /// Compile an optional expression; `None` is the tautology.
    pub fn compile_optional(&self, expr: Option<&Expression>) -> Result<Fragment, CompileError> {
        match expr {
            Some(expr) => self.compile(expr),
            None => Ok(Fragment::tautology()),
        }
    }

    /// `bound` counts the arguments emitted so far in the walk.
    fn visit(&self, expr: &Expression, bound: &mut usize) -> Result<Fragment, CompileError> {
        match expr {
            Expression::KeyValue { op, key, value } => {
                let fragment = self.ctx.translate(key, *op, value)?;
                self.number(*op, fragment, bound)
            }
            Expression::Set { op, items } => {
                if items.is_empty() {
                    return Ok(Fragment::tautology());
                }
                let keyword = op.sql_keyword();
                let mut sql = String::new();
                let mut args = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    let part = self.visit(item, bound)?;
                    if i > 0 {
                        sql.push(' ');
                        sql.push_str(keyword);
                        sql.push(' ');
                    }
                    sql.push('(');
                    sql.push_str(&part.sql);
                    sql.push(')');
                    args.extend(part.args);
                }
                Ok(Fragment::new(sql, args))
            }
            Expression::Not(inner) => {
                let part = self.visit(inner, bound)?;
                Ok(Fragment::new(format!("not ({})", part.sql), part.args))
            }
        }
    }

    fn number(
        &self,
        op: Op,
        fragment: Fragment,
        bound: &mut usize,
    ) -> Result<Fragment, CompileError> {
        let base = *bound;
        *bound += fragment.args.len();
        match self.placeholder {
            Placeholder::Question => Ok(fragment),
            Placeholder::Dollar => {
                let found = placeholder::count(&fragment.sql);
                if found != fragment.args.len() {
                    return Err(CompileError::Unsupported {
                        op,
                        reason: format!(
                            "cannot number placeholders in '{}': {found} placeholder(s) for {} argument(s)",
                            fragment.sql,
                            fragment.args.len()
                        ),
                    });
                }
                Ok(Fragment {
                    sql: placeholder::rewrite(&fragment.sql, |i| format!("${}", base + i + 1)),
                    args: fragment.args,
                })
            }
        }
    }
}

/// Compile an optional expression with `?` placeholders.
///
/// `None` (an empty filter) compiles to `1 = 1`.
///
/// ```
/// use service_common::query::{compile, parse, DefaultContext};
///
/// let expr = parse("{}").unwrap();
/// let fragment = compile(expr.as_ref(), &DefaultContext).unwrap();
/// assert_eq!(fragment.sql, "1 = 1");
/// assert!(fragment.args.is_empty());
/// ```
pub fn compile(
    expr: Option<&Expression>,
    ctx: &dyn MappingContext,
) -> Result<Fragment, CompileError> {
    Compiler::new(ctx).compile_optional(expr)
}
