//! # Query Filter Module
//!
//! A small JSON filter language for list endpoints and its compiler to
//! parameterised SQL `WHERE` fragments.
//!
//! ## Overview
//!
//! Clients send filters as JSON:
//!
//! ```json
//! {"$and": [
//!     {"$match": {"account": "acc:pending"}},
//!     {"$gte": {"balance": 288230376151711747}}
//! ]}
//! ```
//!
//! [`parse`] turns the text into an [`Expression`] tree and
//! [`Expression::compile`] (or [`Compiler`]) turns the tree into a
//! [`Fragment`]: SQL text with positional placeholders plus the ordered
//! arguments to bind.
//!
//! Leaves are rendered by a [`MappingContext`]. [`DefaultContext`] treats keys
//! as column names, [`FieldMapping`] restricts keys to a declared allow-list,
//! [`ExpandInContext`] expands `$in` lists for drivers without array binding,
//! and any closure `Fn(&str, Op, &Value) -> Result<Fragment, CompileError>`
//! can override individual keys.
//!
//! ## Numeric precision
//!
//! Integer literals are kept as arbitrary precision [`num_bigint::BigInt`]
//! values. A literal like `288230376151711747` (above 2^53) reaches the SQL
//! arguments with every digit intact.
//!
//! ## Example
//!
//! ```
//! use service_common::query::{parse, DefaultContext, Value};
//!
//! let expr = parse(r#"{"$and": [{"$match": {"a": "x"}}, {"$lt": {"b": 2}}]}"#)
//!     .unwrap()
//!     .unwrap();
//! let fragment = expr.compile(&DefaultContext).unwrap();
//!
//! assert_eq!(fragment.sql, "(a = ?) and (b < ?)");
//! assert_eq!(fragment.args, vec![Value::from("x"), Value::from(2_i64)]);
//! ```

pub mod builder;
pub mod context;
pub mod error;
pub mod expr;
pub mod number;
pub mod parser;
mod placeholder;
pub mod value;

pub use builder::{compile, Compiler, Placeholder};
pub use context::{
    sql_operator, DefaultContext, ExpandInContext, FieldMapping, Fragment, MappingContext,
    CONTRADICTION, TAUTOLOGY,
};
pub use error::{CompileError, NonFiniteFloat, ParseError};
pub use expr::{Expression, Leaves, Logical, Op};
pub use parser::{parse, parse_slice, parse_value, MAX_DEPTH, MAX_NESTING};
pub use value::{Comparable, Finite, Scalar, Value};
