use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use super::builder::Compiler;
use super::context::{Fragment, MappingContext};
use super::error::CompileError;
use super::value::{Comparable, Scalar, Value};

/// Leaf comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// `$match`: equality
    Match,
    /// `$like`: SQL pattern match
    Like,
    /// `$lt`
    Lt,
    /// `$lte`
    Lte,
    /// `$gt`
    Gt,
    /// `$gte`
    Gte,
    /// `$exists`: NULL check driven by a boolean
    Exists,
    /// `$in`: membership in a list
    In,
}

impl Op {
    /// All leaf operators, in the order the grammar documents them.
    pub const ALL: [Op; 8] = [
        Op::Match,
        Op::Like,
        Op::Lt,
        Op::Lte,
        Op::Gt,
        Op::Gte,
        Op::Exists,
        Op::In,
    ];

    /// The `$`-prefixed token used in filter JSON.
    pub fn as_str(self) -> &'static str {
        match self {
            Op::Match => "$match",
            Op::Like => "$like",
            Op::Lt => "$lt",
            Op::Lte => "$lte",
            Op::Gt => "$gt",
            Op::Gte => "$gte",
            Op::Exists => "$exists",
            Op::In => "$in",
        }
    }

    /// Look up a leaf operator by its JSON token.
    pub fn from_token(token: &str) -> Option<Op> {
        Op::ALL.into_iter().find(|op| op.as_str() == token)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boolean glue of a [`Expression::Set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Logical {
    /// `$and`
    And,
    /// `$or`
    Or,
}

impl Logical {
    pub fn as_str(self) -> &'static str {
        match self {
            Logical::And => "$and",
            Logical::Or => "$or",
        }
    }

    /// Keyword placed between compiled children.
    pub fn sql_keyword(self) -> &'static str {
        match self {
            Logical::And => "and",
            Logical::Or => "or",
        }
    }

    pub fn from_token(token: &str) -> Option<Logical> {
        match token {
            "$and" => Some(Logical::And),
            "$or" => Some(Logical::Or),
            _ => None,
        }
    }
}

impl fmt::Display for Logical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node of the filter AST.
///
/// Expressions are plain values: cloning is deep, equality is structural and
/// nothing inside is shared or mutable, so a parsed filter can be compiled
/// from any number of threads at once.
///
/// # Examples
///
/// ```
/// use service_common::query::{DefaultContext, Expression};
///
/// let expr = Expression::and([
///     Expression::matches("a", "x"),
///     Expression::gt("b", 1),
/// ]);
///
/// let fragment = expr.compile(&DefaultContext).unwrap();
/// assert_eq!(fragment.sql, "(a = ?) and (b > ?)");
/// assert_eq!(expr.to_string(), r#"{"$and":[{"$match":{"a":"x"}},{"$gt":{"b":1}}]}"#);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Leaf comparing one key against a typed value
    KeyValue {
        /// Comparison operator
        op: Op,
        /// Caller-defined field identifier
        key: String,
        /// Typed payload
        value: Value,
    },
    /// Conjunction or disjunction of ordered children
    Set {
        /// Boolean glue
        op: Logical,
        /// Children, in input order; may be empty
        items: Vec<Expression>,
    },
    /// Negation of exactly one child
    Not(Box<Expression>),
}

impl Expression {
    /// Leaf with any operator and value.
    ///
    /// No operand checks happen here; the typed constructors below only
    /// accept values the parser would accept for their operator.
    pub fn key_value(op: Op, key: impl Into<String>, value: impl Into<Value>) -> Self {
        Expression::KeyValue {
            op,
            key: key.into(),
            value: value.into(),
        }
    }

    /// `$match` leaf.
    pub fn matches(key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        Self::key_value(Op::Match, key, Into::<Scalar>::into(value))
    }

    /// `$like` leaf.
    pub fn like(key: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::key_value(Op::Like, key, pattern.into())
    }

    pub fn lt(key: impl Into<String>, value: impl Into<Comparable>) -> Self {
        Self::key_value(Op::Lt, key, Into::<Comparable>::into(value))
    }

    pub fn lte(key: impl Into<String>, value: impl Into<Comparable>) -> Self {
        Self::key_value(Op::Lte, key, Into::<Comparable>::into(value))
    }

    pub fn gt(key: impl Into<String>, value: impl Into<Comparable>) -> Self {
        Self::key_value(Op::Gt, key, Into::<Comparable>::into(value))
    }

    pub fn gte(key: impl Into<String>, value: impl Into<Comparable>) -> Self {
        Self::key_value(Op::Gte, key, Into::<Comparable>::into(value))
    }

    /// `$exists` leaf: `true` keeps rows where the key is set, `false` rows where it is NULL.
    pub fn exists(key: impl Into<String>, present: bool) -> Self {
        Self::key_value(Op::Exists, key, present)
    }

    /// `$in` leaf over any list of values.
    pub fn is_in<T: Into<Value>>(key: impl Into<String>, values: impl IntoIterator<Item = T>) -> Self {
        Self::key_value(
            Op::In,
            key,
            Value::List(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Conjunction of `items`; an empty conjunction is the tautology.
    pub fn and(items: impl IntoIterator<Item = Expression>) -> Self {
        Expression::Set {
            op: Logical::And,
            items: items.into_iter().collect(),
        }
    }

    /// Disjunction of `items`; an empty disjunction is the tautology.
    pub fn or(items: impl IntoIterator<Item = Expression>) -> Self {
        Expression::Set {
            op: Logical::Or,
            items: items.into_iter().collect(),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Expression) -> Self {
        Expression::Not(Box::new(inner))
    }

    /// Compile to a parameterised SQL fragment.
    ///
    /// Leaves are rendered by `ctx`; placeholders are `?` and the arguments
    /// follow a left-to-right depth-first walk of the leaves.
    ///
    /// # Errors
    ///
    /// The first error returned by `ctx`, unchanged.
    pub fn compile(&self, ctx: &dyn MappingContext) -> Result<Fragment, CompileError> {
        Compiler::new(ctx).compile(self)
    }

    /// Serialise to filter JSON.
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::with_capacity(1);
        match self {
            Expression::KeyValue { op, key, value } => {
                let mut payload = serde_json::Map::with_capacity(1);
                payload.insert(key.clone(), value.to_json());
                object.insert(op.as_str().to_string(), serde_json::Value::Object(payload));
            }
            Expression::Set { op, items } => {
                object.insert(
                    op.as_str().to_string(),
                    serde_json::Value::Array(items.iter().map(Expression::to_json).collect()),
                );
            }
            Expression::Not(inner) => {
                object.insert("$not".to_string(), inner.to_json());
            }
        }
        serde_json::Value::Object(object)
    }

    /// Leaves in depth-first, left-to-right order, which is also the order
    /// of the compiled arguments.
    pub fn leaves(&self) -> Leaves<'_> {
        Leaves { stack: vec![self] }
    }

    /// Height of the tree; a single leaf has depth 1.
    pub fn depth(&self) -> usize {
        match self {
            Expression::KeyValue { .. } => 1,
            Expression::Set { items, .. } => {
                1 + items.iter().map(Expression::depth).max().unwrap_or(0)
            }
            Expression::Not(inner) => 1 + inner.depth(),
        }
    }
}

/// Iterator returned by [`Expression::leaves`].
pub struct Leaves<'a> {
    stack: Vec<&'a Expression>,
}

impl<'a> Iterator for Leaves<'a> {
    type Item = &'a Expression;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            match node {
                Expression::KeyValue { .. } => return Some(node),
                Expression::Set { items, .. } => self.stack.extend(items.iter().rev()),
                Expression::Not(inner) => self.stack.push(inner),
            }
        }
        None
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Serialize for Expression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Deserialisation goes through the filter parser, so every grammar rule
/// applies. An empty filter (`{}` / `null`) is an error here; deserialise
/// into `Option<Expression>` or use [`parse`](super::parse) to accept it.
impl<'de> Deserialize<'de> for Expression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        super::parser::parse_value(&raw)
            .map_err(D::Error::custom)?
            .ok_or_else(|| D::Error::custom("empty filter expression"))
    }
}
