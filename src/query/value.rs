use num_bigint::BigInt;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::error::NonFiniteFloat;

/// An `f64` that is neither NaN nor infinite, so it always has a JSON spelling.
///
/// ```
/// use service_common::query::Finite;
///
/// assert_eq!(Finite::new(0.5).map(Finite::get), Some(0.5));
/// assert!(Finite::new(f64::NAN).is_none());
/// assert!(Finite::try_from(f64::INFINITY).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Finite(f64);

impl Finite {
    pub fn new(f: f64) -> Option<Self> {
        f.is_finite().then_some(Finite(f))
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Finite {
    type Error = NonFiniteFloat;

    fn try_from(f: f64) -> Result<Self, Self::Error> {
        Finite::new(f).ok_or(NonFiniteFloat(f))
    }
}

impl fmt::Display for Finite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Typed payload of a filter leaf, and the argument type handed to SQL drivers.
///
/// Integers and floats are distinct: a literal without fraction or exponent is
/// an arbitrary-precision [`BigInt`], so account balances above 2^53 survive
/// parsing untouched. Only literals written with `.`, `e` or `E` become
/// [`Value::Float`], which only holds [`Finite`] numbers.
///
/// # Examples
///
/// ```
/// use service_common::query::Value;
///
/// let v = Value::from(288230376151711747_u64);
/// assert_eq!(v.to_string(), "288230376151711747");
///
/// let list = Value::from(vec!["A", "B"]);
/// assert_eq!(list.to_string(), r#"["A","B"]"#);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// UTF-8 string
    String(String),
    /// Boolean
    Bool(bool),
    /// Exact integer of any magnitude
    Integer(BigInt),
    /// Floating-point number
    Float(Finite),
    /// Ordered, possibly heterogeneous sequence
    List(Vec<Value>),
}

impl Value {
    /// JSON type name, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Bool(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::List(_) => "array",
        }
    }

    /// True for integers and floats.
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<&BigInt> {
        match self {
            Value::Integer(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Render as a `serde_json::Value`.
    ///
    /// Integers are emitted as raw number tokens, never as `f64`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(n) => {
                let digits = n.to_string();
                match serde_json::Number::from_str(&digits) {
                    Ok(number) => serde_json::Value::Number(number),
                    // BigInt always renders as a valid JSON integer
                    Err(_) => serde_json::Value::String(digits),
                }
            }
            // finite by construction, so from_f64 always succeeds
            Value::Float(f) => serde_json::Number::from_f64(f.get())
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<BigInt> for Value {
    fn from(n: BigInt) -> Self {
        Value::Integer(n)
    }
}

impl From<Finite> for Value {
    fn from(f: Finite) -> Self {
        Value::Float(f)
    }
}

/// Only finite floats become values; NaN and infinities have no JSON form.
impl TryFrom<f64> for Value {
    type Error = NonFiniteFloat;

    fn try_from(f: f64) -> Result<Self, Self::Error> {
        Finite::try_from(f).map(Value::Float)
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(n: $t) -> Self {
                    Value::Integer(BigInt::from(n))
                }
            }
        )*
    };
}

impl_from_int!(i32, i64, u32, u64, i128, u128);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

/// Operand of `$match`: a string, boolean or number.
///
/// Lists are only valid under `$in`, so there is no conversion from `Vec`.
#[derive(Debug, Clone, PartialEq)]
pub struct Scalar(Value);

/// Operand of `$lt`, `$lte`, `$gt` and `$gte`: a number or a string.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparable(Value);

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Self {
        scalar.0
    }
}

impl From<Comparable> for Value {
    fn from(comparable: Comparable) -> Self {
        comparable.0
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar(Value::Bool(b))
    }
}

impl From<Comparable> for Scalar {
    fn from(comparable: Comparable) -> Self {
        Scalar(comparable.0)
    }
}

macro_rules! impl_from_operand {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Scalar {
                fn from(v: $t) -> Self {
                    Scalar(Value::from(v))
                }
            }

            impl From<$t> for Comparable {
                fn from(v: $t) -> Self {
                    Comparable(Value::from(v))
                }
            }
        )*
    };
}

impl_from_operand!(&str, String, BigInt, Finite, i32, i64, u32, u64, i128, u128);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_renders_exact_digits() {
        let big = BigInt::from_str("340282366920938463463374607431768211457").unwrap();
        let v = Value::Integer(big);
        assert_eq!(v.to_string(), "340282366920938463463374607431768211457");
    }

    fn float(f: f64) -> Value {
        Value::try_from(f).unwrap()
    }

    #[test]
    fn test_float_keeps_fraction_marker() {
        assert_eq!(float(1.0).to_string(), "1.0");
        assert_eq!(float(2.5).to_string(), "2.5");
    }

    #[test]
    fn test_non_finite_float_is_rejected() {
        for f in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(Value::try_from(f).is_err(), "{f}");
            assert!(Finite::new(f).is_none(), "{f}");
        }
        let err = Value::try_from(f64::INFINITY).unwrap_err();
        assert_eq!(err.to_string(), "float inf is not finite");
    }

    #[test]
    fn test_heterogeneous_list() {
        let v = Value::List(vec![Value::from("a"), Value::from(1_i64), Value::from(true)]);
        assert_eq!(v.to_string(), r#"["a",1,true]"#);
        assert_eq!(v.type_name(), "array");
        assert_eq!(v.as_list().map(<[Value]>::len), Some(3));
    }

    #[test]
    fn test_operands_convert_to_values() {
        assert_eq!(Value::from(Scalar::from(true)), Value::Bool(true));
        assert_eq!(Value::from(Scalar::from("x")), Value::from("x"));
        assert_eq!(Value::from(Comparable::from(7_u32)), Value::from(7_i64));
        assert_eq!(
            Value::from(Comparable::from(Finite::new(0.5).unwrap())),
            float(0.5)
        );
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::from(false).as_bool(), Some(false));
        assert_eq!(Value::from(7_i32).as_integer(), Some(&BigInt::from(7)));
        assert!(float(1.5).is_number());
        assert!(!Value::from("1").is_number());
    }
}
