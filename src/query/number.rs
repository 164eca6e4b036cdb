//! Numeric literal scanner.
//!
//! Filter literals are compared against accounting balances that routinely
//! exceed 2^53, so a number is never routed through `f64` unless it was
//! written as one. The scanner sees the literal exactly as it appeared in the
//! input (`serde_json` is built with `arbitrary_precision`) and decides:
//!
//! - no `.`, `e` or `E` → arbitrary-precision integer;
//! - otherwise → `f64`.

use num_bigint::BigInt;
use std::str::FromStr;

use super::error::ParseError;
use super::value::{Finite, Value};

/// Scan a raw numeric token.
///
/// `path` is only used to label the error.
///
/// # Errors
///
/// [`ParseError::InvalidLiteral`] with the offending token when it is not a
/// well-formed integer or a finite float.
pub fn scan(token: &str, path: &str) -> Result<Value, ParseError> {
    let invalid = || ParseError::InvalidLiteral {
        path: path.to_string(),
        literal: token.to_string(),
    };

    if is_integer_literal(token) {
        return BigInt::from_str(token)
            .map(Value::Integer)
            .map_err(|_| invalid());
    }

    f64::from_str(token)
        .ok()
        .and_then(Finite::new)
        .map(Value::Float)
        .ok_or_else(invalid)
}

/// Scan a `serde_json::Number`, reading its original token.
pub fn scan_number(number: &serde_json::Number, path: &str) -> Result<Value, ParseError> {
    scan(&number.to_string(), path)
}

fn is_integer_literal(token: &str) -> bool {
    !token.contains(['.', 'e', 'E'])
}
