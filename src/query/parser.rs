//! Filter JSON parser.
//!
//! Input is untrusted. Every node must be a single-key object whose key is a
//! `$` operator:
//!
//! ```text
//! {"$and": [expr, ...]}          conjunction
//! {"$or":  [expr, ...]}          disjunction
//! {"$not": expr}                 negation
//! {"$match": {key: scalar}}      equality
//! {"$like":  {key: string}}      pattern
//! {"$lt" | "$lte" | "$gt" | "$gte": {key: number | string}}
//! {"$exists": {key: bool}}       NULL check
//! {"$in": {key: [value, ...]}}   membership
//! ```
//!
//! The empty input (`""`, `{}`, `null`) is the absence of a filter and
//! parses to `None`. Errors report the dotted operator path of the failing
//! node, with array positions as numbers: `$and.1.$gt`.

use serde::Deserialize;
use serde_json::Value as Json;

use super::error::ParseError;
use super::expr::{Expression, Logical, Op};
use super::number;
use super::value::Value;

/// Maximum nesting of operator objects accepted from input.
pub const MAX_DEPTH: usize = 64;

/// Maximum bracket nesting of filter text, checked before decoding.
///
/// A set costs two levels (object and array) per operator, so this leaves
/// room for a [`MAX_DEPTH`] tree of sets with nested `$in` lists at the bottom.
pub const MAX_NESTING: usize = 4 * MAX_DEPTH;

/// Parse filter JSON text.
///
/// # Errors
///
/// See [`ParseError`]; the first problem found wins.
///
/// # Examples
///
/// ```
/// use service_common::query::{parse, Expression};
///
/// let expr = parse(r#"{"$exists": {"col": true}}"#).unwrap();
/// assert_eq!(expr, Some(Expression::exists("col", true)));
///
/// assert_eq!(parse("").unwrap(), None);
/// assert_eq!(parse("{}").unwrap(), None);
/// ```
pub fn parse(input: &str) -> Result<Option<Expression>, ParseError> {
    parse_slice(input.as_bytes())
}

/// Parse filter JSON bytes, e.g. a request body.
pub fn parse_slice(input: &[u8]) -> Result<Option<Expression>, ParseError> {
    if input.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    check_nesting(input)?;
    parse_value(&decode(input)?)
}

/// Decode without serde_json's own recursion limit; [`check_nesting`] has
/// already bounded the depth, and the operator walk reports [`ParseError::TooDeep`].
fn decode(input: &[u8]) -> Result<Json, ParseError> {
    let malformed = |e: serde_json::Error| ParseError::MalformedJson {
        path: String::new(),
        details: e.to_string(),
    };
    let mut de = serde_json::Deserializer::from_slice(input);
    de.disable_recursion_limit();
    let json = Json::deserialize(&mut de).map_err(malformed)?;
    de.end().map_err(malformed)?;
    Ok(json)
}

/// Reject text whose brackets nest deeper than [`MAX_NESTING`], ignoring
/// brackets inside strings.
fn check_nesting(input: &[u8]) -> Result<(), ParseError> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for &b in input {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                if depth > MAX_NESTING {
                    return Err(ParseError::TooDeep {
                        path: String::new(),
                        limit: MAX_NESTING,
                    });
                }
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

/// Parse an already decoded JSON document.
///
/// The document must have been decoded by this crate's `serde_json` (built
/// with `arbitrary_precision`) for integers above 2^53 to keep their digits.
pub fn parse_value(json: &Json) -> Result<Option<Expression>, ParseError> {
    match json {
        Json::Null => Ok(None),
        Json::Object(map) if map.is_empty() => Ok(None),
        Json::Object(_) => expression(json, "", 1).map(Some),
        other => Err(ParseError::MalformedJson {
            path: String::new(),
            details: format!("expected an object at the root, found {}", json_type(other)),
        }),
    }
}

fn expression(json: &Json, path: &str, depth: usize) -> Result<Expression, ParseError> {
    if depth > MAX_DEPTH {
        return Err(ParseError::TooDeep {
            path: path.to_string(),
            limit: MAX_DEPTH,
        });
    }

    let (token, body) = single_entry(json, path, "an operator object")?;
    let op_path = child(path, token);

    if let Some(logical) = Logical::from_token(token) {
        let Json::Array(items) = body else {
            return Err(type_mismatch(&op_path, "an array of expressions", body));
        };
        let items = items
            .iter()
            .enumerate()
            .map(|(i, item)| expression(item, &child(&op_path, &i.to_string()), depth + 1))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Expression::Set { op: logical, items });
    }

    if token == "$not" {
        let inner = expression(body, &op_path, depth + 1)?;
        return Ok(Expression::not(inner));
    }

    let Some(op) = Op::from_token(token) else {
        return Err(ParseError::UnknownOperator {
            path: path.to_string(),
            operator: token.to_string(),
        });
    };

    let (key, raw) = single_entry(body, &op_path, "an object with one key")?;
    let value = leaf_value(op, raw, &op_path)?;
    Ok(Expression::KeyValue {
        op,
        key: key.to_string(),
        value,
    })
}

/// The only `(key, value)` pair of an object.
fn single_entry<'a>(
    json: &'a Json,
    path: &str,
    expected: &'static str,
) -> Result<(&'a str, &'a Json), ParseError> {
    let Json::Object(map) = json else {
        return Err(type_mismatch(path, expected, json));
    };
    let mut entries = map.iter();
    match (entries.next(), entries.next()) {
        (Some((key, value)), None) => Ok((key.as_str(), value)),
        _ => Err(ParseError::ArityMismatch {
            path: path.to_string(),
            found: map.len(),
        }),
    }
}

fn leaf_value(op: Op, raw: &Json, path: &str) -> Result<Value, ParseError> {
    match op {
        Op::Exists => match raw {
            Json::Bool(b) => Ok(Value::Bool(*b)),
            other => Err(type_mismatch(path, "a boolean", other)),
        },
        Op::In => match raw {
            Json::Array(_) => element(raw, path),
            other => Err(type_mismatch(path, "an array", other)),
        },
        Op::Like => match raw {
            Json::String(s) => Ok(Value::String(s.clone())),
            other => Err(type_mismatch(path, "a string", other)),
        },
        Op::Lt | Op::Lte | Op::Gt | Op::Gte => match raw {
            Json::Number(n) => number::scan_number(n, path),
            Json::String(s) => Ok(Value::String(s.clone())),
            other => Err(type_mismatch(path, "a number or string", other)),
        },
        Op::Match => match raw {
            Json::Array(_) => Err(type_mismatch(path, "a scalar", raw)),
            other => element(other, path),
        },
    }
}

/// Any non-null JSON value other than an object; arrays recurse.
fn element(raw: &Json, path: &str) -> Result<Value, ParseError> {
    match raw {
        Json::String(s) => Ok(Value::String(s.clone())),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => number::scan_number(n, path),
        Json::Array(items) => items
            .iter()
            .map(|item| element(item, path))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        other => Err(type_mismatch(path, "a string, boolean, number or array", other)),
    }
}

fn type_mismatch(path: &str, expected: &'static str, found: &Json) -> ParseError {
    ParseError::TypeMismatch {
        path: path.to_string(),
        expected,
        found: json_type(found),
    }
}

fn json_type(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

fn child(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}.{segment}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Finite;
    use num_bigint::BigInt;
    use std::str::FromStr;

    fn parse_ok(input: &str) -> Expression {
        parse(input).unwrap().unwrap()
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse("   \n").unwrap(), None);
        assert_eq!(parse("{}").unwrap(), None);
        assert_eq!(parse("null").unwrap(), None);
        assert_eq!(parse_slice(b"").unwrap(), None);
        assert_eq!(parse_slice(b" {} ").unwrap(), None);
    }

    #[test]
    fn test_match_leaf() {
        assert_eq!(
            parse_ok(r#"{"$match": {"account": "acc:pending"}}"#),
            Expression::matches("account", "acc:pending")
        );
    }

    #[test]
    fn test_nested_sets_and_not() {
        let expr = parse_ok(
            r#"{"$not": {"$or": [{"$match": {"a": "x"}}, {"$match": {"b": "y"}}]}}"#,
        );
        assert_eq!(
            expr,
            Expression::not(Expression::or([
                Expression::matches("a", "x"),
                Expression::matches("b", "y"),
            ]))
        );
    }

    #[test]
    fn test_big_integer_is_exact() {
        let expr = parse_ok(r#"{"$gte": {"balance": 288230376151711747}}"#);
        assert_eq!(
            expr,
            Expression::KeyValue {
                op: Op::Gte,
                key: "balance".to_string(),
                value: Value::Integer(BigInt::from_str("288230376151711747").unwrap()),
            }
        );
    }

    #[test]
    fn test_float_literals() {
        let expr = parse_ok(r#"{"$lt": {"ratio": 0.25}}"#);
        assert_eq!(expr, Expression::lt("ratio", Finite::new(0.25).unwrap()));
        let expr = parse_ok(r#"{"$lt": {"ratio": 1e2}}"#);
        assert_eq!(expr, Expression::lt("ratio", Finite::new(100.0).unwrap()));
    }

    #[test]
    fn test_in_keeps_order_and_mixed_types() {
        let expr = parse_ok(r#"{"$in": {"k": ["b", 1, true, 2.5, ["n"]]}}"#);
        assert_eq!(
            expr,
            Expression::KeyValue {
                op: Op::In,
                key: "k".to_string(),
                value: Value::List(vec![
                    Value::from("b"),
                    Value::from(1_i64),
                    Value::from(true),
                    Value::try_from(2.5).unwrap(),
                    Value::List(vec![Value::from("n")]),
                ]),
            }
        );
    }

    #[test]
    fn test_comparison_accepts_strings() {
        let expr = parse_ok(r#"{"$gt": {"created_at": "2024-01-01"}}"#);
        assert_eq!(expr, Expression::gt("created_at", "2024-01-01"));
    }

    #[test]
    fn test_root_must_be_object() {
        for input in ["[]", "1", "\"x\"", "true"] {
            assert!(
                matches!(parse(input), Err(ParseError::MalformedJson { .. })),
                "input {input}"
            );
        }
    }

    #[test]
    fn test_syntax_error_is_malformed() {
        assert!(matches!(
            parse(r#"{"$match": "#),
            Err(ParseError::MalformedJson { .. })
        ));
        assert!(matches!(
            parse_slice(b"{nope}"),
            Err(ParseError::MalformedJson { .. })
        ));
    }

    #[test]
    fn test_unknown_operator() {
        let err = parse(r#"{"$and": [{"$regex": {"a": "x"}}]}"#).unwrap_err();
        assert_eq!(
            err,
            ParseError::UnknownOperator {
                path: "$and.0".to_string(),
                operator: "$regex".to_string(),
            }
        );

        let err = parse(r#"{"account": "x"}"#).unwrap_err();
        assert!(matches!(err, ParseError::UnknownOperator { .. }));
    }

    #[test]
    fn test_arity_mismatch() {
        let err = parse(r#"{"$match": {"a": 1, "b": 2}}"#).unwrap_err();
        assert_eq!(
            err,
            ParseError::ArityMismatch {
                path: "$match".to_string(),
                found: 2,
            }
        );

        let err = parse(r#"{"$match": {}}"#).unwrap_err();
        assert!(matches!(err, ParseError::ArityMismatch { found: 0, .. }));

        let err = parse(r#"{"$and": [], "$or": []}"#).unwrap_err();
        assert!(matches!(err, ParseError::ArityMismatch { found: 2, .. }));
    }

    #[test]
    fn test_operator_type_constraints() {
        let cases = [
            (r#"{"$exists": {"a": "yes"}}"#, "$exists"),
            (r#"{"$in": {"a": "x"}}"#, "$in"),
            (r#"{"$like": {"a": 1}}"#, "$like"),
            (r#"{"$gt": {"a": true}}"#, "$gt"),
            (r#"{"$lte": {"a": [1]}}"#, "$lte"),
            (r#"{"$match": {"a": [1]}}"#, "$match"),
            (r#"{"$match": {"a": null}}"#, "$match"),
            (r#"{"$match": {"a": {"b": 1}}}"#, "$match"),
            (r#"{"$in": {"a": [null]}}"#, "$in"),
        ];
        for (input, path) in cases {
            match parse(input) {
                Err(ParseError::TypeMismatch { path: p, .. }) => assert_eq!(p, path, "{input}"),
                other => panic!("expected TypeMismatch for {input}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_set_requires_array() {
        let err = parse(r#"{"$and": {"$match": {"a": 1}}}"#).unwrap_err();
        assert_eq!(
            err,
            ParseError::TypeMismatch {
                path: "$and".to_string(),
                expected: "an array of expressions",
                found: "object",
            }
        );
    }

    #[test]
    fn test_not_requires_object() {
        let err = parse(r#"{"$not": [{"$match": {"a": 1}}]}"#).unwrap_err();
        assert!(matches!(err, ParseError::TypeMismatch { found: "array", .. }));
    }

    #[test]
    fn test_error_path_through_nesting() {
        let err = parse(
            r#"{"$and": [{"$match": {"a": 1}}, {"$not": {"$gt": {"b": false}}}]}"#,
        )
        .unwrap_err();
        assert_eq!(err.path(), "$and.1.$not.$gt");
    }

    #[test]
    fn test_first_error_wins() {
        let err = parse(r#"{"$or": [{"$bogus": {}}, {"$like": {"a": 1}}]}"#).unwrap_err();
        assert!(matches!(err, ParseError::UnknownOperator { .. }));
    }

    #[test]
    fn test_depth_limit() {
        let mut input = String::from(r#"{"$match": {"a": 1}}"#);
        for _ in 0..MAX_DEPTH {
            input = format!(r#"{{"$not": {input}}}"#);
        }
        assert!(matches!(parse(&input), Err(ParseError::TooDeep { .. })));

        let mut input = String::from(r#"{"$match": {"a": 1}}"#);
        for _ in 0..MAX_DEPTH - 1 {
            input = format!(r#"{{"$not": {input}}}"#);
        }
        assert!(parse(&input).is_ok());
    }

    fn and_chain(levels: usize) -> String {
        let mut input = String::from(r#"{"$match": {"a": 1}}"#);
        for _ in 0..levels {
            input = format!(r#"{{"$and": [{input}]}}"#);
        }
        input
    }

    #[test]
    fn test_depth_limit_for_set_chains() {
        // each set adds an object and an array, twice the JSON nesting of $not
        let expr = parse_ok(&and_chain(MAX_DEPTH - 1));
        assert_eq!(expr.depth(), MAX_DEPTH);

        let err = parse(&and_chain(MAX_DEPTH)).unwrap_err();
        assert_eq!(
            err,
            ParseError::TooDeep {
                path: format!("$and{}", ".0.$and".repeat(MAX_DEPTH - 1)) + ".0",
                limit: MAX_DEPTH,
            }
        );
    }

    #[test]
    fn test_nesting_limit_runs_before_decoding() {
        let input = "[".repeat(100_000);
        assert_eq!(
            parse(&input).unwrap_err(),
            ParseError::TooDeep {
                path: String::new(),
                limit: MAX_NESTING,
            }
        );

        // brackets inside strings do not count
        let key = "[{".repeat(MAX_NESTING);
        let input = format!(r#"{{"$match": {{"{key}": "x\\\"]"}}}}"#);
        assert!(parse(&input).is_ok());
    }
}
