//! Per-scenario key→value scratchpad plus the `$ident(.ident)* [op literal]`
//! expression grammar used to reference it from a later parameter map.
//!
//! Per §9's re-architecture note: the source embeds a general
//! `Function("return ...")` evaluator; this is limited to the one
//! grammar the spec actually needs.

use std::collections::HashMap;

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ResolveError {
    #[error("context has no key `{0}`")]
    UnknownKey(String),
    #[error("`{0}` has no field `{1}`")]
    UnknownField(String, String),
    #[error("`{0}.{1}` is not numeric, cannot apply `{2}`")]
    NotNumeric(String, String, char),
}

#[derive(Debug, Default, Clone)]
pub struct Context {
    values: HashMap<String, serde_json::Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.values.insert(key.into(), value);
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Resolves `$ident.field` or `$ident.field op literal` against the
    /// context. Returns the literal `raw` unchanged if it isn't a `$`
    /// reference at all (plain literals pass through parameter maps
    /// untouched).
    pub fn resolve(&self, raw: &str) -> Result<serde_json::Value, ResolveError> {
        let Some(captures) = EXPRESSION.captures(raw) else {
            return Ok(serde_json::Value::String(raw.to_string()));
        };
        let key = &captures[1];
        let field = &captures[2];
        let op = captures.get(3).map(|m| m.as_str().chars().next().unwrap());
        let literal = captures.get(4).map(|m| m.as_str());

        let base = self
            .values
            .get(key)
            .ok_or_else(|| ResolveError::UnknownKey(key.to_string()))?;
        let value = field_of(base, field).ok_or_else(|| ResolveError::UnknownField(key.to_string(), field.to_string()))?;

        match (op, literal) {
            (Some(op), Some(literal)) => {
                let lhs = value
                    .as_f64()
                    .or_else(|| value.as_str().and_then(|s| s.parse::<f64>().ok()))
                    .ok_or(ResolveError::NotNumeric(key.to_string(), field.to_string(), op))?;
                let rhs: f64 = literal.parse().map_err(|_| ResolveError::NotNumeric(key.to_string(), field.to_string(), op))?;
                let result = match op {
                    '+' => lhs + rhs,
                    '-' => lhs - rhs,
                    '*' => lhs * rhs,
                    '/' => lhs / rhs,
                    _ => unreachable!("regex only captures +-*/"),
                };
                Ok(serde_json::json!(result))
            }
            _ => Ok(value.clone()),
        }
    }
}

fn field_of<'a>(value: &'a serde_json::Value, field: &str) -> Option<&'a serde_json::Value> {
    value.get(field)
}

static EXPRESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$(\w+)\.(\w+)(?:\s*([+\-*/])\s*(-?\d+(?:\.\d+)?))?$").expect("static expression regex is valid")
});

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn plain_literal_passes_through() {
        let ctx = Context::new();
        assert_eq!(ctx.resolve("BTCUSDT").unwrap(), serde_json::json!("BTCUSDT"));
    }

    #[test]
    fn resolves_simple_field_reference() {
        let mut ctx = Context::new();
        ctx.set("price", serde_json::json!({"price": "100.00"}));
        assert_eq!(ctx.resolve("$price.price").unwrap(), serde_json::json!("100.00"));
    }

    #[test]
    fn resolves_arithmetic_expression() {
        let mut ctx = Context::new();
        ctx.set("price", serde_json::json!({"price": "100.00"}));
        let resolved = ctx.resolve("$price.price * 0.85").unwrap();
        assert_eq!(resolved.as_f64().unwrap(), 85.0);
    }

    #[test]
    fn unknown_key_is_an_error() {
        let ctx = Context::new();
        assert_eq!(ctx.resolve("$missing.field"), Err(ResolveError::UnknownKey("missing".to_string())));
    }

    #[test]
    fn clear_empties_context() {
        let mut ctx = Context::new();
        ctx.set("a", serde_json::json!(1));
        ctx.clear();
        assert!(ctx.is_empty());
    }

    // §8 "Parameter-resolution roundtrip": for every `$k.f` the resolved
    // value equals `v.f`; for `$k.f op literal` it equals the arithmetic
    // result.
    proptest! {
        #[test]
        fn field_reference_resolves_to_the_exact_stored_value(v in -1_000_000f64..1_000_000f64) {
            let mut ctx = Context::new();
            ctx.set("k", serde_json::json!({"f": v}));
            let resolved = ctx.resolve("$k.f").unwrap();
            prop_assert_eq!(resolved.as_f64().unwrap(), v);
        }

        #[test]
        fn arithmetic_expression_matches_the_operator(
            v in -1_000f64..1_000f64,
            literal in -1_000f64..1_000f64,
            op_index in 0usize..4,
        ) {
            let op = ['+', '-', '*', '/'][op_index];
            prop_assume!(!(op == '/' && literal == 0.0));
            let mut ctx = Context::new();
            ctx.set("k", serde_json::json!({"f": v}));
            let resolved = ctx.resolve(&format!("$k.f {op} {literal}")).unwrap();
            let expected = match op {
                '+' => v + literal,
                '-' => v - literal,
                '*' => v * literal,
                '/' => v / literal,
                _ => unreachable!(),
            };
            prop_assert_eq!(resolved.as_f64().unwrap(), expected);
        }
    }
}
