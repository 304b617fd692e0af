//! Argument validation and coercion
//!
//! Inbound parameters are checked against the target's declared parameters
//! before the callable runs: defaults are filled in, loosely typed scalars
//! (`"42"`, `"true"`) are coerced and constraints are enforced. Every problem
//! is collected so the caller sees all of them at once.

use lazy_static::lazy_static;
use op_core::{Error, ParamType, ParameterDescriptor, PolicyViolationKind, Result};
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::sync::RwLock;

lazy_static! {
    /// Compiled constraint patterns, keyed by source
    static ref PATTERNS: RwLock<HashMap<String, Regex>> = RwLock::new(HashMap::new());
}

/// Match `text` against `pattern`, compiling the pattern on first use
fn pattern_matches(pattern: &str, text: &str) -> std::result::Result<bool, regex::Error> {
    if let Ok(cache) = PATTERNS.read() {
        if let Some(re) = cache.get(pattern) {
            return Ok(re.is_match(text));
        }
    }
    let re = Regex::new(pattern)?;
    let matched = re.is_match(text);
    if let Ok(mut cache) = PATTERNS.write() {
        cache.insert(pattern.to_string(), re);
    }
    Ok(matched)
}

/// Arguments ready for the callable, plus the control parameters split off
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedArguments {
    pub arguments: Map<String, Value>,
    pub control: Map<String, Value>,
}

impl PreparedArguments {
    pub fn into_value(self) -> Value {
        Value::Object(self.arguments)
    }

    /// `dry_run` control flag
    pub fn dry_run(&self) -> bool {
        match self.control.get("dry_run") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => parse_bool(s) == Some(true),
            _ => false,
        }
    }

    /// `timeout_ms` control override
    pub fn timeout_ms(&self) -> Result<Option<u64>> {
        match self.control.get("timeout_ms") {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| invalid("timeout_ms must be a positive integer")),
            Some(Value::String(s)) => s
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| invalid("timeout_ms must be a positive integer")),
            Some(_) => Err(invalid("timeout_ms must be a positive integer")),
        }
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::policy(PolicyViolationKind::InvalidParameters, message)
}

/// Validate `input` against `parameters`
///
/// Keys listed in `control` are moved to [`PreparedArguments::control`].
/// Keys not declared anywhere pass through untouched.
pub fn prepare_arguments(
    parameters: &[ParameterDescriptor],
    input: &Value,
    control: &[String],
) -> Result<PreparedArguments> {
    let mut remaining = match input {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(invalid(format!(
                "parameters must be an object, got {}",
                json_type(other)
            )))
        }
    };

    let mut prepared = PreparedArguments::default();
    for name in control {
        if let Some(value) = remaining.remove(name) {
            prepared.control.insert(name.clone(), value);
        }
    }

    let mut problems = Vec::new();
    for descriptor in parameters {
        let supplied = remaining.remove(&descriptor.name).filter(|v| !v.is_null());
        let value = match (supplied, &descriptor.default) {
            (Some(value), _) => value,
            (None, Some(default)) => {
                prepared
                    .arguments
                    .insert(descriptor.name.clone(), default.clone());
                continue;
            }
            (None, None) if descriptor.required => {
                problems.push(format!("missing required parameter '{}'", descriptor.name));
                continue;
            }
            (None, None) => continue,
        };

        match coerce(descriptor, value).and_then(|v| check_constraints(descriptor, v)) {
            Ok(value) => {
                prepared.arguments.insert(descriptor.name.clone(), value);
            }
            Err(problem) => problems.push(format!("'{}' {}", descriptor.name, problem)),
        }
    }

    if !problems.is_empty() {
        return Err(invalid(problems.join("; ")));
    }

    prepared.arguments.extend(remaining);
    Ok(prepared)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn coerce_scalar(ty: ParamType, value: Value) -> std::result::Result<Value, String> {
    if ty.accepts(&value) {
        return Ok(value);
    }
    let mismatch = |v: &Value| format!("expected {}, got {}", ty, json_type(v));

    match (ty, &value) {
        (ParamType::Integer, Value::Number(n)) => n
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| Value::from(f as i64))
            .ok_or_else(|| mismatch(&value)),
        (ParamType::Integer, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("expected integer, got '{}'", s)),
        (ParamType::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("expected number, got '{}'", s)),
        (ParamType::Boolean, Value::String(s)) => parse_bool(s)
            .map(Value::Bool)
            .ok_or_else(|| format!("expected boolean, got '{}'", s)),
        _ => Err(mismatch(&value)),
    }
}

fn coerce(descriptor: &ParameterDescriptor, value: Value) -> std::result::Result<Value, String> {
    let value = coerce_scalar(descriptor.declared_type, value)?;

    let Some(item_type) = descriptor.item_type else {
        return Ok(value);
    };
    match value {
        Value::Array(items) if descriptor.declared_type == ParamType::Array => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| coerce_scalar(item_type, item).map_err(|e| format!("item {}: {}", i, e)))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(entries) if descriptor.declared_type == ParamType::Object => entries
            .into_iter()
            .map(|(k, v)| {
                coerce_scalar(item_type, v)
                    .map(|v| (k.clone(), v))
                    .map_err(|e| format!("entry '{}': {}", k, e))
            })
            .collect::<std::result::Result<Map<_, _>, _>>()
            .map(Value::Object),
        other => Ok(other),
    }
}

fn check_constraints(descriptor: &ParameterDescriptor, value: Value) -> std::result::Result<Value, String> {
    let c = &descriptor.constraints;

    if let Some(n) = value.as_f64() {
        if let Some(min) = c.min {
            if c.exclusive_min && n <= min {
                return Err(format!("must be > {}", min));
            }
            if n < min {
                return Err(format!("must be >= {}", min));
            }
        }
        if let Some(max) = c.max {
            if c.exclusive_max && n >= max {
                return Err(format!("must be < {}", max));
            }
            if n > max {
                return Err(format!("must be <= {}", max));
            }
        }
    }

    let length = match &value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(a) => Some(a.len()),
        Value::Object(o) => Some(o.len()),
        _ => None,
    };
    if let Some(len) = length {
        if let Some(min) = c.min_length.filter(|min| len < *min) {
            return Err(format!("length must be >= {}", min));
        }
        if let Some(max) = c.max_length.filter(|max| len > *max) {
            return Err(format!("length must be <= {}", max));
        }
    }

    if let (Some(pattern), Value::String(s)) = (&c.pattern, &value) {
        let matched =
            pattern_matches(pattern, s).map_err(|e| format!("has an invalid pattern: {}", e))?;
        if !matched {
            return Err(format!("does not match pattern '{}'", pattern));
        }
    }

    if let Some(allowed) = &c.allowed_values {
        if !allowed.contains(&value) {
            let listed: Vec<String> = allowed.iter().map(ToString::to_string).collect();
            return Err(format!("must be one of {}", listed.join(", ")));
        }
    }

    Ok(value)
}
