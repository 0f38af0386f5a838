//! Condition evaluation
//!
//! Rule conditions are JSON-logic expression trees. The engine only needs
//! `evaluate(tree, data)`; `JsonLogic` is the default interpreter and
//! callers can plug in another `ConditionEvaluator`.

use crate::error::{DecisioningError, Result};
use serde_json::{Number, Value};
use std::cmp::Ordering;

static NULL: Value = Value::Null;

/// Evaluates a condition tree against a context document
pub trait ConditionEvaluator: Send + Sync {
    fn evaluate(&self, condition: &Value, data: &Value) -> Result<Value>;

    /// Evaluate and apply JSON-logic truthiness
    fn matches(&self, condition: &Value, data: &Value) -> Result<bool> {
        Ok(truthy(&self.evaluate(condition, data)?))
    }
}

/// JSON-logic interpreter covering comparison, logic, membership,
/// arithmetic and string operators
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLogic;

impl ConditionEvaluator for JsonLogic {
    fn evaluate(&self, condition: &Value, data: &Value) -> Result<Value> {
        apply(condition, data)
    }
}

/// JSON-logic truthiness: false, null, 0, "" and [] are falsy
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

fn apply(logic: &Value, data: &Value) -> Result<Value> {
    match logic {
        Value::Array(items) => items
            .iter()
            .map(|item| apply(item, data))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) if map.len() == 1 => {
            let Some((op, raw_args)) = map.iter().next() else {
                return Ok(logic.clone());
            };
            let args: Vec<&Value> = match raw_args {
                Value::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            apply_operator(op, &args, data)
        }
        other => Ok(other.clone()),
    }
}

fn apply_operator(op: &str, args: &[&Value], data: &Value) -> Result<Value> {
    // Short-circuiting operators see their arguments unevaluated
    match op {
        "and" => {
            let mut last = Value::Bool(true);
            for arg in args {
                last = apply(arg, data)?;
                if !truthy(&last) {
                    return Ok(last);
                }
            }
            return Ok(last);
        }
        "or" => {
            let mut last = Value::Bool(false);
            for arg in args {
                last = apply(arg, data)?;
                if truthy(&last) {
                    return Ok(last);
                }
            }
            return Ok(last);
        }
        "if" | "?:" => {
            let mut i = 0;
            while i + 1 < args.len() {
                if truthy(&apply(args[i], data)?) {
                    return apply(args[i + 1], data);
                }
                i += 2;
            }
            return match args.get(i) {
                Some(otherwise) => apply(otherwise, data),
                None => Ok(Value::Null),
            };
        }
        _ => {}
    }

    let values = args
        .iter()
        .map(|arg| apply(arg, data))
        .collect::<Result<Vec<_>>>()?;
    let arg = |i: usize| values.get(i).unwrap_or(&NULL);

    let result = match op {
        "var" => var(arg(0), values.get(1), data),
        "missing" => missing(&values, data),
        "==" => Value::Bool(loose_equals(arg(0), arg(1))),
        "!=" => Value::Bool(!loose_equals(arg(0), arg(1))),
        "===" => Value::Bool(arg(0) == arg(1)),
        "!==" => Value::Bool(arg(0) != arg(1)),
        "!" => Value::Bool(!truthy(arg(0))),
        "!!" => Value::Bool(truthy(arg(0))),
        "<" => Value::Bool(chain_compare(&values, |o| o == Ordering::Less)),
        "<=" => Value::Bool(chain_compare(&values, |o| o != Ordering::Greater)),
        ">" => Value::Bool(compare(arg(0), arg(1)) == Some(Ordering::Greater)),
        ">=" => Value::Bool(matches!(
            compare(arg(0), arg(1)),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        "in" => Value::Bool(contains(arg(1), arg(0))),
        "cat" => Value::String(values.iter().map(to_text).collect()),
        "substr" => substr(arg(0), values.get(1), values.get(2)),
        "+" => number(values.iter().filter_map(to_number).sum()),
        "*" => number(values.iter().filter_map(to_number).product()),
        "-" => match (values.len(), to_number(arg(0)), to_number(arg(1))) {
            (1, Some(a), _) => number(-a),
            (_, Some(a), Some(b)) => number(a - b),
            _ => Value::Null,
        },
        "/" => match (to_number(arg(0)), to_number(arg(1))) {
            (Some(a), Some(b)) if b != 0.0 => number(a / b),
            _ => Value::Null,
        },
        "%" => match (to_number(arg(0)), to_number(arg(1))) {
            (Some(a), Some(b)) if b != 0.0 => number(a % b),
            _ => Value::Null,
        },
        "min" => values
            .iter()
            .filter_map(to_number)
            .reduce(f64::min)
            .map_or(Value::Null, number),
        "max" => values
            .iter()
            .filter_map(to_number)
            .reduce(f64::max)
            .map_or(Value::Null, number),
        unknown => {
            return Err(DecisioningError::ConditionEvaluation(format!(
                "Unrecognized operation {}",
                unknown
            )))
        }
    };
    Ok(result)
}

fn var(path: &Value, default: Option<&Value>, data: &Value) -> Value {
    let path = match path {
        Value::Null => return data.clone(),
        Value::String(s) if s.is_empty() => return data.clone(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return default.cloned().unwrap_or(Value::Null),
    };
    lookup(data, &path)
        .cloned()
        .unwrap_or_else(|| default.cloned().unwrap_or(Value::Null))
}

fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    // Flat dotted keys ("mbox.foo") win over nested traversal
    if let Some(value) = data.as_object().and_then(|m| m.get(path)) {
        return Some(value);
    }
    path.split('.').try_fold(data, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn missing(keys: &[Value], data: &Value) -> Value {
    let keys: Vec<&Value> = match keys.first() {
        Some(Value::Array(inner)) => inner.iter().collect(),
        _ => keys.iter().collect(),
    };
    Value::Array(
        keys.into_iter()
            .filter(|key| {
                let found = key.as_str().and_then(|k| lookup(data, k));
                found.map_or(true, |v| v.is_null() || v == &Value::String(String::new()))
            })
            .cloned()
            .collect(),
    )
}

fn number(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::Number(Number::from(f as i64))
    } else {
        Number::from_f64(f).map_or(Value::Null, Value::Number)
    }
}

fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if s.trim().is_empty() => Some(0.0),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(0.0),
        _ => None,
    }
}

fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn loose_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Number(_), _) | (_, Value::Number(_)) | (Value::Bool(_), _) | (_, Value::Bool(_)) => {
            match (to_number(a), to_number(b)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => to_number(a)?.partial_cmp(&to_number(b)?),
    }
}

/// `<` and `<=` accept a third argument for "between" checks
fn chain_compare(values: &[Value], accept: impl Fn(Ordering) -> bool) -> bool {
    if values.len() < 2 {
        return false;
    }
    values
        .windows(2)
        .take(2)
        .all(|pair| compare(&pair[0], &pair[1]).map_or(false, &accept))
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => s.contains(&to_text(needle)),
        Value::Array(items) => items.iter().any(|item| item == needle),
        _ => false,
    }
}

fn substr(source: &Value, start: Option<&Value>, len: Option<&Value>) -> Value {
    let chars: Vec<char> = to_text(source).chars().collect();
    let count = chars.len() as i64;
    let start = start.and_then(to_number).unwrap_or(0.0) as i64;
    let from = if start < 0 { (count + start).max(0) } else { start.min(count) };
    let to = match len.and_then(to_number) {
        Some(l) if l < 0.0 => (count + l as i64).max(from),
        Some(l) => (from + l as i64).min(count),
        None => count,
    };
    Value::String(chars[from as usize..to as usize].iter().collect())
}
