//! Type coercion at the entity boundary.
//!
//! [`coerce`] turns whatever a source produced into the JSON shape an entity
//! field of a given [`FieldType`] stores. It is total: input that cannot be
//! represented becomes `null`, which the destination then checks against the
//! field's `required` flag.

use serde_json::{Number, Value};

use crate::models::FieldType;

/// Coerce a value to the storage shape of `field_type`.
///
/// Never panics, and `coerce(coerce(v, t), t) == coerce(v, t)`.
pub fn coerce(value: &Value, field_type: &FieldType) -> Value {
    if is_blank(value) {
        return Value::Null;
    }

    match field_type {
        FieldType::Boolean => to_boolean(value),
        FieldType::Integer => to_integer(value),
        FieldType::Float => to_float(value),
        FieldType::Date | FieldType::DateTime => match value {
            Value::String(_) => value.clone(),
            _ => Value::Null,
        },
        FieldType::Object | FieldType::Array => to_container(value),
        FieldType::String
        | FieldType::Text
        | FieldType::Wysiwyg
        | FieldType::Select
        | FieldType::Uuid
        | FieldType::Password
        | FieldType::Email
        | FieldType::Url
        | FieldType::Other(_) => Value::String(stringify(value)),
    }
}

/// Render a value as plain text.
///
/// Strings are returned without quotes, `null` as the empty string and
/// containers as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Read a value as a number, if it is one or a string holding one.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// JSON number for `f`, written as an integer when it is integral and fits.
pub fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Value::Number(Number::from(f as i64))
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn to_boolean(value: &Value) -> Value {
    match value {
        Value::Bool(_) => value.clone(),
        Value::String(s) => Value::Bool(matches!(
            s.trim().to_lowercase().as_str(),
            "true" | "1" | "yes" | "on"
        )),
        Value::Number(n) => Value::Bool(n.as_f64().is_some_and(|f| f != 0.0)),
        _ => Value::Null,
    }
}

fn to_integer(value: &Value) -> Value {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Value::Number(i.into());
            }
            match n.as_f64().map(f64::trunc) {
                Some(f) if f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                    Value::Number((f as i64).into())
                }
                _ => Value::Null,
            }
        }
        Value::String(s) => leading_integer(s)
            .map(|i| Value::Number(i.into()))
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Optional sign followed by the leading run of base-10 digits.
fn leading_integer(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (sign, rest) = match s.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", s.strip_prefix('+').unwrap_or(s)),
    };
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    format!("{}{}", sign, digits).parse::<i64>().ok()
}

fn to_float(value: &Value) -> Value {
    match value {
        Value::Number(_) => value.clone(),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn to_container(value: &Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => value.clone(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed @ (Value::Array(_) | Value::Object(_))) => parsed,
            _ => Value::Null,
        },
        _ => Value::Null,
    }
}
