//! Per-record transform evaluation.
//!
//! [`evaluate`] derives one field from a row. The row itself is never
//! mutated; the caller receives an augmented copy.

use serde_json::Value;

use crate::coercion::{as_number, number_value, stringify};
use crate::dsl::{ArithmeticOp, Filter, Operand, StringOperand, Transform};
use crate::error::{RecordError, RecordResult};
use crate::models::Record;

/// Synchronous read of one field on another entity.
///
/// Used by `external_entity_field` operands. Returns `None` when no entity
/// matches the filter or the field is absent.
pub trait ExternalLookup {
    fn lookup(&self, entity_definition: &str, filter: &Filter, field: &str) -> Option<Value>;
}

/// Lookup that never finds anything, for pipelines without a store.
pub struct NoLookup;

impl ExternalLookup for NoLookup {
    fn lookup(&self, _entity_definition: &str, _filter: &Filter, _field: &str) -> Option<Value> {
        None
    }
}

/// Apply `transform` to `row`.
pub fn evaluate(
    transform: &Transform,
    row: &Record,
    lookup: &dyn ExternalLookup,
) -> RecordResult<Record> {
    match transform {
        Transform::None => Ok(row.clone()),

        Transform::Arithmetic { target, left, op, right } => {
            let l = resolve_number(left, row, lookup)?;
            let r = resolve_number(right, row, lookup)?;
            let result = apply(*op, l, r, target)?;

            let mut out = row.clone();
            out.insert(target.clone(), number_value(result));
            Ok(out)
        }

        Transform::Concat { target, left, separator, right } => {
            let l = resolve_string(left, row)?;
            let r = resolve_string(right, row)?;

            let mut out = row.clone();
            out.insert(target.clone(), Value::String(format!("{}{}{}", l, separator, r)));
            Ok(out)
        }
    }
}

fn apply(op: ArithmeticOp, l: f64, r: f64, target: &str) -> RecordResult<f64> {
    let result = match op {
        ArithmeticOp::Add => l + r,
        ArithmeticOp::Sub => l - r,
        ArithmeticOp::Mul => l * r,
        ArithmeticOp::Div => {
            if r == 0.0 {
                return Err(RecordError::DivisionByZero(target.to_string()));
            }
            l / r
        }
    };

    if result.is_finite() {
        Ok(result)
    } else {
        Err(RecordError::NonFinite(target.to_string()))
    }
}

fn resolve_number(
    operand: &Operand,
    row: &Record,
    lookup: &dyn ExternalLookup,
) -> RecordResult<f64> {
    match operand {
        Operand::Const { value } => Ok(*value),

        Operand::Field { field } => {
            let value = present(row, field)?;
            as_number(value).ok_or_else(|| RecordError::NotNumeric {
                field: field.clone(),
                value: stringify(value),
            })
        }

        Operand::ExternalEntityField { entity_definition, filter, field } => {
            let value = lookup
                .lookup(entity_definition, filter, field)
                .filter(|v| !v.is_null())
                .ok_or_else(|| RecordError::LookupMiss {
                    entity: entity_definition.clone(),
                    field: field.clone(),
                })?;
            as_number(&value).ok_or_else(|| RecordError::NotNumeric {
                field: format!("{}.{}", entity_definition, field),
                value: stringify(&value),
            })
        }
    }
}

fn resolve_string(operand: &StringOperand, row: &Record) -> RecordResult<String> {
    match operand {
        StringOperand::ConstString { value } => Ok(value.clone()),
        StringOperand::Field { field } => present(row, field).map(stringify),
    }
}

/// A field that exists and is not null.
fn present<'a>(row: &'a Record, field: &str) -> RecordResult<&'a Value> {
    row.get(field)
        .filter(|v| !v.is_null())
        .ok_or_else(|| RecordError::MissingField(field.to_string()))
}
