//! Leaf values used inside transforms, and entity filters.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use crate::coercion::stringify;

/// Numeric operand of an arithmetic transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operand {
    /// Value of an extracted (or earlier computed) field.
    Field { field: String },

    /// Numeric literal.
    Const { value: f64 },

    /// Field of another entity, matched by a filter.
    ExternalEntityField {
        entity_definition: String,
        filter: Filter,
        field: String,
    },
}

impl Operand {
    pub fn field(name: &str) -> Self {
        Self::Field { field: name.to_string() }
    }

    pub fn constant(value: f64) -> Self {
        Self::Const { value }
    }
}

/// String operand of a concat transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StringOperand {
    Field { field: String },
    ConstString { value: String },
}

impl StringOperand {
    pub fn field(name: &str) -> Self {
        Self::Field { field: name.to_string() }
    }

    pub fn constant(value: &str) -> Self {
        Self::ConstString { value: value.to_string() }
    }
}

/// Arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithmeticOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }
}

/// Comparison used by a [`Filter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    #[default]
    #[serde(alias = "=", alias = "==")]
    Eq,
    #[serde(alias = "!=", alias = "<>")]
    Ne,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = ">=")]
    Gte,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "<=")]
    Lte,
    Contains,
    Like,
    In,
}

/// Single-field entity filter. The operator defaults to equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    #[serde(default)]
    pub operator: FilterOperator,
    pub value: String,
}

impl Filter {
    pub fn eq(field: &str, value: &str) -> Self {
        Self {
            field: field.to_string(),
            operator: FilterOperator::Eq,
            value: value.to_string(),
        }
    }

    pub fn with_operator(mut self, operator: FilterOperator) -> Self {
        self.operator = operator;
        self
    }

    /// Test a field value against this filter. A missing field never matches.
    pub fn matches(&self, candidate: Option<&Value>) -> bool {
        let candidate = match candidate {
            Some(Value::Null) | None => return false,
            Some(v) => stringify(v),
        };
        let expected = self.value.as_str();

        match self.operator {
            FilterOperator::Eq => compare(&candidate, expected) == Ordering::Equal,
            FilterOperator::Ne => compare(&candidate, expected) != Ordering::Equal,
            FilterOperator::Gt => compare(&candidate, expected) == Ordering::Greater,
            FilterOperator::Gte => compare(&candidate, expected) != Ordering::Less,
            FilterOperator::Lt => compare(&candidate, expected) == Ordering::Less,
            FilterOperator::Lte => compare(&candidate, expected) != Ordering::Greater,
            FilterOperator::Contains => candidate
                .to_lowercase()
                .contains(&expected.to_lowercase()),
            FilterOperator::Like => like(&candidate, expected),
            FilterOperator::In => expected
                .split(',')
                .any(|item| compare(&candidate, item.trim()) == Ordering::Equal),
        }
    }
}

/// Numeric comparison when both sides are numbers, string comparison otherwise.
fn compare(left: &str, right: &str) -> Ordering {
    match (left.trim().parse::<f64>(), right.trim().parse::<f64>()) {
        (Ok(l), Ok(r)) => l.partial_cmp(&r).unwrap_or(Ordering::Equal),
        _ => left.cmp(right),
    }
}

/// SQL-style pattern match: `%` is any run, `_` any single character.
fn like(candidate: &str, pattern: &str) -> bool {
    let mut expr = String::from("^");
    for c in pattern.chars() {
        match c {
            '%' => expr.push_str(".*"),
            '_' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');

    RegexBuilder::new(&expr)
        .case_insensitive(true)
        .build()
        .map(|re| re.is_match(candidate))
        .unwrap_or(false)
}
