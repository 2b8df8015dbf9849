//! Metadata filter compilation and evaluation.
//!
//! A filter spec maps field names to constraints. A constraint is either a
//! bare scalar (implicit `eq`) or an operator map such as
//! `{"gte": 3, "lt": 10}`. Operators within one field AND together, as do
//! the fields themselves. Compilation happens once per search; evaluation is
//! a side-effect-free predicate over a chunk's metadata snapshot.
//!
//! Malformed specs fail at compile time with `InvalidFilter`, never per
//! candidate.

use crate::error::{Result, StoreError};
use crate::value::{Metadata, OrderedValue, Value};

/// Wire form of a filter: a JSON object, field name to constraint.
pub type FilterSpec = serde_json::Map<String, serde_json::Value>;

/// A compiled filter: conjunction of per-field clauses.
#[derive(Clone, Debug)]
pub struct Filter {
    clauses: Vec<FieldClause>,
}

#[derive(Clone, Debug)]
struct FieldClause {
    field: String,
    conditions: Vec<Condition>,
}

#[derive(Clone, Debug)]
enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(OrderedValue),
    Gte(OrderedValue),
    Lt(OrderedValue),
    Lte(OrderedValue),
    /// Lowercased operand; matches case-insensitive substrings of string fields.
    Contains(String),
    In(Vec<Value>),
    Nin(Vec<Value>),
}

impl Filter {
    /// A filter that accepts every chunk.
    #[must_use]
    pub fn universal() -> Self {
        Self { clauses: Vec::new() }
    }

    /// Compile a filter spec into a predicate.
    pub fn compile(spec: &FilterSpec) -> Result<Self> {
        let mut clauses = Vec::with_capacity(spec.len());
        for (field, constraint) in spec {
            let conditions = match constraint {
                serde_json::Value::Object(ops) => ops
                    .iter()
                    .map(|(op, operand)| compile_condition(op, operand))
                    .collect::<Result<Vec<_>>>()?,
                scalar => vec![Condition::Eq(operand_value(scalar)?)],
            };
            clauses.push(FieldClause {
                field: field.clone(),
                conditions,
            });
        }
        Ok(Self { clauses })
    }

    /// True when the spec had no entries: the universal predicate.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Evaluate the predicate against a metadata snapshot.
    #[must_use]
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.clauses.iter().all(|clause| {
            let field_value = metadata.get(&clause.field);
            clause.conditions.iter().all(|c| c.matches(field_value))
        })
    }
}

fn operand_value(raw: &serde_json::Value) -> Result<Value> {
    Value::try_from(raw)
        .map_err(|e| StoreError::InvalidFilter(format!("malformed operand: {e}")))
}

fn ordered_operand(op: &str, raw: &serde_json::Value) -> Result<OrderedValue> {
    operand_value(raw)?.as_ordered().ok_or_else(|| {
        StoreError::InvalidFilter(format!(
            "operator `{op}` requires a number or ISO date operand"
        ))
    })
}

fn list_operand(op: &str, raw: &serde_json::Value) -> Result<Vec<Value>> {
    match operand_value(raw)? {
        Value::Array(items) => Ok(items),
        _ => Err(StoreError::InvalidFilter(format!(
            "operator `{op}` requires a list operand"
        ))),
    }
}

fn compile_condition(op: &str, operand: &serde_json::Value) -> Result<Condition> {
    match op {
        "eq" => Ok(Condition::Eq(operand_value(operand)?)),
        "ne" => Ok(Condition::Ne(operand_value(operand)?)),
        "gt" => Ok(Condition::Gt(ordered_operand(op, operand)?)),
        "gte" => Ok(Condition::Gte(ordered_operand(op, operand)?)),
        "lt" => Ok(Condition::Lt(ordered_operand(op, operand)?)),
        "lte" => Ok(Condition::Lte(ordered_operand(op, operand)?)),
        "contains" => match operand_value(operand)? {
            Value::String(s) => Ok(Condition::Contains(s.to_lowercase())),
            _ => Err(StoreError::InvalidFilter(
                "operator `contains` requires a string operand".to_string(),
            )),
        },
        "in" => Ok(Condition::In(list_operand(op, operand)?)),
        "nin" => Ok(Condition::Nin(list_operand(op, operand)?)),
        other => Err(StoreError::InvalidFilter(format!(
            "unknown operator `{other}`"
        ))),
    }
}

impl Condition {
    fn matches(&self, field: Option<&Value>) -> bool {
        match self {
            Condition::Eq(operand) => field == Some(operand),
            Condition::Ne(operand) => field != Some(operand),
            Condition::Gt(operand) => ordering_holds(field, operand, |o| o.is_gt()),
            Condition::Gte(operand) => ordering_holds(field, operand, |o| o.is_ge()),
            Condition::Lt(operand) => ordering_holds(field, operand, |o| o.is_lt()),
            Condition::Lte(operand) => ordering_holds(field, operand, |o| o.is_le()),
            Condition::Contains(needle) => match field {
                Some(Value::String(s)) => s.to_lowercase().contains(needle),
                _ => false,
            },
            Condition::In(list) => field.is_some_and(|v| list.contains(v)),
            Condition::Nin(list) => field.is_none_or(|v| !list.contains(v)),
        }
    }
}

fn ordering_holds(
    field: Option<&Value>,
    operand: &OrderedValue,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> bool {
    field
        .and_then(Value::as_ordered)
        .and_then(|f| f.compare(operand))
        .is_some_and(accept)
}
