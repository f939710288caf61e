//! Filter grammar shared by the document, column, and graph engines.
//!
//! A filter is a top-level conjunction of field predicates parsed from a
//! [`Value::Object`]. A predicate is either equality by value, or a mapping
//! of comparison operators:
//!
//! ```text
//! {"age": {"$gt": 30}, "city": "zurich"}
//! ```
//!
//! Comparisons use [`Value::compare`], which is defined only within a
//! variant; a type mismatch is a non-match, never an error. This applies to
//! `$ne` too: `{"age": {"$ne": "x"}}` does not match an integer age.

use crate::error::{Error, Result};
use crate::value::{Object, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Comparison operators understood inside a `$`-mapping predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    /// `$gt`
    Gt,
    /// `$gte`
    Gte,
    /// `$lt`
    Lt,
    /// `$lte`
    Lte,
    /// `$ne`
    Ne,
}

impl CmpOp {
    fn parse(token: &str) -> Option<CmpOp> {
        match token {
            "$gt" => Some(CmpOp::Gt),
            "$gte" => Some(CmpOp::Gte),
            "$lt" => Some(CmpOp::Lt),
            "$lte" => Some(CmpOp::Lte),
            "$ne" => Some(CmpOp::Ne),
            _ => None,
        }
    }

    fn eval(self, lhs: &Value, rhs: &Value) -> bool {
        match lhs.compare(rhs) {
            Some(ordering) => match self {
                CmpOp::Gt => ordering == Ordering::Greater,
                CmpOp::Gte => ordering != Ordering::Less,
                CmpOp::Lt => ordering == Ordering::Less,
                CmpOp::Lte => ordering != Ordering::Greater,
                CmpOp::Ne => ordering != Ordering::Equal,
            },
            None => false,
        }
    }
}

/// A single field predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Match when the field value equals the operand.
    Equals(Value),
    /// Match when every comparison holds.
    Compare(Vec<(CmpOp, Value)>),
}

impl Predicate {
    fn matches(&self, field_value: Option<&Value>) -> bool {
        match self {
            Predicate::Equals(expected) => field_value == Some(expected),
            Predicate::Compare(comparisons) => match field_value {
                Some(actual) => comparisons.iter().all(|(op, rhs)| op.eval(actual, rhs)),
                None => false,
            },
        }
    }
}

/// A parsed conjunctive filter.
///
/// The empty filter matches everything.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Filter {
    clauses: Vec<(String, Predicate)>,
}

impl Filter {
    /// Parse a filter from its wire shape.
    ///
    /// The shape must be an object. An object-valued predicate whose keys
    /// all start with `$` is an operator mapping; an unknown `$`-operator is
    /// rejected. Any other object operand is equality-by-object.
    pub fn parse(shape: &Value) -> Result<Filter> {
        let fields = shape.as_object().ok_or_else(|| {
            Error::InvalidArgument(format!("filter must be an object, got {}", shape.type_name()))
        })?;
        Self::parse_object(fields)
    }

    /// Parse a filter from an already-borrowed object.
    pub fn parse_object(fields: &Object) -> Result<Filter> {
        let mut clauses = Vec::with_capacity(fields.len());
        for (field, operand) in fields {
            clauses.push((field.clone(), Self::parse_predicate(field, operand)?));
        }
        Ok(Filter { clauses })
    }

    /// Build a single-field equality filter.
    pub fn equals(field: impl Into<String>, value: Value) -> Filter {
        Filter {
            clauses: vec![(field.into(), Predicate::Equals(value))],
        }
    }

    fn parse_predicate(field: &str, operand: &Value) -> Result<Predicate> {
        let Some(mapping) = operand.as_object() else {
            return Ok(Predicate::Equals(operand.clone()));
        };
        if mapping.is_empty() || !mapping.keys().all(|k| k.starts_with('$')) {
            return Ok(Predicate::Equals(operand.clone()));
        }

        let mut comparisons = Vec::with_capacity(mapping.len());
        for (token, rhs) in mapping {
            let op = CmpOp::parse(token).ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "unknown comparison operator {} on field {}",
                    token, field
                ))
            })?;
            comparisons.push((op, rhs.clone()));
        }
        Ok(Predicate::Compare(comparisons))
    }

    /// True when the filter has no clauses.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Evaluate the filter against a record.
    pub fn matches(&self, record: &Object) -> bool {
        self.clauses
            .iter()
            .all(|(field, predicate)| predicate.matches(record.get(field)))
    }

    /// The index fast path: a single equality clause, if that is all there
    /// is.
    pub fn single_equality(&self) -> Option<(&str, &Value)> {
        match self.clauses.as_slice() {
            [(field, Predicate::Equals(value))] => Some((field.as_str(), value)),
            _ => None,
        }
    }

    /// Fields this filter constrains, in clause order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.clauses.iter().map(|(field, _)| field.as_str())
    }
}
