//! Predicate expression trees.
//!
//! Snapshot activation carries one predicate per output stream, each encoded
//! as a JSON expression tree. This module compiles those trees into [`Expr`]
//! values and evaluates them against a [`Record`], producing one [`Value`]
//! result. A predicate accepts a tuple iff it evaluates to `Boolean(true)`.
//!
//! The JSON encoding uses a `TYPE` tag per node:
//!
//! - `VALUE_CONSTANT` with a `VALUE` field (integer or boolean)
//! - `VALUE_TUPLE` with a `COLUMN_IDX` field (positional column reference)
//! - `COMPARE_EQUAL`, `COMPARE_NOTEQUAL`, `COMPARE_LESSTHAN`,
//!   `COMPARE_LESSTHANOREQUALTO`, `COMPARE_GREATERTHAN`,
//!   `COMPARE_GREATERTHANOREQUALTO` with `LEFT`/`RIGHT` subtrees
//! - `OPERATOR_PLUS`, `OPERATOR_MINUS`, `OPERATOR_MULTIPLY`,
//!   `OPERATOR_DIVIDE`, `OPERATOR_MODULUS` with `LEFT`/`RIGHT` subtrees
//!
//! `OPERATOR_MODULUS` is supported directly; partition-routing predicates
//! are expressed as `column % nparts == part` rather than the historical
//! subtract-multiply-divide workaround.

use std::cmp::Ordering;
use std::fmt;

use crate::datum::Value;
use crate::schema::{Record, TableSchema};

/// Errors from predicate compilation or evaluation.
#[derive(Debug)]
pub enum ExprError {
    /// Input is not valid JSON.
    InvalidJson(String),
    /// A node is missing a required field or has a field of the wrong shape.
    MalformedNode { field: &'static str },
    /// Unknown `TYPE` tag.
    UnknownNodeType(String),
    /// Column reference exceeds the schema's column count.
    ColumnOutOfRange { index: usize, columns: usize },
    /// Operands have incompatible types.
    TypeMismatch { left: String, right: String },
    /// Division or modulus by zero.
    DivisionByZero,
    /// Integer overflow during arithmetic.
    IntegerOverflow,
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprError::InvalidJson(msg) => write!(f, "invalid predicate JSON: {}", msg),
            ExprError::MalformedNode { field } => {
                write!(f, "malformed expression node: missing or bad \"{}\"", field)
            }
            ExprError::UnknownNodeType(tag) => {
                write!(f, "unknown expression node type \"{}\"", tag)
            }
            ExprError::ColumnOutOfRange { index, columns } => {
                write!(
                    f,
                    "column index {} out of range for {} columns",
                    index, columns
                )
            }
            ExprError::TypeMismatch { left, right } => {
                write!(f, "type mismatch: {} vs {}", left, right)
            }
            ExprError::DivisionByZero => write!(f, "division by zero"),
            ExprError::IntegerOverflow => write!(f, "integer overflow"),
        }
    }
}

impl std::error::Error for ExprError {}

/// Binary operators in predicate expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `%`
    Modulus,
}

impl BinaryOp {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "COMPARE_EQUAL" => Some(BinaryOp::Eq),
            "COMPARE_NOTEQUAL" => Some(BinaryOp::Ne),
            "COMPARE_LESSTHAN" => Some(BinaryOp::Lt),
            "COMPARE_LESSTHANOREQUALTO" => Some(BinaryOp::Le),
            "COMPARE_GREATERTHAN" => Some(BinaryOp::Gt),
            "COMPARE_GREATERTHANOREQUALTO" => Some(BinaryOp::Ge),
            "OPERATOR_PLUS" => Some(BinaryOp::Plus),
            "OPERATOR_MINUS" => Some(BinaryOp::Minus),
            "OPERATOR_MULTIPLY" => Some(BinaryOp::Multiply),
            "OPERATOR_DIVIDE" => Some(BinaryOp::Divide),
            "OPERATOR_MODULUS" => Some(BinaryOp::Modulus),
            _ => None,
        }
    }
}

/// A compiled predicate expression.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A literal value.
    Constant(Value),
    /// A positional column reference.
    Column(usize),
    /// A binary operation.
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    /// Compiles a JSON expression tree against a schema.
    ///
    /// Column references are bounds-checked at compile time so evaluation
    /// never has to re-validate them.
    pub fn from_json(text: &str, schema: &TableSchema) -> Result<Expr, ExprError> {
        let root: serde_json::Value =
            serde_json::from_str(text).map_err(|e| ExprError::InvalidJson(e.to_string()))?;
        Self::from_node(&root, schema)
    }

    fn from_node(node: &serde_json::Value, schema: &TableSchema) -> Result<Expr, ExprError> {
        let tag = node
            .get("TYPE")
            .and_then(|v| v.as_str())
            .ok_or(ExprError::MalformedNode { field: "TYPE" })?;

        if let Some(op) = BinaryOp::from_tag(tag) {
            let left = node
                .get("LEFT")
                .ok_or(ExprError::MalformedNode { field: "LEFT" })?;
            let right = node
                .get("RIGHT")
                .ok_or(ExprError::MalformedNode { field: "RIGHT" })?;
            return Ok(Expr::Binary {
                op,
                left: Box::new(Self::from_node(left, schema)?),
                right: Box::new(Self::from_node(right, schema)?),
            });
        }

        match tag {
            "VALUE_CONSTANT" => {
                let value = node
                    .get("VALUE")
                    .ok_or(ExprError::MalformedNode { field: "VALUE" })?;
                let value = if let Some(n) = value.as_i64() {
                    Value::Int64(n)
                } else if let Some(b) = value.as_bool() {
                    Value::Boolean(b)
                } else {
                    return Err(ExprError::MalformedNode { field: "VALUE" });
                };
                Ok(Expr::Constant(value))
            }
            "VALUE_TUPLE" => {
                let index = node
                    .get("COLUMN_IDX")
                    .and_then(|v| v.as_u64())
                    .ok_or(ExprError::MalformedNode {
                        field: "COLUMN_IDX",
                    })? as usize;
                if index >= schema.column_count() {
                    return Err(ExprError::ColumnOutOfRange {
                        index,
                        columns: schema.column_count(),
                    });
                }
                Ok(Expr::Column(index))
            }
            other => Err(ExprError::UnknownNodeType(other.to_string())),
        }
    }

    /// Evaluates the expression against a record.
    pub fn evaluate(&self, record: &Record) -> Result<Value, ExprError> {
        match self {
            Expr::Constant(v) => Ok(v.clone()),
            // Bounds were checked at compile time.
            Expr::Column(index) => Ok(record.values[*index].clone()),
            Expr::Binary { op, left, right } => {
                let l = left.evaluate(record)?;
                let r = right.evaluate(record)?;
                eval_binary_op(&l, *op, &r)
            }
        }
    }

    /// Evaluates the expression as a predicate.
    ///
    /// NULL results count as non-matching, mirroring SQL WHERE semantics.
    pub fn matches(&self, record: &Record) -> Result<bool, ExprError> {
        Ok(matches!(self.evaluate(record)?, Value::Boolean(true)))
    }
}

/// Evaluates a binary operation with NULL propagation.
fn eval_binary_op(left: &Value, op: BinaryOp, right: &Value) -> Result<Value, ExprError> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    match op {
        BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare_values(left, right)?;
            let result = match op {
                BinaryOp::Eq => ordering == Ordering::Equal,
                BinaryOp::Ne => ordering != Ordering::Equal,
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                BinaryOp::Ge => ordering != Ordering::Less,
                _ => unreachable!(),
            };
            Ok(Value::Boolean(result))
        }
        BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Multiply | BinaryOp::Divide
        | BinaryOp::Modulus => eval_arithmetic(left, op, right),
    }
}

/// Compares two values, promoting integers to i64 and floats to f64.
fn compare_values(left: &Value, right: &Value) -> Result<Ordering, ExprError> {
    if let (Some(l), Some(r)) = (as_i64(left), as_i64(right)) {
        return Ok(l.cmp(&r));
    }
    if let (Some(l), Some(r)) = (as_f64(left), as_f64(right)) {
        return Ok(l.total_cmp(&r));
    }
    if let (Value::Boolean(l), Value::Boolean(r)) = (left, right) {
        return Ok(l.cmp(r));
    }
    Err(ExprError::TypeMismatch {
        left: format!("{:?}", left),
        right: format!("{:?}", right),
    })
}

/// Integer-first arithmetic: integer operands stay in i64, float operands
/// promote both sides to f64.
fn eval_arithmetic(left: &Value, op: BinaryOp, right: &Value) -> Result<Value, ExprError> {
    if let (Some(l), Some(r)) = (as_i64(left), as_i64(right)) {
        let result = match op {
            BinaryOp::Plus => l.checked_add(r),
            BinaryOp::Minus => l.checked_sub(r),
            BinaryOp::Multiply => l.checked_mul(r),
            BinaryOp::Divide => {
                if r == 0 {
                    return Err(ExprError::DivisionByZero);
                }
                l.checked_div(r)
            }
            BinaryOp::Modulus => {
                if r == 0 {
                    return Err(ExprError::DivisionByZero);
                }
                l.checked_rem(r)
            }
            _ => unreachable!(),
        };
        return result.map(Value::Int64).ok_or(ExprError::IntegerOverflow);
    }

    if let (Some(l), Some(r)) = (as_f64(left), as_f64(right)) {
        let result = match op {
            BinaryOp::Plus => l + r,
            BinaryOp::Minus => l - r,
            BinaryOp::Multiply => l * r,
            BinaryOp::Divide => l / r,
            BinaryOp::Modulus => l % r,
            _ => unreachable!(),
        };
        return Ok(Value::Float64(result));
    }

    Err(ExprError::TypeMismatch {
        left: format!("{:?}", left),
        right: format!("{:?}", right),
    })
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Int16(n) => Some(*n as i64),
        Value::Int32(n) => Some(*n as i64),
        Value::Int64(n) => Some(*n),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int16(n) => Some(*n as f64),
        Value::Int32(n) => Some(*n as f64),
        Value::Int64(n) => Some(*n as f64),
        Value::Float32(n) => Some(*n as f64),
        Value::Float64(n) => Some(*n),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datum::Type;
    use crate::schema::ColumnSpec;
    use serde_json::json;

    fn schema() -> TableSchema {
        TableSchema::new(
            vec![
                ColumnSpec::new("id", Type::Int4),
                ColumnSpec::new("part", Type::Int4),
            ],
            vec![0],
        )
    }

    /// `part % nparts == part_id`, the partition-routing predicate shape.
    fn partition_predicate(nparts: i64, part_id: i64) -> String {
        json!({
            "TYPE": "COMPARE_EQUAL",
            "LEFT": {
                "TYPE": "OPERATOR_MODULUS",
                "LEFT": { "TYPE": "VALUE_TUPLE", "COLUMN_IDX": 1 },
                "RIGHT": { "TYPE": "VALUE_CONSTANT", "VALUE": nparts },
            },
            "RIGHT": { "TYPE": "VALUE_CONSTANT", "VALUE": part_id },
        })
        .to_string()
    }

    fn record(id: i32, part: i32) -> Record {
        Record::new(vec![Value::Int32(id), Value::Int32(part)])
    }

    #[test]
    fn test_compile_and_match_modulus() {
        let expr = Expr::from_json(&partition_predicate(7, 3), &schema()).unwrap();
        assert!(expr.matches(&record(0, 10)).unwrap());
        assert!(!expr.matches(&record(0, 11)).unwrap());
    }

    #[test]
    fn test_sentinel_partition_matches_nothing() {
        // part_id -1 can never equal a non-negative modulus
        let expr = Expr::from_json(&partition_predicate(7, -1), &schema()).unwrap();
        for part in 0..100 {
            assert!(!expr.matches(&record(0, part)).unwrap());
        }
    }

    #[test]
    fn test_comparisons() {
        let cases = [
            ("COMPARE_EQUAL", 5, true),
            ("COMPARE_NOTEQUAL", 5, false),
            ("COMPARE_LESSTHAN", 6, true),
            ("COMPARE_LESSTHANOREQUALTO", 5, true),
            ("COMPARE_GREATERTHAN", 4, true),
            ("COMPARE_GREATERTHANOREQUALTO", 6, false),
        ];
        for (tag, constant, expected) in cases {
            let text = json!({
                "TYPE": tag,
                "LEFT": { "TYPE": "VALUE_TUPLE", "COLUMN_IDX": 1 },
                "RIGHT": { "TYPE": "VALUE_CONSTANT", "VALUE": constant },
            })
            .to_string();
            let expr = Expr::from_json(&text, &schema()).unwrap();
            assert_eq!(expr.matches(&record(0, 5)).unwrap(), expected, "{}", tag);
        }
    }

    #[test]
    fn test_division_by_zero() {
        let text = json!({
            "TYPE": "OPERATOR_MODULUS",
            "LEFT": { "TYPE": "VALUE_TUPLE", "COLUMN_IDX": 1 },
            "RIGHT": { "TYPE": "VALUE_CONSTANT", "VALUE": 0 },
        })
        .to_string();
        let expr = Expr::from_json(&text, &schema()).unwrap();
        assert!(matches!(
            expr.evaluate(&record(0, 5)),
            Err(ExprError::DivisionByZero)
        ));
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(matches!(
            Expr::from_json("{not json", &schema()),
            Err(ExprError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let text = json!({ "TYPE": "OPERATOR_CONCAT" }).to_string();
        assert!(matches!(
            Expr::from_json(&text, &schema()),
            Err(ExprError::UnknownNodeType(_))
        ));
    }

    #[test]
    fn test_column_out_of_range_rejected() {
        let text = json!({ "TYPE": "VALUE_TUPLE", "COLUMN_IDX": 9 }).to_string();
        assert!(matches!(
            Expr::from_json(&text, &schema()),
            Err(ExprError::ColumnOutOfRange { index: 9, columns: 2 })
        ));
    }

    #[test]
    fn test_arithmetic_chain() {
        // (part - (part / 3) * 3) == 2, the historical modulus workaround,
        // still compiles and evaluates correctly.
        let tuple = json!({ "TYPE": "VALUE_TUPLE", "COLUMN_IDX": 1 });
        let text = json!({
            "TYPE": "COMPARE_EQUAL",
            "LEFT": {
                "TYPE": "OPERATOR_MINUS",
                "LEFT": tuple,
                "RIGHT": {
                    "TYPE": "OPERATOR_MULTIPLY",
                    "LEFT": {
                        "TYPE": "OPERATOR_DIVIDE",
                        "LEFT": tuple,
                        "RIGHT": { "TYPE": "VALUE_CONSTANT", "VALUE": 3 },
                    },
                    "RIGHT": { "TYPE": "VALUE_CONSTANT", "VALUE": 3 },
                },
            },
            "RIGHT": { "TYPE": "VALUE_CONSTANT", "VALUE": 2 },
        })
        .to_string();
        let expr = Expr::from_json(&text, &schema()).unwrap();
        assert!(expr.matches(&record(0, 8)).unwrap());
        assert!(!expr.matches(&record(0, 9)).unwrap());
    }
}
