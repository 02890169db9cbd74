//! Activation input parsing and the per-stream predicate set.
//!
//! Snapshot activation carries a byte payload (big-endian framing):
//!
//! ```text
//! byte   deleteAsWeGo         (0 or 1)
//! int32  numPredicates
//! repeat numPredicates times:
//!     int32  predicateStrLen
//!     bytes  predicateStr     (UTF-8 JSON expression tree)
//! ```
//!
//! Predicates are compiled eagerly so a malformed request is rejected before
//! the table enters snapshot mode. An empty predicate list means every
//! stream accepts every tuple.

use std::fmt;

use bytes::Buf;

use crate::expr::{Expr, ExprError};
use crate::schema::{Record, TableSchema};

/// Errors from activation input parsing or predicate compilation.
#[derive(Debug)]
pub enum ActivationError {
    /// The activation payload ended prematurely.
    Truncated { needed: usize, remaining: usize },
    /// A length field is negative.
    NegativeLength(i32),
    /// A predicate string is not valid UTF-8.
    InvalidUtf8(std::string::FromUtf8Error),
    /// A predicate failed to compile.
    Compilation(ExprError),
}

impl fmt::Display for ActivationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationError::Truncated { needed, remaining } => {
                write!(
                    f,
                    "activation input truncated: need {} bytes, have {}",
                    needed, remaining
                )
            }
            ActivationError::NegativeLength(n) => {
                write!(f, "negative length field {} in activation input", n)
            }
            ActivationError::InvalidUtf8(e) => write!(f, "predicate is not UTF-8: {}", e),
            ActivationError::Compilation(e) => write!(f, "predicate compilation failed: {}", e),
        }
    }
}

impl std::error::Error for ActivationError {}

impl From<ExprError> for ActivationError {
    fn from(e: ExprError) -> Self {
        ActivationError::Compilation(e)
    }
}

/// The ordered set of compiled per-stream filters.
#[derive(Debug, Default)]
pub struct PredicateSet {
    predicates: Vec<Expr>,
}

impl PredicateSet {
    /// Creates an empty set (all streams accept all tuples).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compiles a list of JSON predicate strings against a schema.
    pub fn compile(texts: &[String], schema: &TableSchema) -> Result<Self, ActivationError> {
        let predicates = texts
            .iter()
            .map(|text| Expr::from_json(text, schema))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { predicates })
    }

    /// Returns the number of predicates.
    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    /// Returns true if no predicates were supplied.
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Evaluates every predicate against a record, producing one acceptance
    /// flag per output stream.
    ///
    /// With no predicates, all `stream_count` streams accept the record.
    pub fn acceptance(&self, record: &Record, stream_count: usize) -> Result<Vec<bool>, ExprError> {
        if self.predicates.is_empty() {
            return Ok(vec![true; stream_count]);
        }
        debug_assert_eq!(self.predicates.len(), stream_count);
        self.predicates
            .iter()
            .map(|p| p.matches(record))
            .collect()
    }
}

/// A parsed and compiled snapshot activation request.
#[derive(Debug)]
pub struct ActivationRequest {
    /// Delete each streamed tuple from the table after it is written.
    pub delete_as_we_go: bool,
    /// Compiled per-stream filters.
    pub predicates: PredicateSet,
}

impl ActivationRequest {
    /// Parses the activation byte payload and compiles its predicates.
    pub fn parse(input: &[u8], schema: &TableSchema) -> Result<Self, ActivationError> {
        let mut src = input;

        ensure_remaining(&src, 1)?;
        let delete_as_we_go = src.get_u8() != 0;

        ensure_remaining(&src, 4)?;
        let count = src.get_i32();
        if count < 0 {
            return Err(ActivationError::NegativeLength(count));
        }

        let mut texts = Vec::with_capacity(count as usize);
        for _ in 0..count {
            ensure_remaining(&src, 4)?;
            let len = src.get_i32();
            if len < 0 {
                return Err(ActivationError::NegativeLength(len));
            }
            ensure_remaining(&src, len as usize)?;
            let raw = src.copy_to_bytes(len as usize).to_vec();
            texts.push(String::from_utf8(raw).map_err(ActivationError::InvalidUtf8)?);
        }

        let predicates = PredicateSet::compile(&texts, schema)?;
        Ok(Self {
            delete_as_we_go,
            predicates,
        })
    }
}

fn ensure_remaining(src: &&[u8], needed: usize) -> Result<(), ActivationError> {
    if src.remaining() < needed {
        return Err(ActivationError::Truncated {
            needed,
            remaining: src.remaining(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datum::{Type, Value};
    use crate::schema::ColumnSpec;
    use bytes::{BufMut, BytesMut};
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

    fn predicate_json(nparts: i64, part: i64) -> String {
        json!({
            "TYPE": "COMPARE_EQUAL",
            "LEFT": {
                "TYPE": "OPERATOR_MODULUS",
                "LEFT": { "TYPE": "VALUE_TUPLE", "COLUMN_IDX": 1 },
                "RIGHT": { "TYPE": "VALUE_CONSTANT", "VALUE": nparts },
            },
            "RIGHT": { "TYPE": "VALUE_CONSTANT", "VALUE": part },
        })
        .to_string()
    }

    fn encode_activation(delete_as_we_go: bool, predicates: &[String]) -> Vec<u8> {
        let mut out = BytesMut::new();
        out.put_u8(delete_as_we_go as u8);
        out.put_i32(predicates.len() as i32);
        for p in predicates {
            out.put_i32(p.len() as i32);
            out.put_slice(p.as_bytes());
        }
        out.to_vec()
    }

    #[test]
    fn test_parse_empty_config() {
        // Five zero bytes: deleteAsWeGo off, zero predicates
        let request = ActivationRequest::parse(&[0u8; 5], &schema()).unwrap();
        assert!(!request.delete_as_we_go);
        assert!(request.predicates.is_empty());
    }

    #[test]
    fn test_empty_set_accepts_everything() {
        let set = PredicateSet::empty();
        let record = Record::new(vec![Value::Int32(1), Value::Int32(2)]);
        assert_eq!(set.acceptance(&record, 3).unwrap(), vec![true, true, true]);
    }

    #[test]
    fn test_parse_routes_by_partition() {
        let texts = vec![predicate_json(2, 0), predicate_json(2, 1)];
        let input = encode_activation(true, &texts);
        let request = ActivationRequest::parse(&input, &schema()).unwrap();
        assert!(request.delete_as_we_go);
        assert_eq!(request.predicates.len(), 2);

        let even = Record::new(vec![Value::Int32(0), Value::Int32(4)]);
        let odd = Record::new(vec![Value::Int32(1), Value::Int32(5)]);
        assert_eq!(
            request.predicates.acceptance(&even, 2).unwrap(),
            vec![true, false]
        );
        assert_eq!(
            request.predicates.acceptance(&odd, 2).unwrap(),
            vec![false, true]
        );
    }

    #[test]
    fn test_parse_truncated() {
        assert!(matches!(
            ActivationRequest::parse(&[0u8; 3], &schema()),
            Err(ActivationError::Truncated { .. })
        ));
    }

    #[test]
    fn test_parse_bad_predicate() {
        let input = encode_activation(false, &["{\"TYPE\": \"NO_SUCH\"}".to_string()]);
        assert!(matches!(
            ActivationRequest::parse(&input, &schema()),
            Err(ActivationError::Compilation(_))
        ));
    }
}
