//! Table schema and row representation.
//!
//! A [`TableSchema`] fixes the column layout of a table: column types and
//! names, the primary-key columns, and the optional partitioning column.
//! Because every column type is fixed-width, a schema implies a constant
//! row width; rows pack into equal-sized tuple slots in the block heap.
//!
//! A [`Record`] is a row of [`Value`]s. [`TableSchema::encode_row`] and
//! [`TableSchema::decode_row`] convert between records and the row image
//! stored in a tuple slot (the concatenation of each column's big-endian
//! encoding).

use crate::datum::{SerializationError, Type, Value};

/// A single column definition.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Column data type.
    pub ty: Type,
    /// Whether NULL is accepted. The block heap stores no null bitmap, so
    /// nullable columns are not currently supported by storage.
    pub allow_null: bool,
}

impl ColumnSpec {
    /// Creates a non-nullable column.
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            allow_null: false,
        }
    }
}

/// Fixed-width table schema.
#[derive(Debug, Clone)]
pub struct TableSchema {
    columns: Vec<ColumnSpec>,
    primary_key: Vec<usize>,
    partition_column: Option<usize>,
    row_width: usize,
}

impl TableSchema {
    /// Creates a schema from column specs and primary-key column indices.
    ///
    /// # Panics
    ///
    /// Panics if `primary_key` is empty or references a column out of range;
    /// schemas are constructed by the embedding engine and a bad definition
    /// is a programmer error.
    pub fn new(columns: Vec<ColumnSpec>, primary_key: Vec<usize>) -> Self {
        assert!(!primary_key.is_empty(), "primary key must name a column");
        assert!(
            primary_key.iter().all(|&c| c < columns.len()),
            "primary key column out of range"
        );
        let row_width = columns.iter().map(|c| c.ty.width()).sum();
        Self {
            columns,
            primary_key,
            partition_column: None,
            row_width,
        }
    }

    /// Sets the partitioning column (used by partition-routing predicates).
    pub fn with_partition_column(mut self, column: usize) -> Self {
        assert!(column < self.columns.len(), "partition column out of range");
        self.partition_column = Some(column);
        self
    }

    /// Returns the column definitions.
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Returns the number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Returns the primary-key column indices.
    pub fn primary_key(&self) -> &[usize] {
        &self.primary_key
    }

    /// Returns the partitioning column index, if one is configured.
    pub fn partition_column(&self) -> Option<usize> {
        self.partition_column
    }

    /// Returns the fixed row width in bytes (excluding the slot flag byte).
    pub fn row_width(&self) -> usize {
        self.row_width
    }

    /// Extracts the primary-key values from a record.
    pub fn key_of(&self, record: &Record) -> Vec<Value> {
        self.primary_key
            .iter()
            .map(|&c| record.values[c].clone())
            .collect()
    }

    /// Validates a record against this schema.
    ///
    /// Checks arity, per-column type compatibility, and nullability.
    pub fn validate(&self, record: &Record) -> Result<(), SchemaViolation> {
        if record.values.len() != self.columns.len() {
            return Err(SchemaViolation::ColumnCountMismatch {
                expected: self.columns.len(),
                actual: record.values.len(),
            });
        }
        for (i, (value, column)) in record.values.iter().zip(&self.columns).enumerate() {
            match value.data_type() {
                None => {
                    // No null bitmap in the slot layout; nullable columns
                    // would need one.
                    return Err(SchemaViolation::NullNotAllowed {
                        column: column.name.clone(),
                    });
                }
                Some(ty) if ty != column.ty => {
                    return Err(SchemaViolation::TypeMismatch {
                        column_index: i,
                        expected: column.ty,
                        actual: ty,
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Encodes a validated record into a row image of exactly `row_width` bytes.
    pub fn encode_row(&self, record: &Record, buf: &mut [u8]) -> Result<(), SerializationError> {
        let mut offset = 0;
        for value in &record.values {
            offset += value.serialize(&mut buf[offset..])?;
        }
        Ok(())
    }

    /// Decodes a row image back into a record.
    pub fn decode_row(&self, buf: &[u8]) -> Result<Record, SerializationError> {
        let mut offset = 0;
        let mut values = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let (value, consumed) = Value::deserialize(&buf[offset..], column.ty)?;
            values.push(value);
            offset += consumed;
        }
        Ok(Record::new(values))
    }
}

/// A schema validation failure. Writes that violate the schema are rejected
/// with no state change.
#[derive(Debug)]
pub enum SchemaViolation {
    /// Record arity does not match the schema.
    ColumnCountMismatch { expected: usize, actual: usize },
    /// Value type does not match the column type.
    TypeMismatch {
        column_index: usize,
        expected: Type,
        actual: Type,
    },
    /// NULL supplied for a non-nullable column.
    NullNotAllowed { column: String },
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaViolation::ColumnCountMismatch { expected, actual } => {
                write!(f, "expected {} columns, got {}", expected, actual)
            }
            SchemaViolation::TypeMismatch {
                column_index,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "column {}: expected {}, got {}",
                    column_index, expected, actual
                )
            }
            SchemaViolation::NullNotAllowed { column } => {
                write!(f, "column \"{}\" does not accept NULL", column)
            }
        }
    }
}

impl std::error::Error for SchemaViolation {}

/// A record (row of data values).
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Column values in order.
    pub values: Vec<Value>,
}

impl Record {
    /// Creates a new record with the given values.
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the record has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
