//! Tuple payload serialization.

use bytes::{BufMut, BytesMut};

use crate::datum::SerializationError;
use crate::schema::{Record, TableSchema};

/// Serializes one tuple's row payload onto a snapshot stream.
///
/// The stream writes the length prefix; the serializer writes only the
/// payload bytes. Implementations must report the exact payload length via
/// [`serialized_length`](Self::serialized_length) before writing so streams
/// can make fit decisions without serializing twice.
pub trait TupleSerializer {
    /// Returns the payload length in bytes for a row.
    fn serialized_length(&self, record: &Record, schema: &TableSchema) -> usize;

    /// Appends the row payload to `out`.
    fn serialize_to(
        &self,
        record: &Record,
        schema: &TableSchema,
        out: &mut BytesMut,
    ) -> Result<(), SerializationError>;
}

/// The standard serializer: each column in schema order, big-endian,
/// fixed-width. The payload is byte-identical to the in-block row image.
#[derive(Debug, Default)]
pub struct DefaultTupleSerializer;

impl TupleSerializer for DefaultTupleSerializer {
    fn serialized_length(&self, _record: &Record, schema: &TableSchema) -> usize {
        schema.row_width()
    }

    fn serialize_to(
        &self,
        record: &Record,
        schema: &TableSchema,
        out: &mut BytesMut,
    ) -> Result<(), SerializationError> {
        let mut image = vec![0u8; schema.row_width()];
        schema.encode_row(record, &mut image)?;
        out.put_slice(&image);
        Ok(())
    }
}
