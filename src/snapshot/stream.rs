//! Multiplexed tuple output streams.
//!
//! Wire framing per stream, per `stream_more` call (all integers big-endian):
//!
//! ```text
//! int32  partition id
//! int32  row count            (patched when the stream closes)
//! repeat row count times:
//!     int32  payload length
//!     bytes  row payload
//! int32  trailing             (0 if the snapshot completed, else the
//!                              length prefix of the tuple the next
//!                              stream_more call will deliver)
//! ```
//!
//! A [`TupleOutputStreamProcessor`] owns one stream per predicate and fills
//! them in lock step: when any stream that accepts the next row cannot hold
//! it, the entire processor yields, so every predicate observes the same
//! tuple sequence.

use bytes::{BufMut, BytesMut};

/// Byte cost of a row beyond its payload: the length prefix.
const ROW_PREFIX: usize = 4;
/// Bytes reserved at the tail of every buffer for the trailing sentinel.
const TRAILER: usize = 4;
/// Partition id + row count header.
const HEADER: usize = 8;

/// A single bounded output buffer with snapshot framing.
#[derive(Debug)]
pub struct TupleOutputStream {
    buf: BytesMut,
    capacity: usize,
    row_count: u32,
}

impl TupleOutputStream {
    /// Creates a stream with a byte capacity. The capacity must cover at
    /// least the header and trailer.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity >= HEADER + TRAILER,
            "stream capacity {} below framing minimum",
            capacity
        );
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
            row_count: 0,
        }
    }

    /// Begins a `stream_more` round: resets the buffer and writes the
    /// partition id and a zero row count to be patched on close.
    pub fn open(&mut self, partition_id: i32) {
        self.buf.clear();
        self.row_count = 0;
        self.buf.put_i32(partition_id);
        self.buf.put_i32(0);
    }

    /// Returns true if a row of `payload_len` bytes fits, leaving room for
    /// the trailing sentinel.
    pub fn fits(&self, payload_len: usize) -> bool {
        self.buf.len() + ROW_PREFIX + payload_len + TRAILER <= self.capacity
    }

    /// Appends one length-prefixed row.
    ///
    /// # Panics
    ///
    /// Panics if the row does not fit; the processor checks
    /// [`fits`](Self::fits) on every accepting stream before writing to any.
    pub fn write_row(&mut self, payload: &[u8]) {
        assert!(self.fits(payload.len()), "row written past stream capacity");
        self.buf.put_i32(payload.len() as i32);
        self.buf.put_slice(payload);
        self.row_count += 1;
    }

    /// Ends the round: patches the row count and writes the trailing
    /// sentinel. Returns the final byte position.
    pub fn close(&mut self, trailing: i32) -> usize {
        let count = self.row_count.to_be_bytes();
        self.buf[4..8].copy_from_slice(&count);
        self.buf.put_i32(trailing);
        self.buf.len()
    }

    /// Returns the number of rows written this round.
    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    /// Returns the bytes written so far.
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    /// Returns the framed output of the round.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// One output stream per predicate, filled in lock step.
#[derive(Debug, Default)]
pub struct TupleOutputStreamProcessor {
    streams: Vec<TupleOutputStream>,
}

impl TupleOutputStreamProcessor {
    /// Creates an empty processor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a processor with one stream of `capacity` bytes.
    pub fn single(capacity: usize) -> Self {
        let mut processor = Self::new();
        processor.add(capacity);
        processor
    }

    /// Adds a stream with its own byte capacity.
    pub fn add(&mut self, capacity: usize) {
        self.streams.push(TupleOutputStream::new(capacity));
    }

    /// Returns the number of streams.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Returns true if the processor has no streams.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Returns a stream by index.
    pub fn at(&self, index: usize) -> &TupleOutputStream {
        &self.streams[index]
    }

    /// Iterates the streams.
    pub fn iter(&self) -> impl Iterator<Item = &TupleOutputStream> {
        self.streams.iter()
    }

    /// Opens every stream for a `stream_more` round.
    pub fn open_all(&mut self, partition_id: i32) {
        for stream in &mut self.streams {
            stream.open(partition_id);
        }
    }

    /// Attempts to append `payload` to every stream whose flag in `accepts`
    /// is set.
    ///
    /// Returns `true` if the row was written, `false` if the processor must
    /// yield because some accepting stream cannot hold it. On yield no
    /// stream is written, keeping all streams in lock step.
    pub fn write_row(&mut self, payload: &[u8], accepts: &[bool]) -> bool {
        debug_assert_eq!(accepts.len(), self.streams.len());
        let all_fit = self
            .streams
            .iter()
            .zip(accepts)
            .all(|(stream, &accept)| !accept || stream.fits(payload.len()));
        if !all_fit {
            return false;
        }
        for (stream, &accept) in self.streams.iter_mut().zip(accepts) {
            if accept {
                stream.write_row(payload);
            }
        }
        true
    }

    /// Closes every stream and returns the per-stream byte positions.
    pub fn close_all(&mut self, trailing: i32) -> Vec<usize> {
        self.streams
            .iter_mut()
            .map(|stream| stream.close(trailing))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_i32(bytes: &[u8], at: usize) -> i32 {
        i32::from_be_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn test_framing() {
        let mut stream = TupleOutputStream::new(64);
        stream.open(5);
        stream.write_row(&[0xAA; 8]);
        stream.write_row(&[0xBB; 8]);
        let position = stream.close(0);

        let bytes = stream.as_bytes();
        assert_eq!(position, 8 + 2 * 12 + 4);
        assert_eq!(read_i32(bytes, 0), 5);
        assert_eq!(read_i32(bytes, 4), 2);
        assert_eq!(read_i32(bytes, 8), 8);
        assert_eq!(&bytes[12..20], &[0xAA; 8]);
        assert_eq!(read_i32(bytes, 20), 8);
        assert_eq!(read_i32(bytes, 32), 0);
    }

    #[test]
    fn test_fits_reserves_trailer() {
        // Header (8) + one 12-byte row (prefix 4 + payload 8) + trailer (4)
        let mut stream = TupleOutputStream::new(24);
        stream.open(0);
        assert!(stream.fits(8));
        stream.write_row(&[0; 8]);
        assert!(!stream.fits(8));
        assert_eq!(stream.close(0), 24);
    }

    #[test]
    fn test_reopen_resets() {
        let mut stream = TupleOutputStream::new(64);
        stream.open(1);
        stream.write_row(&[0; 4]);
        stream.close(0);

        stream.open(1);
        assert_eq!(stream.row_count(), 0);
        assert_eq!(stream.position(), 8);
    }

    #[test]
    fn test_processor_lock_step_yield() {
        let mut processor = TupleOutputStreamProcessor::new();
        processor.add(24); // fits exactly one 8-byte row
        processor.add(64);
        processor.open_all(0);

        assert!(processor.write_row(&[1; 8], &[true, true]));
        // Stream 0 is full, so the whole processor yields even though
        // stream 1 has room
        assert!(!processor.write_row(&[2; 8], &[true, true]));
        assert_eq!(processor.at(0).row_count(), 1);
        assert_eq!(processor.at(1).row_count(), 1);

        // A row stream 0 does not accept still fits in stream 1
        assert!(processor.write_row(&[3; 8], &[false, true]));
        assert_eq!(processor.at(1).row_count(), 2);
    }

    #[test]
    fn test_processor_close_positions() {
        let mut processor = TupleOutputStreamProcessor::new();
        processor.add(64);
        processor.add(64);
        processor.open_all(9);
        processor.write_row(&[0; 8], &[true, false]);
        let positions = processor.close_all(0);
        assert_eq!(positions, vec![24, 12]);
    }
}
