//! Fixed-capacity ingest ring shared between the transport and the parser
//!
//! The transport side holds an [`IngestWriter`] and only ever calls
//! [`IngestWriter::write`]. The session holds the [`IngestReader`] and drains
//! the ring in FIFO order with `peek` / `consume`. Both sides meet on one
//! mutex whose critical sections are plain byte copies.
//!
//! Overflow policy is a full reset: when a write does not fit, every
//! unconsumed byte is dropped and the ring's generation is bumped. The
//! consumer retires bytes only under the generation it peeked them with, so
//! a reset racing a consumer pass can never retire fresh data.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{GfsError, Result};

/// Result of a producer write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// All bytes were appended
    Stored,
    /// The ring overflowed and was reset
    Overflow {
        /// Unconsumed bytes discarded by the reset
        dropped: usize,
        /// Bytes of this write kept after the reset (0 if it alone exceeds capacity)
        stored: usize,
    },
    /// The session owning the ring has stopped
    Closed,
}

/// Running totals for one ring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestCounters {
    pub bytes_written: u64,
    pub bytes_consumed: u64,
    pub bytes_dropped: u64,
    pub overflows: u64,
}

struct Ring {
    storage: Vec<u8>,
    capacity: usize,
    head: usize,
    len: usize,
    generation: u64,
    counters: IngestCounters,
}

impl Ring {
    fn free(&self) -> usize {
        self.capacity - self.len
    }

    fn reset(&mut self) -> usize {
        let dropped = self.len;
        self.head = 0;
        self.len = 0;
        self.generation = self.generation.wrapping_add(1);
        dropped
    }

    fn push(&mut self, bytes: &[u8]) {
        let tail = (self.head + self.len) % self.capacity;
        let first = bytes.len().min(self.capacity - tail);
        self.storage[tail..tail + first].copy_from_slice(&bytes[..first]);
        let rest = bytes.len() - first;
        if rest > 0 {
            self.storage[..rest].copy_from_slice(&bytes[first..]);
        }
        self.len += bytes.len();
    }

    fn copy_out(&self, offset: usize, out: &mut [u8]) -> usize {
        if offset >= self.len {
            return 0;
        }
        let count = out.len().min(self.len - offset);
        let start = (self.head + offset) % self.capacity;
        let first = count.min(self.capacity - start);
        out[..first].copy_from_slice(&self.storage[start..start + first]);
        if count > first {
            out[first..count].copy_from_slice(&self.storage[..count - first]);
        }
        count
    }
}

struct Shared {
    ring: Mutex<Ring>,
    closed: AtomicBool,
}

impl Shared {
    // A poisoned lock only means a panic mid-copy; the indices are still
    // consistent, so keep serving.
    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Allocate a ring of `capacity` bytes and split it into producer and consumer handles
///
/// Allocation is fallible and reported as [`GfsError::OutOfMemory`].
pub fn channel(capacity: usize) -> Result<(IngestWriter, IngestReader)> {
    let mut storage = Vec::new();
    storage
        .try_reserve_exact(capacity)
        .map_err(|_| GfsError::OutOfMemory { requested: capacity })?;
    storage.resize(capacity, 0);

    let shared = Arc::new(Shared {
        ring: Mutex::new(Ring {
            storage,
            capacity,
            head: 0,
            len: 0,
            generation: 0,
            counters: IngestCounters::default(),
        }),
        closed: AtomicBool::new(false),
    });

    Ok((
        IngestWriter {
            shared: Arc::clone(&shared),
        },
        IngestReader { shared },
    ))
}

/// Producer handle given to the transport
pub struct IngestWriter {
    shared: Arc<Shared>,
}

impl IngestWriter {
    /// Append raw transport bytes
    ///
    /// Never waits on consumer progress; the only wait is the ring lock.
    pub fn write(&self, bytes: &[u8]) -> WriteOutcome {
        if self.shared.closed.load(Ordering::Acquire) {
            return WriteOutcome::Closed;
        }

        let mut ring = self.shared.lock();
        if ring.capacity == 0 {
            return WriteOutcome::Closed;
        }
        ring.counters.bytes_written += bytes.len() as u64;

        if bytes.len() <= ring.free() {
            ring.push(bytes);
            return WriteOutcome::Stored;
        }

        let dropped = ring.reset();
        ring.counters.overflows += 1;
        let stored = if bytes.len() <= ring.capacity {
            ring.push(bytes);
            bytes.len()
        } else {
            0
        };
        ring.counters.bytes_dropped += (dropped + bytes.len() - stored) as u64;
        WriteOutcome::Overflow { dropped, stored }
    }

    /// Whether the owning session has released the ring
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for IngestWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestWriter")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Consumer handle owned by the running session
pub struct IngestReader {
    shared: Arc<Shared>,
}

impl fmt::Debug for IngestReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.shared.lock();
        f.debug_struct("IngestReader")
            .field("capacity", &ring.capacity)
            .field("available", &ring.len)
            .field("generation", &ring.generation)
            .finish()
    }
}

impl IngestReader {
    /// Number of unconsumed bytes
    pub fn available(&self) -> usize {
        self.shared.lock().len
    }

    /// Ring capacity in bytes
    pub fn capacity(&self) -> usize {
        self.shared.lock().capacity
    }

    /// Current reset generation
    pub fn generation(&self) -> u64 {
        self.shared.lock().generation
    }

    /// Copy up to `out.len()` bytes starting `offset` bytes past the read position
    ///
    /// Returns the number of bytes copied and the generation they belong to.
    pub fn peek(&self, offset: usize, out: &mut [u8]) -> (usize, u64) {
        let ring = self.shared.lock();
        (ring.copy_out(offset, out), ring.generation)
    }

    /// Retire `n` bytes, provided no reset happened since `generation`
    ///
    /// Returns `false` (and retires nothing) if the ring was reset meanwhile.
    pub fn consume(&self, generation: u64, n: usize) -> bool {
        let mut ring = self.shared.lock();
        if ring.generation != generation {
            return false;
        }
        let n = n.min(ring.len);
        if ring.capacity > 0 {
            ring.head = (ring.head + n) % ring.capacity;
        }
        ring.len -= n;
        ring.counters.bytes_consumed += n as u64;
        true
    }

    /// Running totals
    pub fn counters(&self) -> IngestCounters {
        self.shared.lock().counters
    }

    /// Close the producer side and free the ring storage
    pub fn release(&self) {
        self.shared.closed.store(true, Ordering::Release);
        let mut ring = self.shared.lock();
        ring.reset();
        ring.capacity = 0;
        ring.storage = Vec::new();
    }
}

impl Drop for IngestReader {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peek_all(reader: &IngestReader) -> (Vec<u8>, u64) {
        let mut out = vec![0u8; reader.available()];
        let (n, generation) = reader.peek(0, &mut out);
        out.truncate(n);
        (out, generation)
    }

    #[test]
    fn test_fifo_order() {
        let (writer, reader) = channel(16).unwrap();
        assert_eq!(writer.write(&[1, 2, 3]), WriteOutcome::Stored);
        assert_eq!(writer.write(&[4, 5]), WriteOutcome::Stored);

        let (bytes, generation) = peek_all(&reader);
        assert_eq!(bytes, vec![1, 2, 3, 4, 5]);
        assert!(reader.consume(generation, 2));
        assert_eq!(peek_all(&reader).0, vec![3, 4, 5]);
    }

    #[test]
    fn test_peek_with_offset() {
        let (writer, reader) = channel(8).unwrap();
        writer.write(&[10, 11, 12, 13]);
        let mut out = [0u8; 8];
        let (n, _) = reader.peek(2, &mut out);
        assert_eq!(n, 2);
        assert_eq!(&out[..2], &[12, 13]);
        assert_eq!(reader.peek(4, &mut out).0, 0);
    }

    #[test]
    fn test_wraparound() {
        let (writer, reader) = channel(8).unwrap();
        writer.write(&[0, 1, 2, 3, 4, 5]);
        let generation = reader.generation();
        assert!(reader.consume(generation, 5));
        assert_eq!(writer.write(&[6, 7, 8, 9, 10, 11]), WriteOutcome::Stored);

        assert_eq!(peek_all(&reader).0, vec![5, 6, 7, 8, 9, 10, 11]);
        assert_eq!(reader.available(), 7);
    }

    #[test]
    fn test_overflow_resets() {
        let (writer, reader) = channel(8).unwrap();
        writer.write(&[1, 2, 3, 4, 5, 6]);
        let before = reader.generation();

        let outcome = writer.write(&[7, 8, 9]);
        assert_eq!(outcome, WriteOutcome::Overflow { dropped: 6, stored: 3 });
        assert_eq!(peek_all(&reader).0, vec![7, 8, 9]);
        assert_ne!(reader.generation(), before);
        assert_eq!(reader.counters().overflows, 1);
        assert_eq!(reader.counters().bytes_dropped, 6);
    }

    #[test]
    fn test_oversized_write_dropped() {
        let (writer, reader) = channel(4).unwrap();
        writer.write(&[1]);
        let outcome = writer.write(&[0u8; 5]);
        assert_eq!(outcome, WriteOutcome::Overflow { dropped: 1, stored: 0 });
        assert_eq!(reader.available(), 0);
        assert_eq!(reader.counters().bytes_dropped, 6);
    }

    #[test]
    fn test_stale_consume_rejected() {
        let (writer, reader) = channel(8).unwrap();
        writer.write(&[1, 2, 3, 4]);
        let (_, generation) = peek_all(&reader);

        // Producer overflows between the consumer's peek and consume
        writer.write(&[9; 8]);
        assert!(!reader.consume(generation, 4));
        assert_eq!(reader.available(), 8);
    }

    #[test]
    fn test_available_never_exceeds_written_minus_consumed() {
        let (writer, reader) = channel(32).unwrap();
        let mut written = 0usize;
        let mut consumed = 0usize;
        for step in 0..50usize {
            let chunk = vec![step as u8; step % 7 + 1];
            if writer.write(&chunk) == WriteOutcome::Stored {
                written += chunk.len();
            }
            if step % 3 == 0 {
                let generation = reader.generation();
                let take = reader.available().min(5);
                assert!(reader.consume(generation, take));
                consumed += take;
            }
            let counters = reader.counters();
            assert!(reader.available() <= 32);
            if counters.overflows == 0 {
                assert_eq!(reader.available(), written - consumed);
            }
        }
    }

    #[test]
    fn test_release_closes_writer() {
        let (writer, reader) = channel(8).unwrap();
        writer.write(&[1, 2]);
        reader.release();
        assert!(writer.is_closed());
        assert_eq!(writer.write(&[3]), WriteOutcome::Closed);
        assert_eq!(reader.available(), 0);
        assert_eq!(reader.capacity(), 0);
    }

    #[test]
    fn test_drop_reader_closes_writer() {
        let (writer, reader) = channel(8).unwrap();
        drop(reader);
        assert_eq!(writer.write(&[1]), WriteOutcome::Closed);
    }

    #[test]
    fn test_allocation_failure() {
        let result = channel(usize::MAX);
        assert!(matches!(result, Err(GfsError::OutOfMemory { requested }) if requested == usize::MAX));
    }

    #[test]
    fn test_handles_debug() {
        let (writer, reader) = channel(8).unwrap();
        writer.write(&[1, 2, 3]);
        assert_eq!(format!("{:?}", writer), "IngestWriter { closed: false }");
        assert_eq!(
            format!("{:?}", reader),
            "IngestReader { capacity: 8, available: 3, generation: 0 }"
        );

        // Start failures are reported through `unwrap_err`, which needs the writer to be Debug
        let failed: crate::Result<IngestWriter> = Err(GfsError::NotRunning);
        assert_eq!(failed.unwrap_err(), GfsError::NotRunning);

        reader.release();
        assert_eq!(format!("{:?}", writer), "IngestWriter { closed: true }");
    }

    #[test]
    fn test_concurrent_writer() {
        let (writer, reader) = channel(4096).unwrap();
        let producer = std::thread::spawn(move || {
            for i in 0..1000u32 {
                writer.write(&(i as u8).to_le_bytes());
            }
        });

        let mut received = Vec::new();
        while received.len() < 1000 {
            let mut out = [0u8; 64];
            let (n, generation) = reader.peek(0, &mut out);
            if n > 0 {
                assert!(reader.consume(generation, n));
                received.extend_from_slice(&out[..n]);
            }
            std::thread::yield_now();
        }
        producer.join().unwrap();

        let expected: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        assert_eq!(received, expected);
    }
}
