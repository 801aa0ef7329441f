//! Fixed-size batching of decoded records

use crate::config::GFS_NUM_SAMPLES;
use crate::decode::{AccelRecord, DECODED_RECORD_SIZE};

/// A full group of decoded records, borrowed by a sink for one call
#[derive(Debug, Clone)]
pub struct SampleBatch {
    records: [AccelRecord; GFS_NUM_SAMPLES],
    len: usize,
}

impl SampleBatch {
    fn new() -> Self {
        Self {
            records: [AccelRecord::default(); GFS_NUM_SAMPLES],
            len: 0,
        }
    }

    /// Records in arrival order
    pub fn records(&self) -> &[AccelRecord] {
        &self.records[..self.len]
    }

    /// Record count (always [`GFS_NUM_SAMPLES`] when delivered)
    pub fn count(&self) -> usize {
        self.len
    }

    /// Size of the decoded batch in bytes
    pub fn size_bytes(&self) -> usize {
        self.len * DECODED_RECORD_SIZE
    }

    /// Records flattened to little-endian `i16` triples
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.records()
            .iter()
            .flat_map(|r| [r.x, r.y, r.z])
            .flat_map(i16::to_le_bytes)
            .collect()
    }

    /// Most recently added record
    pub fn last(&self) -> Option<&AccelRecord> {
        self.records().last()
    }
}

/// Receiver of completed batches
///
/// Called synchronously from the consumer pass, once per full batch. The
/// batch is only borrowed for the duration of the call.
pub trait SampleSink {
    fn on_batch(&mut self, batch: &SampleBatch);
}

impl<F> SampleSink for F
where
    F: FnMut(&SampleBatch),
{
    fn on_batch(&mut self, batch: &SampleBatch) {
        self(batch)
    }
}

/// Collects records and hands full batches to a sink
pub struct BatchAggregator {
    current: SampleBatch,
    delivered: u64,
}

impl BatchAggregator {
    pub fn new() -> Self {
        Self {
            current: SampleBatch::new(),
            delivered: 0,
        }
    }

    /// Records waiting for the current batch to fill
    pub fn pending(&self) -> usize {
        self.current.len
    }

    /// Batches handed to a sink so far
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Append a record, delivering the batch if it just filled
    ///
    /// Returns `true` when a batch was delivered.
    pub fn push(&mut self, record: AccelRecord, sink: &mut dyn SampleSink) -> bool {
        self.current.records[self.current.len] = record;
        self.current.len += 1;

        if self.current.len < GFS_NUM_SAMPLES {
            return false;
        }

        // Start the next batch before the sink runs, so a panicking sink
        // leaves an empty accumulator behind
        let full = std::mem::replace(&mut self.current, SampleBatch::new());
        self.delivered += 1;
        sink.on_batch(&full);
        true
    }

    /// Drop a partially filled batch without delivering it
    pub fn discard(&mut self) -> usize {
        let dropped = self.current.len;
        self.current.len = 0;
        dropped
    }
}

impl Default for BatchAggregator {
    fn default() -> Self {
        Self::new()
    }
}
