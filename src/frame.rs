//! Frame synchronization over the ingest ring
//!
//! # Frame layout
//!
//! ```text
//! ┌─────────┬─────────┬──────────┬──────────┬──────────────────────┐
//! │ marker1 │ marker2 │ len (lo) │ len (hi) │ payload: len bytes   │
//! └─────────┴─────────┴──────────┴──────────┴──────────────────────┘
//! ```
//!
//! The scanner never trusts a length until both marker bytes match, and a
//! length that could never fit in the ring is treated as a false marker hit:
//! the scanner steps one byte forward and hunts again.

use crate::config::FrameMarkers;
use crate::error::{GfsError, Result};
use crate::ingest::IngestReader;

/// Marker pair plus the little-endian length field
pub const HEADER_SIZE: usize = 4;

/// Consumer-side view of a byte FIFO
pub trait ByteSource {
    /// Copy bytes starting `offset` past the read position; returns (copied, generation)
    fn peek(&self, offset: usize, out: &mut [u8]) -> (usize, u64);
    /// Retire `n` bytes if the source has not been reset since `generation`
    fn consume(&self, generation: u64, n: usize) -> bool;
}

impl ByteSource for IngestReader {
    fn peek(&self, offset: usize, out: &mut [u8]) -> (usize, u64) {
        IngestReader::peek(self, offset, out)
    }

    fn consume(&self, generation: u64, n: usize) -> bool {
        IngestReader::consume(self, generation, n)
    }
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub markers: FrameMarkers,
    pub length: u16,
}

impl FrameHeader {
    pub fn new(markers: FrameMarkers, length: u16) -> Self {
        Self { markers, length }
    }

    /// Parse a header if both markers match
    pub fn parse(bytes: &[u8; HEADER_SIZE], expected: FrameMarkers) -> Option<Self> {
        if bytes[0] != expected.first || bytes[1] != expected.second {
            return None;
        }
        Some(Self {
            markers: expected,
            length: u16::from_le_bytes([bytes[2], bytes[3]]),
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let [lo, hi] = self.length.to_le_bytes();
        [self.markers.first, self.markers.second, lo, hi]
    }
}

/// Build a complete frame around `payload`
pub fn encode_frame(markers: FrameMarkers, payload: &[u8]) -> Result<Vec<u8>> {
    let length = u16::try_from(payload.len()).map_err(|_| {
        GfsError::InvalidConfig(format!(
            "Frame payload of {} bytes exceeds the 16-bit length field",
            payload.len()
        ))
    })?;
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&FrameHeader::new(markers, length).to_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Outcome of one scan step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    /// A complete payload of `len` bytes was copied out
    Frame { len: usize },
    /// A frame has started but is not complete yet
    Incomplete,
    /// Nothing left to scan
    Empty,
}

/// Running totals for one scanner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanCounters {
    pub frames: u64,
    /// Bytes skipped while hunting for markers
    pub resync_bytes: u64,
    /// Marker hits rejected for an implausible length
    pub bad_lengths: u64,
}

/// Finds frames in a [`ByteSource`]
pub struct FrameScanner {
    markers: FrameMarkers,
    max_payload: usize,
    window: Vec<u8>,
    counters: ScanCounters,
}

impl FrameScanner {
    /// # Arguments
    /// * `markers` - Expected synchronization bytes
    /// * `capacity` - Ingest ring capacity; bounds plausible payload lengths
    /// * `scan_window` - Bytes examined per marker search step
    pub fn new(markers: FrameMarkers, capacity: usize, scan_window: usize) -> Self {
        Self {
            markers,
            max_payload: capacity.saturating_sub(HEADER_SIZE),
            window: vec![0; scan_window.max(2)],
            counters: ScanCounters::default(),
        }
    }

    pub fn counters(&self) -> ScanCounters {
        self.counters
    }

    fn skip(&mut self, source: &impl ByteSource, generation: u64, n: usize) {
        if source.consume(generation, n) {
            self.counters.resync_bytes += n as u64;
        }
    }

    /// Advance to the next complete frame and copy its payload into `payload`
    ///
    /// Non-blocking: returns [`ScanStatus::Incomplete`] when the frame at the
    /// read position still lacks bytes.
    pub fn next_frame(&mut self, source: &impl ByteSource, payload: &mut Vec<u8>) -> ScanStatus {
        loop {
            let (n, generation) = source.peek(0, &mut self.window);
            if n == 0 {
                return ScanStatus::Empty;
            }

            let found = self.window[..n]
                .windows(2)
                .position(|pair| pair[0] == self.markers.first && pair[1] == self.markers.second);

            match found {
                Some(0) => {}
                Some(offset) => {
                    log::debug!("Resync: skipped {} bytes before frame marker", offset);
                    self.skip(source, generation, offset);
                    continue;
                }
                None => {
                    // Keep a trailing first marker; its partner may not have arrived
                    let keep = usize::from(self.window[n - 1] == self.markers.first);
                    let discard = n - keep;
                    if discard == 0 {
                        return ScanStatus::Incomplete;
                    }
                    log::debug!("Resync: no frame marker in {} bytes", discard);
                    self.skip(source, generation, discard);
                    continue;
                }
            }

            let mut raw = [0u8; HEADER_SIZE];
            let (got, header_generation) = source.peek(0, &mut raw);
            if header_generation != generation {
                continue;
            }
            if got < HEADER_SIZE {
                return ScanStatus::Incomplete;
            }
            let header = match FrameHeader::parse(&raw, self.markers) {
                Some(header) => header,
                None => continue,
            };

            let length = header.length as usize;
            if length > self.max_payload {
                log::warn!(
                    "Implausible frame length {} (max {}), resynchronizing",
                    length,
                    self.max_payload
                );
                self.counters.bad_lengths += 1;
                self.skip(source, generation, 1);
                continue;
            }

            payload.resize(length, 0);
            let (copied, payload_generation) = source.peek(HEADER_SIZE, payload);
            if payload_generation != generation {
                continue;
            }
            if copied < length {
                return ScanStatus::Incomplete;
            }
            if !source.consume(generation, HEADER_SIZE + length) {
                continue;
            }

            self.counters.frames += 1;
            return ScanStatus::Frame { len: length };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::channel;

    const MARKERS: FrameMarkers = FrameMarkers::new(0x40, 0x41);

    fn scanner(capacity: usize) -> FrameScanner {
        FrameScanner::new(MARKERS, capacity, 64)
    }

    #[test]
    fn test_header_bytes() {
        let header = FrameHeader::new(MARKERS, 0x0128);
        assert_eq!(header.to_bytes(), [0x40, 0x41, 0x28, 0x01]);
        assert_eq!(FrameHeader::parse(&header.to_bytes(), MARKERS), Some(header));
        assert_eq!(FrameHeader::parse(&[0x40, 0x40, 0, 0], MARKERS), None);
    }

    #[test]
    fn test_encode_frame_too_long() {
        let payload = vec![0u8; 70_000];
        assert!(encode_frame(MARKERS, &payload).is_err());
    }

    #[test]
    fn test_single_frame() {
        let (writer, reader) = channel(256).unwrap();
        writer.write(&encode_frame(MARKERS, &[1, 2, 3, 4]).unwrap());

        let mut scan = scanner(256);
        let mut payload = Vec::new();
        assert_eq!(scan.next_frame(&reader, &mut payload), ScanStatus::Frame { len: 4 });
        assert_eq!(payload, vec![1, 2, 3, 4]);
        assert_eq!(scan.next_frame(&reader, &mut payload), ScanStatus::Empty);
        assert_eq!(reader.available(), 0);
    }

    #[test]
    fn test_incomplete_then_complete() {
        let (writer, reader) = channel(256).unwrap();
        let frame = encode_frame(MARKERS, &[9; 8]).unwrap();
        writer.write(&frame[..6]);

        let mut scan = scanner(256);
        let mut payload = Vec::new();
        assert_eq!(scan.next_frame(&reader, &mut payload), ScanStatus::Incomplete);
        assert_eq!(reader.available(), 6);

        writer.write(&frame[6..]);
        assert_eq!(scan.next_frame(&reader, &mut payload), ScanStatus::Frame { len: 8 });
    }

    #[test]
    fn test_partial_header_is_incomplete() {
        let (writer, reader) = channel(256).unwrap();
        writer.write(&[0x40, 0x41, 0x04]);
        let mut payload = Vec::new();
        assert_eq!(scanner(256).next_frame(&reader, &mut payload), ScanStatus::Incomplete);
    }

    #[test]
    fn test_trailing_first_marker_kept() {
        let (writer, reader) = channel(256).unwrap();
        writer.write(&[0x00, 0x13, 0x40]);

        let mut scan = scanner(256);
        let mut payload = Vec::new();
        assert_eq!(scan.next_frame(&reader, &mut payload), ScanStatus::Incomplete);
        assert_eq!(reader.available(), 1);
        assert_eq!(scan.counters().resync_bytes, 2);

        writer.write(&[0x41, 0x01, 0x00, 0x7f]);
        assert_eq!(scan.next_frame(&reader, &mut payload), ScanStatus::Frame { len: 1 });
        assert_eq!(payload, vec![0x7f]);
    }

    #[test]
    fn test_resync_after_corrupt_marker() {
        let (writer, reader) = channel(256).unwrap();
        // Bit-flipped second marker, then a valid frame
        writer.write(&[0x40, 0x43, 0x02, 0x00, 0xaa, 0xbb]);
        writer.write(&encode_frame(MARKERS, &[5, 6]).unwrap());

        let mut scan = scanner(256);
        let mut payload = Vec::new();
        assert_eq!(scan.next_frame(&reader, &mut payload), ScanStatus::Frame { len: 2 });
        assert_eq!(payload, vec![5, 6]);
        assert_eq!(scan.counters().resync_bytes, 6);
    }

    #[test]
    fn test_implausible_length_resyncs() {
        let (writer, reader) = channel(64).unwrap();
        // Claimed length 0xffff cannot fit in a 64 byte ring
        writer.write(&[0x40, 0x41, 0xff, 0xff]);
        writer.write(&encode_frame(MARKERS, &[1, 2, 3]).unwrap());

        let mut scan = scanner(64);
        let mut payload = Vec::new();
        assert_eq!(scan.next_frame(&reader, &mut payload), ScanStatus::Frame { len: 3 });
        assert_eq!(payload, vec![1, 2, 3]);
        assert_eq!(scan.counters().bad_lengths, 1);
    }

    #[test]
    fn test_frames_in_order() {
        let (writer, reader) = channel(256).unwrap();
        for i in 0..5u8 {
            writer.write(&encode_frame(MARKERS, &[i; 3]).unwrap());
        }

        let mut scan = scanner(256);
        let mut payload = Vec::new();
        for i in 0..5u8 {
            assert_eq!(scan.next_frame(&reader, &mut payload), ScanStatus::Frame { len: 3 });
            assert_eq!(payload, vec![i; 3]);
        }
        assert_eq!(scan.counters().frames, 5);
    }

    #[test]
    fn test_zero_length_frame() {
        let (writer, reader) = channel(64).unwrap();
        writer.write(&encode_frame(MARKERS, &[]).unwrap());
        let mut payload = vec![1, 2];
        assert_eq!(scanner(64).next_frame(&reader, &mut payload), ScanStatus::Frame { len: 0 });
        assert!(payload.is_empty());
    }

    #[test]
    fn test_noise_longer_than_window() {
        let (writer, reader) = channel(1024).unwrap();
        writer.write(&[0x11; 300]);
        writer.write(&encode_frame(MARKERS, &[7]).unwrap());

        let mut scan = FrameScanner::new(MARKERS, 1024, 16);
        let mut payload = Vec::new();
        assert_eq!(scan.next_frame(&reader, &mut payload), ScanStatus::Frame { len: 1 });
        assert_eq!(scan.counters().resync_bytes, 300);
    }
}
