//! Packed accelerometer record decoding
//!
//! Each record is a 4-byte little-endian word carrying three 10-bit
//! two's-complement fields:
//!
//! ```text
//!  31 30 29        20 19        10 9          0
//! ┌─────┬────────────┬────────────┬────────────┐
//! │ --  │     Z      │     Y      │     X      │
//! └─────┴────────────┴────────────┴────────────┘
//! ```
//!
//! This is the layout a packed `int16_t x:10, y:10, z:10` bit-field struct
//! gets from the sensor firmware on a little-endian target. Fields are
//! extracted with explicit masks and shifts, never through a native bit-field
//! layout.

/// Bytes per packed record on the wire
pub const RECORD_SIZE: usize = 4;

/// Bytes per decoded record handed to sinks (three `i16`)
pub const DECODED_RECORD_SIZE: usize = 3 * std::mem::size_of::<i16>();

const FIELD_BITS: u32 = 10;
const FIELD_MASK: u32 = (1 << FIELD_BITS) - 1;

/// Smallest value a 10-bit field can carry
pub const FIELD_MIN: i16 = -512;
/// Largest value a 10-bit field can carry
pub const FIELD_MAX: i16 = 511;

/// One decoded 3-axis acceleration sample (raw counts)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccelRecord {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl AccelRecord {
    pub const fn new(x: i16, y: i16, z: i16) -> Self {
        Self { x, y, z }
    }

    /// Whether every axis fits in a signed 10-bit field
    pub fn in_range(&self) -> bool {
        [self.x, self.y, self.z]
            .iter()
            .all(|v| (FIELD_MIN..=FIELD_MAX).contains(v))
    }
}

/// Sign-extend the low 10 bits of `raw`
///
/// Values 0..=511 are returned unchanged, 512..=1023 map to `raw - 1024`.
/// Shifting the field to the top of an `i16` and arithmetic-shifting it back
/// replicates bit 9 into the upper bits.
#[inline]
pub fn sign_extend_10(raw: u16) -> i16 {
    (((raw & FIELD_MASK as u16) << 6) as i16) >> 6
}

/// Decode one packed record
#[inline]
pub fn decode_record(bytes: [u8; RECORD_SIZE]) -> AccelRecord {
    let word = u32::from_le_bytes(bytes);
    let field = |shift: u32| sign_extend_10(((word >> shift) & FIELD_MASK) as u16);
    AccelRecord {
        x: field(0),
        y: field(FIELD_BITS),
        z: field(2 * FIELD_BITS),
    }
}

/// Pack one record into its wire form
///
/// Each axis is truncated to 10 bits; the two unused top bits are zero.
#[inline]
pub fn encode_record(record: &AccelRecord) -> [u8; RECORD_SIZE] {
    let field = |v: i16| (v as u16 as u32) & FIELD_MASK;
    let word = field(record.x) | (field(record.y) << FIELD_BITS) | (field(record.z) << (2 * FIELD_BITS));
    word.to_le_bytes()
}

/// Pack a sequence of records into a payload
pub fn encode_payload(records: &[AccelRecord]) -> Vec<u8> {
    records.iter().flat_map(encode_record).collect()
}

/// Summary of one payload decode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeReport {
    pub records: usize,
    /// Bytes past the last whole record, dropped
    pub trailing_bytes: usize,
}

impl DecodeReport {
    pub fn is_anomalous(&self) -> bool {
        self.trailing_bytes != 0
    }
}

/// Decode every whole record in `payload`, in order, handing each to `emit`
pub fn decode_payload<F>(payload: &[u8], mut emit: F) -> DecodeReport
where
    F: FnMut(AccelRecord),
{
    let chunks = payload.chunks_exact(RECORD_SIZE);
    let trailing_bytes = chunks.remainder().len();
    let mut records = 0;

    for chunk in chunks {
        emit(decode_record([chunk[0], chunk[1], chunk[2], chunk[3]]));
        records += 1;
    }

    if trailing_bytes != 0 {
        log::warn!(
            "Payload of {} bytes is not a multiple of {}; dropped {} trailing bytes",
            payload.len(),
            RECORD_SIZE,
            trailing_bytes
        );
    }

    DecodeReport {
        records,
        trailing_bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_extend_all_values() {
        for v in 0u16..1024 {
            let expected = if v < 512 { v as i16 } else { v as i16 - 1024 };
            assert_eq!(sign_extend_10(v), expected, "raw {}", v);
        }
    }

    #[test]
    fn test_sign_extend_boundaries() {
        assert_eq!(sign_extend_10(0), 0);
        assert_eq!(sign_extend_10(511), 511);
        assert_eq!(sign_extend_10(512), -512);
        assert_eq!(sign_extend_10(1023), -1);
    }

    #[test]
    fn test_sign_extend_ignores_upper_bits() {
        assert_eq!(sign_extend_10(0xfc00 | 5), 5);
    }

    #[test]
    fn test_decode_known_layout() {
        // X = 1, Y = -1 (0x3ff), Z = -512 (0x200)
        let word: u32 = 1 | (0x3ff << 10) | (0x200 << 20);
        let record = decode_record(word.to_le_bytes());
        assert_eq!(record, AccelRecord::new(1, -1, -512));
    }

    #[test]
    fn test_decode_ignores_padding_bits() {
        let word: u32 = 0xc000_0000 | 7;
        assert_eq!(decode_record(word.to_le_bytes()), AccelRecord::new(7, 0, 0));
    }

    #[test]
    fn test_encode_decode_bytes() {
        // Sweep byte patterns with the two padding bits cleared
        for seed in 0u32..5000 {
            let word = seed.wrapping_mul(0x9e37_79b9) & 0x3fff_ffff;
            let bytes = word.to_le_bytes();
            assert_eq!(encode_record(&decode_record(bytes)), bytes);
        }
    }

    #[test]
    fn test_extremes() {
        let record = AccelRecord::new(FIELD_MIN, FIELD_MAX, 0);
        assert!(record.in_range());
        assert_eq!(decode_record(encode_record(&record)), record);
        assert!(!AccelRecord::new(600, 0, 0).in_range());
    }

    #[test]
    fn test_payload_order() {
        let records = [
            AccelRecord::new(100, -100, 0),
            AccelRecord::new(-3, 2, 1),
            AccelRecord::new(511, -512, 42),
        ];
        let payload = encode_payload(&records);
        assert_eq!(payload.len(), 12);

        let mut decoded = Vec::new();
        let report = decode_payload(&payload, |r| decoded.push(r));
        assert_eq!(decoded, records);
        assert_eq!(report, DecodeReport { records: 3, trailing_bytes: 0 });
        assert!(!report.is_anomalous());
    }

    #[test]
    fn test_trailing_bytes_dropped() {
        let mut payload = encode_payload(&[AccelRecord::new(1, 2, 3); 2]);
        payload.extend_from_slice(&[0xaa, 0xbb]);

        let mut decoded = Vec::new();
        let report = decode_payload(&payload, |r| decoded.push(r));
        assert_eq!(decoded.len(), 2);
        assert_eq!(report.trailing_bytes, 2);
        assert!(report.is_anomalous());
    }

    #[test]
    fn test_empty_payload() {
        let report = decode_payload(&[], |_| panic!("no records expected"));
        assert_eq!(report, DecodeReport::default());
    }
}
