//! Sampling driver for a framed, bit-packed accelerometer stream
//!
//! The sensor streams frames of the form `[m1][m2][len lo][len hi][payload]`
//! where the payload is a run of 4-byte records, each packing three signed
//! 10-bit axis values. This crate turns that byte stream into batches of 16
//! decoded records delivered to a [`SampleSink`].
//!
//! The transport writes raw bytes through the [`IngestWriter`] returned by
//! [`Driver::start`]; a consumer task calls [`Driver::poll`], which scans
//! frames, decodes records and delivers every completed batch.
//!
//! # Quick Start
//!
//! ```
//! use gfs_sampler::{encode_frame, encode_payload, AccelRecord, Driver, ExternalSource, SampleBatch, SessionConfig};
//!
//! let driver = Driver::new(SessionConfig::default(), ExternalSource);
//!
//! // Print the first axis of every batch
//! let writer = driver.start(|batch: &SampleBatch| {
//!     for record in batch.records() {
//!         println!("x={} y={} z={}", record.x, record.y, record.z);
//!     }
//! }, 100)?;
//!
//! // The transport side (normally an interrupt or reader thread)
//! let payload = encode_payload(&[AccelRecord::new(100, -100, 0); 16]);
//! writer.write(&encode_frame(Default::default(), &payload)?);
//!
//! // The consumer side
//! let report = driver.poll()?;
//! assert_eq!(report.batches, 1);
//!
//! driver.stop()?;
//! # Ok::<(), gfs_sampler::GfsError>(())
//! ```
//!
//! ## Consumer Loop
//! ```no_run
//! use gfs_sampler::{batch_interval, Driver, ExternalSource, SampleBatch, SessionConfig};
//! use std::io::Read;
//!
//! let driver = Driver::new(SessionConfig::default(), ExternalSource);
//! let writer = driver.start(|batch: &SampleBatch| {
//!     println!("batch of {}", batch.count());
//! }, 400)?;
//!
//! // Producer thread feeding bytes from the serial device
//! std::thread::spawn(move || {
//!     let mut port = std::fs::File::open("/dev/ttyUSB0").unwrap();
//!     let mut chunk = [0u8; 256];
//!     while let Ok(n) = port.read(&mut chunk) {
//!         if n == 0 { break; }
//!         writer.write(&chunk[..n]);
//!     }
//! });
//!
//! loop {
//!     std::thread::sleep(batch_interval(400));
//!     driver.poll()?;
//! }
//! # Ok::<(), gfs_sampler::GfsError>(())
//! ```

pub mod batch;
pub mod common;
pub mod config;
pub mod decode;
pub mod error;
pub mod frame;
#[cfg(feature = "hdf5")]
pub mod hdf5_format;
pub mod ingest;
pub mod session;

// Re-export public API
pub use batch::{BatchAggregator, SampleBatch, SampleSink};
pub use common::{create_bar, init_logging, TimeKeeper};
pub use config::{FrameMarkers, SessionConfig, GFS_BUFFER_SIZE, GFS_HEADER_H1, GFS_HEADER_H2, GFS_NUM_SAMPLES};
pub use decode::{
    decode_payload, decode_record, encode_payload, encode_record, sign_extend_10, AccelRecord, DecodeReport,
    DECODED_RECORD_SIZE, RECORD_SIZE,
};
pub use error::{status_code, GfsError, Result};
pub use frame::{encode_frame, FrameHeader, FrameScanner, ScanStatus, HEADER_SIZE};
#[cfg(feature = "hdf5")]
pub use hdf5_format::{Hdf5Reader, Hdf5Writer, Metadata, TimestampedRecord};
pub use ingest::{IngestReader, IngestWriter, WriteOutcome};
pub use session::{batch_interval, Driver, ExternalSource, PassReport, SamplingSource, SessionState, SessionStats};
