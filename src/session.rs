//! Session lifecycle: start, consumer passes, stop

use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::batch::{BatchAggregator, SampleSink};
use crate::config::{SessionConfig, GFS_NUM_SAMPLES};
use crate::decode::decode_payload;
use crate::error::{GfsError, Result};
use crate::frame::{FrameScanner, ScanStatus};
use crate::ingest::{self, IngestReader, IngestWriter};

/// Hardware collaborator that produces samples at the requested rate
///
/// Only ever called with the session lock held, from `start` and `stop`.
pub trait SamplingSource: Send {
    /// Program the sensor / timer for `frequency_hz`
    fn configure(&mut self, frequency_hz: u32) -> Result<()>;
    /// Stop sampling; must not fail
    fn shutdown(&mut self);
}

/// Sampling source for transports that are already streaming (files, pipes, tests)
#[derive(Debug, Default, Clone, Copy)]
pub struct ExternalSource;

impl SamplingSource for ExternalSource {
    fn configure(&mut self, frequency_hz: u32) -> Result<()> {
        log::debug!("External sampling source at {} Hz", frequency_hz);
        Ok(())
    }

    fn shutdown(&mut self) {}
}

/// Lifecycle state reported by [`Driver::state`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Running { frequency_hz: u32 },
}

/// Per-session totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames: u64,
    pub records: u64,
    pub batches: u64,
    /// Bytes skipped while resynchronizing
    pub resync_bytes: u64,
    /// Marker hits rejected for an implausible length
    pub bad_lengths: u64,
    /// Payloads that ended in a partial record
    pub decode_anomalies: u64,
    /// Ingest overflow resets
    pub overflows: u64,
    /// Bytes lost to overflow resets
    pub dropped_bytes: u64,
}

/// Result of one consumer pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub frames: usize,
    pub records: usize,
    pub batches: usize,
    pub trailing_bytes: usize,
    /// Records held back waiting for the batch to fill
    pub pending: usize,
    /// The pass stopped on a frame that is not complete yet
    pub incomplete: bool,
}

struct ActiveSession {
    frequency_hz: u32,
    reader: IngestReader,
    scanner: FrameScanner,
    aggregator: BatchAggregator,
    sink: Box<dyn SampleSink + Send>,
    payload: Vec<u8>,
    decode_anomalies: u64,
    records: u64,
}

impl ActiveSession {
    fn stats(&self) -> SessionStats {
        let scan = self.scanner.counters();
        let ingest = self.reader.counters();
        SessionStats {
            frames: scan.frames,
            records: self.records,
            batches: self.aggregator.delivered(),
            resync_bytes: scan.resync_bytes,
            bad_lengths: scan.bad_lengths,
            decode_anomalies: self.decode_anomalies,
            overflows: ingest.overflows,
            dropped_bytes: ingest.bytes_dropped,
        }
    }

    fn run_pass(&mut self) -> PassReport {
        let mut report = PassReport::default();
        let Self {
            reader,
            scanner,
            aggregator,
            sink,
            payload,
            decode_anomalies,
            records,
            ..
        } = self;

        loop {
            match scanner.next_frame(&*reader, payload) {
                ScanStatus::Frame { .. } => {
                    report.frames += 1;
                    let decoded = decode_payload(payload, |record| {
                        if aggregator.push(record, sink.as_mut()) {
                            report.batches += 1;
                        }
                    });
                    report.records += decoded.records;
                    report.trailing_bytes += decoded.trailing_bytes;
                    if decoded.is_anomalous() {
                        *decode_anomalies += 1;
                    }
                }
                ScanStatus::Incomplete => {
                    report.incomplete = true;
                    break;
                }
                ScanStatus::Empty => break,
            }
        }

        *records += report.records as u64;
        report.pending = aggregator.pending();
        report
    }
}

enum State {
    Stopped,
    Running(ActiveSession),
}

/// Marks the thread currently inside a sink, with the session it belongs to
#[derive(Clone, Copy)]
struct Delivery {
    thread: ThreadId,
    frequency_hz: u32,
}

/// Clears the delivery marker on drop, including when a sink panics
struct DeliveryGuard<'a> {
    slot: &'a Mutex<Option<Delivery>>,
}

impl<'a> DeliveryGuard<'a> {
    fn enter(slot: &'a Mutex<Option<Delivery>>, frequency_hz: u32) -> Self {
        *slot.lock().unwrap_or_else(|p| p.into_inner()) = Some(Delivery {
            thread: thread::current().id(),
            frequency_hz,
        });
        Self { slot }
    }
}

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

/// The sampling driver: owns the session state and the hardware source
///
/// `start`, `stop` and `poll` are serialized on one lock, so concurrent
/// `start` calls have exactly one winner. A sink may query `state` and
/// `is_running`; every other call from inside a sink fails with
/// [`GfsError::Reentrant`].
///
/// # Example
/// ```
/// use gfs_sampler::{encode_frame, encode_payload, AccelRecord, Driver, ExternalSource, SampleBatch, SessionConfig};
///
/// let driver = Driver::new(SessionConfig::default(), ExternalSource);
/// let writer = driver.start(|batch: &SampleBatch| {
///     println!("{} records, {} bytes", batch.count(), batch.size_bytes());
/// }, 100)?;
///
/// let payload = encode_payload(&[AccelRecord::new(100, -100, 0); 16]);
/// writer.write(&encode_frame(Default::default(), &payload)?);
///
/// let report = driver.poll()?;
/// assert_eq!(report.batches, 1);
/// driver.stop()?;
/// # Ok::<(), gfs_sampler::GfsError>(())
/// ```
pub struct Driver<S: SamplingSource> {
    config: SessionConfig,
    state: Mutex<(State, S)>,
    delivering: Mutex<Option<Delivery>>,
}

impl<S: SamplingSource> Driver<S> {
    pub fn new(config: SessionConfig, source: S) -> Self {
        Self {
            config,
            state: Mutex::new((State::Stopped, source)),
            delivering: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn lock_state(&self) -> MutexGuard<'_, (State, S)> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The delivery in progress on this thread, if any
    fn delivery_here(&self) -> Option<Delivery> {
        let delivering = *self.delivering.lock().unwrap_or_else(|p| p.into_inner());
        delivering.filter(|d| d.thread == thread::current().id())
    }

    fn check_reentry(&self) -> Result<()> {
        match self.delivery_here() {
            Some(_) => Err(GfsError::Reentrant),
            None => Ok(()),
        }
    }

    /// Start a sampling session
    ///
    /// Allocates the ingest buffer, configures the sampling source and
    /// registers `sink`. Returns the producer handle for the transport.
    ///
    /// # Errors
    /// * `AlreadyRunning` - a session is active; nothing changes
    /// * `InvalidFrequency` - `frequency_hz` is zero
    /// * `OutOfMemory` - buffer allocation failed; the source is untouched
    /// * `SamplingSource` - the source rejected the frequency; buffer released
    pub fn start<K>(&self, sink: K, frequency_hz: u32) -> Result<IngestWriter>
    where
        K: SampleSink + Send + 'static,
    {
        self.check_reentry()?;
        let mut guard = self.lock_state();
        let (state, source) = &mut *guard;

        if let State::Running { .. } = state {
            return Err(GfsError::AlreadyRunning);
        }
        if frequency_hz == 0 {
            return Err(GfsError::InvalidFrequency(frequency_hz));
        }
        self.config.validate()?;

        let (writer, reader) = ingest::channel(self.config.buffer_capacity)?;

        if let Err(e) = source.configure(frequency_hz) {
            reader.release();
            log::error!("Sampling source failed to configure: {}", e);
            return Err(e);
        }

        *state = State::Running(ActiveSession {
            frequency_hz,
            scanner: FrameScanner::new(
                self.config.markers,
                self.config.buffer_capacity,
                self.config.scan_window,
            ),
            reader,
            aggregator: BatchAggregator::new(),
            sink: Box::new(sink),
            payload: Vec::new(),
            decode_anomalies: 0,
            records: 0,
        });

        log::info!(
            "Sampling started at {} Hz ({} byte buffer, markers 0x{:02X} 0x{:02X})",
            frequency_hz,
            self.config.buffer_capacity,
            self.config.markers.first,
            self.config.markers.second
        );
        Ok(writer)
    }

    /// Stop the running session
    ///
    /// Shuts the sampling source down, releases the ingest buffer and drops
    /// any partially filled batch. Stopping an already stopped driver is a
    /// no-op.
    pub fn stop(&self) -> Result<()> {
        self.check_reentry()?;
        let mut guard = self.lock_state();
        let (state, source) = &mut *guard;

        let mut session = match std::mem::replace(state, State::Stopped) {
            State::Running(session) => session,
            State::Stopped => {
                log::debug!("Stop requested while already stopped");
                return Ok(());
            }
        };

        source.shutdown();
        let discarded = session.aggregator.discard();
        let stats = session.stats();
        session.reader.release();

        log::info!(
            "Sampling stopped: {} frames, {} records, {} batches, {} partial records discarded",
            stats.frames,
            stats.records,
            stats.batches,
            discarded
        );
        if stats.resync_bytes > 0 || stats.overflows > 0 || stats.decode_anomalies > 0 {
            log::warn!(
                "Stream anomalies: {} resync bytes, {} bad lengths, {} overflows ({} bytes dropped), {} short payloads",
                stats.resync_bytes,
                stats.bad_lengths,
                stats.overflows,
                stats.dropped_bytes,
                stats.decode_anomalies
            );
        }
        Ok(())
    }

    /// Run one consumer pass: drain complete frames and deliver full batches
    ///
    /// The sink is invoked from this call only.
    pub fn poll(&self) -> Result<PassReport> {
        self.check_reentry()?;
        let mut guard = self.lock_state();
        let session = match &mut guard.0 {
            State::Running(session) => session,
            State::Stopped => return Err(GfsError::NotRunning),
        };

        let report = {
            let _delivery = DeliveryGuard::enter(&self.delivering, session.frequency_hz);
            session.run_pass()
        };

        if report.trailing_bytes > 0 {
            log::debug!("Pass dropped {} trailing payload bytes", report.trailing_bytes);
        }
        Ok(report)
    }

    pub fn state(&self) -> SessionState {
        // The session lock is held by the pass delivering to this thread
        if let Some(delivery) = self.delivery_here() {
            return SessionState::Running {
                frequency_hz: delivery.frequency_hz,
            };
        }
        match &self.lock_state().0 {
            State::Stopped => SessionState::Stopped,
            State::Running(session) => SessionState::Running {
                frequency_hz: session.frequency_hz,
            },
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), SessionState::Running { .. })
    }

    /// Totals for the running session
    ///
    /// # Errors
    /// * `NotRunning` - no session is active
    /// * `Reentrant` - called from inside a sink
    pub fn stats(&self) -> Result<SessionStats> {
        self.check_reentry()?;
        match &self.lock_state().0 {
            State::Running(session) => Ok(session.stats()),
            State::Stopped => Err(GfsError::NotRunning),
        }
    }
}

impl<S: SamplingSource> Drop for Driver<S> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Time for the sensor to produce one full batch at `frequency_hz`
///
/// Consumer loops poll at this interval so each pass finds about one batch.
pub fn batch_interval(frequency_hz: u32) -> Duration {
    let frequency_hz = frequency_hz.max(1) as u64;
    Duration::from_micros(GFS_NUM_SAMPLES as u64 * 1_000_000 / frequency_hz)
}
