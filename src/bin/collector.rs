//! GFS Data Collector
//!
//! Runs a sampling session over a recorded or live stream and writes every
//! delivered batch to an HDF5 file.
//!
//! Usage:
//!   collector --input /dev/ttyUSB0 --output data.h5 --frequency 400 --duration 60

use clap::Parser;
use gfs_sampler::{
    batch_interval, init_logging, Driver, ExternalSource, Hdf5Reader, Hdf5Writer, SampleBatch, SessionConfig,
    TimeKeeper, TimestampedRecord,
};
use log::LevelFilter;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "collector")]
#[command(about = "Collect decoded accelerometer batches to an HDF5 file", long_about = None)]
struct Args {
    /// Input stream: file, serial device node, or "-" for stdin
    #[arg(short, long, default_value = "-")]
    input: PathBuf,

    /// Output HDF5 file path
    #[arg(short, long, default_value = "accel_data.h5")]
    output: PathBuf,

    /// Sampling frequency in Hz
    #[arg(short, long, default_value = "100")]
    frequency: u32,

    /// Duration in seconds (optional, runs until Ctrl+C or end of input if omitted)
    #[arg(short, long)]
    duration: Option<u64>,

    /// First frame marker byte
    #[arg(long, default_value = "64")]
    marker1: u8,

    /// Second frame marker byte
    #[arg(long, default_value = "65")]
    marker2: u8,

    /// Re-open the file after collection and check it against the recorded count
    #[arg(long)]
    verify: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

/// Sink that timestamps each batch and hands it to the recording thread
fn stamping_sink(
    tx: mpsc::Sender<Vec<TimestampedRecord>>,
    timer: Arc<TimeKeeper>,
    frequency_hz: u32,
) -> impl FnMut(&SampleBatch) + Send + 'static {
    let dt = 1.0 / frequency_hz.max(1) as f64;
    move |batch: &SampleBatch| {
        // Interpolate timestamps back from the batch end, evenly spaced
        let batch_end = timer.elapsed_secs();
        let count = batch.count();
        let stamped = batch
            .records()
            .iter()
            .enumerate()
            .map(|(i, &record)| TimestampedRecord {
                timestamp: batch_end - (count - 1 - i) as f64 * dt,
                record,
            })
            .collect();
        if let Err(e) = tx.send(stamped) {
            log::warn!("Recorder gone, dropping batch of {} records", e.0.len());
        }
    }
}

/// Read the file back and check its metadata and record count
fn verify(path: &Path, expected: usize) -> Result<(), Box<dyn std::error::Error>> {
    let reader = Hdf5Reader::open(path)?;
    let metadata = reader.metadata();
    println!();
    println!("Verifying {}", path.display());
    println!("  Format version: {}", metadata.version);
    println!("  Start time: {}", metadata.start_time);
    println!("  Sample rate: {} Hz", metadata.sample_rate_hz);
    println!("  Frame markers: {}", metadata.frame_markers);
    println!("  Records: {}", reader.total_samples());

    if reader.total_samples() != expected {
        return Err(format!(
            "verification failed: {} records in file, {} written",
            reader.total_samples(),
            expected
        )
        .into());
    }
    if let Some(last) = reader.read_latest(1)?.first() {
        println!(
            "  Last record: t={:.3}s x={} y={} z={}",
            last.timestamp, last.record.x, last.record.y, last.record.z
        );
    }
    println!("Verification passed");
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.log_level);

    println!("GFS Data Collector");
    println!("==================");
    println!("Input: {}", args.input.display());
    println!("Frequency: {} Hz", args.frequency);
    println!("Output file: {}", args.output.display());
    if let Some(duration) = args.duration {
        println!("Duration: {} seconds", duration);
    } else {
        println!("Duration: until end of input (Ctrl+C to stop)");
    }
    println!();

    let config = SessionConfig::default().with_markers(args.marker1, args.marker2);
    let markers = config.markers;
    let mut writer = Hdf5Writer::create(&args.output, args.frequency as f64, markers)?;

    // Batches leave the sink through a channel; the file is written on this thread
    let (tx, rx) = mpsc::channel::<Vec<TimestampedRecord>>();
    let timer = Arc::new(TimeKeeper::new());
    let sink = stamping_sink(tx, Arc::clone(&timer), args.frequency);

    let driver = Driver::new(config, ExternalSource);
    let ingest = driver.start(sink, args.frequency)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, stopping collection...");
        r.store(false, Ordering::SeqCst);
    })?;

    let mut input: Box<dyn Read + Send> = if args.input.as_os_str() == "-" {
        Box::new(io::stdin())
    } else {
        Box::new(File::open(&args.input)?)
    };
    let producer_done = Arc::new(AtomicBool::new(false));
    let done = producer_done.clone();
    thread::spawn(move || {
        let mut chunk = [0u8; 256];
        while let Ok(n) = input.read(&mut chunk) {
            if n == 0 || ingest.is_closed() {
                break;
            }
            ingest.write(&chunk[..n]);
        }
        done.store(true, Ordering::SeqCst);
    });

    let end_time = args.duration.map(|d| Instant::now() + Duration::from_secs(d));
    let interval = batch_interval(args.frequency);
    let mut last_flush = Instant::now();

    println!("Starting data collection...");
    let result: Result<(), Box<dyn std::error::Error>> = (|| {
        while running.load(Ordering::SeqCst) {
            if end_time.is_some_and(|end| Instant::now() >= end) {
                break;
            }

            let finished = producer_done.load(Ordering::SeqCst);
            let report = driver.poll()?;
            for stamped in rx.try_iter() {
                writer.append_batch(&stamped)?;
            }

            // Periodic flush (every 10 seconds)
            if last_flush.elapsed() >= Duration::from_secs(10) {
                writer.flush()?;
                last_flush = Instant::now();
            }

            if finished && report.frames == 0 {
                break;
            }
            thread::sleep(interval);
        }
        Ok(())
    })();

    driver.stop()?;
    for stamped in rx.try_iter() {
        writer.append_batch(&stamped)?;
    }

    match result {
        Ok(()) => {
            writer.flush()?;
            let elapsed = timer.elapsed_secs();
            println!("\nCollection complete!");
            println!("Total records: {}", writer.sample_count());
            println!("Elapsed time: {:.2} seconds", elapsed);
            println!("Actual record rate: {:.1} Hz", writer.sample_count() as f64 / elapsed);
            println!("File: {}", args.output.display());
            if args.verify {
                let expected = writer.sample_count();
                drop(writer);
                verify(&args.output, expected)?;
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("\nError during collection: {}", e);
            eprintln!("Attempting to flush data...");
            if let Err(flush_err) = writer.flush() {
                eprintln!("Failed to flush: {}", flush_err);
            }
            Err(e)
        }
    }
}
