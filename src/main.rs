//! GFS stream reader - live view of decoded accelerometer batches
//!
//! Replays a framed byte stream from a file, pipe or serial device node into a
//! sampling session and displays the most recent batch.
//!
//! Usage:
//!   gfs-reader --input /dev/ttyUSB0 --frequency 400
//!   stream-gen --frames 200 | gfs-reader --input -

use clap::Parser;
use gfs_sampler::{
    batch_interval, create_bar, init_logging, AccelRecord, Driver, ExternalSource, GfsError, SampleBatch,
    SessionConfig, TimeKeeper, WriteOutcome,
};
use log::LevelFilter;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Parser, Debug)]
#[command(name = "gfs-reader")]
#[command(about = "Decode a framed accelerometer stream and show live batches", long_about = None)]
struct Args {
    /// Input stream: file, serial device node, or "-" for stdin
    #[arg(short, long, default_value = "-")]
    input: PathBuf,

    /// Sampling frequency in Hz (paces the consumer loop)
    #[arg(short, long, default_value = "100")]
    frequency: u32,

    /// First frame marker byte
    #[arg(long, default_value = "0x40", value_parser = parse_byte)]
    marker1: u8,

    /// Second frame marker byte
    #[arg(long, default_value = "0x41", value_parser = parse_byte)]
    marker2: u8,

    /// Transport read size in bytes
    #[arg(long, default_value = "256")]
    chunk: usize,

    /// Print a one-line summary per batch instead of the live view
    #[arg(short, long)]
    quiet: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn parse_byte(text: &str) -> Result<u8, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => text.parse::<u8>(),
    };
    parsed.map_err(|e| format!("invalid byte {:?}: {}", text, e))
}

/// Latest batch shared between the sink and the display
#[derive(Default)]
struct LiveState {
    latest: Option<AccelRecord>,
    batches: u64,
}

fn open_input(path: &Path) -> io::Result<Box<dyn Read + Send>> {
    if path.as_os_str() == "-" {
        Ok(Box::new(io::stdin()))
    } else {
        Ok(Box::new(File::open(path)?))
    }
}

fn draw(state: &LiveState, timer: &TimeKeeper, frequency: u32) -> io::Result<()> {
    let mut out = io::stdout().lock();
    write!(out, "\x1B[H")?;
    writeln!(out, "GFS Accelerometer Reader - Live Data                           ")?;
    writeln!(out, "=====================================                          ")?;
    writeln!(
        out,
        "Time: {:.2}s | Batches: {} | Rate: {:.1} batches/s (target {:.1})      ",
        timer.elapsed_secs(),
        state.batches,
        timer.rate(state.batches),
        frequency as f64 / gfs_sampler::GFS_NUM_SAMPLES as f64
    )?;
    writeln!(out)?;
    writeln!(out, "ACCELEROMETER (raw)             -512 ◄─────────┼─────────► +511")?;
    if let Some(record) = state.latest {
        writeln!(out, "  X: {:5}  [{}]", record.x, create_bar(record.x, 512, 40))?;
        writeln!(out, "  Y: {:5}  [{}]", record.y, create_bar(record.y, 512, 40))?;
        writeln!(out, "  Z: {:5}  [{}]", record.z, create_bar(record.z, 512, 40))?;
    } else {
        writeln!(out, "  waiting for first batch...                                  ")?;
    }
    writeln!(out)?;
    writeln!(out, "Press Ctrl+C to exit                                           ")?;
    out.flush()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.log_level);

    if args.chunk == 0 {
        eprintln!("Error: chunk size must be at least 1 byte");
        std::process::exit(1);
    }

    let config = SessionConfig::default().with_markers(args.marker1, args.marker2);
    let driver = Driver::new(config, ExternalSource);

    let live = Arc::new(Mutex::new(LiveState::default()));
    let sink_state = Arc::clone(&live);
    let quiet = args.quiet;
    let sink = move |batch: &SampleBatch| {
        let mut state = sink_state.lock().unwrap_or_else(|p| p.into_inner());
        state.batches += 1;
        state.latest = batch.last().copied();
        if quiet {
            if let Some(r) = state.latest {
                println!(
                    "batch {:6}: {} records, {} bytes, last x={} y={} z={}",
                    state.batches,
                    batch.count(),
                    batch.size_bytes(),
                    r.x,
                    r.y,
                    r.z
                );
            }
        }
    };

    let writer = match driver.start(sink, args.frequency) {
        Ok(writer) => writer,
        Err(GfsError::InvalidFrequency(f)) => {
            eprintln!("Error: sampling frequency must be positive, got {}", f);
            return Err(Box::new(GfsError::InvalidFrequency(f)));
        }
        Err(e) => {
            eprintln!("Error starting sampling session: {}", e);
            return Err(Box::new(e));
        }
    };

    // Setup Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    // Producer: transport bytes into the ingest buffer
    let mut input = open_input(&args.input)?;
    let chunk_size = args.chunk;
    let producer_done = Arc::new(AtomicBool::new(false));
    let done = producer_done.clone();
    let producer = thread::spawn(move || -> io::Result<()> {
        let mut chunk = vec![0u8; chunk_size];
        let result = loop {
            let n = match input.read(&mut chunk) {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            };
            match writer.write(&chunk[..n]) {
                WriteOutcome::Stored => {}
                WriteOutcome::Overflow { dropped, .. } => {
                    log::warn!("Ingest overflow: dropped {} buffered bytes", dropped);
                }
                WriteOutcome::Closed => break Ok(()),
            }
        };
        done.store(true, Ordering::SeqCst);
        result
    });

    let timer = TimeKeeper::new();
    let interval = batch_interval(args.frequency);
    if !quiet {
        print!("\x1B[2J\x1B[H");
        io::stdout().flush()?;
    }

    // Consumer: one pass per batch interval
    while running.load(Ordering::SeqCst) {
        let finished = producer_done.load(Ordering::SeqCst);
        let report = driver.poll()?;

        if !quiet {
            let state = live.lock().unwrap_or_else(|p| p.into_inner());
            draw(&state, &timer, args.frequency)?;
        }

        // Input exhausted and fully drained
        if finished && report.frames == 0 {
            break;
        }
        thread::sleep(interval);
    }

    let stats = driver.stats().ok();
    driver.stop()?;

    // A reader blocked on an open device or pipe is left behind
    if producer_done.load(Ordering::SeqCst) {
        match producer.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => eprintln!("Input error: {}", e),
            Err(_) => eprintln!("Input thread panicked"),
        }
    }

    if let Some(stats) = stats {
        println!();
        println!("Sampling complete!");
        println!("Frames: {}", stats.frames);
        println!("Records: {}", stats.records);
        println!("Batches delivered: {}", stats.batches);
        println!("Resync bytes: {}", stats.resync_bytes);
        println!("Overflows: {}", stats.overflows);
        println!("Elapsed time: {:.2} seconds", timer.elapsed_secs());
    }

    Ok(())
}
