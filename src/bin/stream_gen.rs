//! Synthetic GFS stream generator
//!
//! Writes framed, bit-packed accelerometer records to a file or stdout, with
//! optional corruption so the reader's resynchronization can be exercised.
//!
//! Usage:
//!   stream-gen --output capture.bin --frames 500 --records 10 --corrupt-every 50

use clap::Parser;
use gfs_sampler::{encode_frame, encode_payload, AccelRecord, FrameMarkers};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "stream-gen")]
#[command(about = "Generate a synthetic framed accelerometer stream", long_about = None)]
struct Args {
    /// Output file ("-" for stdout)
    #[arg(short, long, default_value = "-")]
    output: PathBuf,

    /// Number of frames to write
    #[arg(short, long, default_value = "100")]
    frames: usize,

    /// Records per frame
    #[arg(short, long, default_value = "10")]
    records: usize,

    /// Flip the second marker of every Nth frame (0 = never)
    #[arg(long, default_value = "0")]
    corrupt_every: usize,

    /// First frame marker byte
    #[arg(long, default_value = "64")]
    marker1: u8,

    /// Second frame marker byte
    #[arg(long, default_value = "65")]
    marker2: u8,
}

/// Slow sine-like sweep on each axis, kept inside the 10-bit range
fn synth_record(index: usize) -> AccelRecord {
    let phase = index as f32 * 0.05;
    let axis = |offset: f32| (phase + offset).sin() * 500.0;
    AccelRecord::new(axis(0.0) as i16, axis(2.1) as i16, axis(4.2) as i16)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.records * gfs_sampler::RECORD_SIZE > u16::MAX as usize {
        eprintln!("Error: {} records do not fit in one frame", args.records);
        std::process::exit(1);
    }

    let markers = FrameMarkers::new(args.marker1, args.marker2);
    let sink: Box<dyn Write> = if args.output.as_os_str() == "-" {
        Box::new(io::stdout().lock())
    } else {
        Box::new(File::create(&args.output)?)
    };
    let mut out = BufWriter::new(sink);

    let mut index = 0usize;
    let mut corrupted = 0usize;
    for frame_no in 0..args.frames {
        let records: Vec<AccelRecord> = (0..args.records)
            .map(|i| synth_record(index + i))
            .collect();
        index += args.records;

        let mut frame = encode_frame(markers, &encode_payload(&records))?;
        if args.corrupt_every > 0 && (frame_no + 1) % args.corrupt_every == 0 {
            frame[1] ^= 0x02;
            corrupted += 1;
        }
        out.write_all(&frame)?;
    }
    out.flush()?;

    eprintln!(
        "Wrote {} frames ({} records, {} corrupted)",
        args.frames,
        index,
        corrupted
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synth_record_in_range() {
        for i in 0..1000 {
            assert!(synth_record(i).in_range());
        }
    }
}
