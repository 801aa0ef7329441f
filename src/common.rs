//! Common utilities shared across programs

use std::io::Write;
use std::time::Instant;

use log::LevelFilter;

/// Tracks elapsed time since creation
pub struct TimeKeeper {
    start: Instant,
}

impl TimeKeeper {
    /// Create a new TimeKeeper starting now
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time in seconds
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Average rate of `count` events since creation
    pub fn rate(&self, count: u64) -> f64 {
        let elapsed = self.elapsed_secs();
        if elapsed > 0.0 {
            count as f64 / elapsed
        } else {
            0.0
        }
    }
}

impl Default for TimeKeeper {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a horizontal bar graph for a raw axis value
///
/// # Arguments
/// * `value` - Raw axis count
/// * `full_scale` - Largest absolute count (defines scale)
/// * `width` - Total width of the bar in characters
///
/// # Example
/// ```
/// use gfs_sampler::create_bar;
///
/// // Display +256 counts on the 10-bit scale with a 40-char bar
/// let bar = create_bar(256, 512, 40);
/// println!("[{}]", bar);
/// ```
pub fn create_bar(value: i16, full_scale: i16, width: usize) -> String {
    let normalized = (value as f32 / full_scale.max(1) as f32).clamp(-1.0, 1.0);
    let center = width / 2;
    let bar_length = ((normalized.abs() * center as f32) as usize).min(center);

    let mut bar = String::new();

    if normalized < 0.0 {
        bar.push_str(&" ".repeat(center - bar_length));
        bar.push_str(&"█".repeat(bar_length));
        bar.push('|');
        bar.push_str(&" ".repeat(center));
    } else {
        bar.push_str(&" ".repeat(center));
        bar.push('|');
        bar.push_str(&"█".repeat(bar_length));
        bar.push_str(&" ".repeat(center - bar_length));
    }

    bar
}

/// Install the `env_logger` backend for the command-line tools
///
/// `level` is the default filter; `RUST_LOG` directives refine it per
/// module. Records are stamped with local wall-clock time. Returns `false`
/// if a logger was already installed.
pub fn init_logging(level: LevelFilter) -> bool {
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} [{}] {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_bar_zero() {
        let bar = create_bar(0, 512, 40);
        assert_eq!(bar.chars().count(), 41); // 40 chars + 1 center marker
        assert!(bar.contains('|'));
    }

    #[test]
    fn test_create_bar_positive() {
        let bar = create_bar(256, 512, 40);
        assert_eq!(bar.chars().count(), 41);
        assert_eq!(bar.chars().filter(|&c| c == '█').count(), 10);
    }

    #[test]
    fn test_create_bar_negative_full_scale() {
        let bar = create_bar(-512, 512, 40);
        assert_eq!(bar.chars().count(), 41);
        assert!(bar.starts_with('█'));
    }

    #[test]
    fn test_timekeeper() {
        let keeper = TimeKeeper::new();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let elapsed = keeper.elapsed_secs();
        assert!(elapsed >= 0.01);
        assert!(keeper.rate(100) > 0.0);
    }

    #[test]
    fn test_init_logging_once() {
        init_logging(LevelFilter::Warn);
        assert!(!init_logging(LevelFilter::Debug));
    }
}
