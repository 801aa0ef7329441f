//! Session configuration and protocol constants

use crate::error::{GfsError, Result};

/// Ingest buffer size in bytes
pub const GFS_BUFFER_SIZE: usize = 12000;

/// Records per delivered batch (power of two)
pub const GFS_NUM_SAMPLES: usize = 16;

/// First frame marker byte
pub const GFS_HEADER_H1: u8 = 0x40;
/// Second frame marker byte
pub const GFS_HEADER_H2: u8 = 0x41;

/// Bytes the scanner peeks per step while hunting for markers
const DEFAULT_SCAN_WINDOW: usize = 64;

/// The two synchronization bytes that open every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMarkers {
    pub first: u8,
    pub second: u8,
}

impl FrameMarkers {
    pub const fn new(first: u8, second: u8) -> Self {
        Self { first, second }
    }
}

impl Default for FrameMarkers {
    fn default() -> Self {
        Self::new(GFS_HEADER_H1, GFS_HEADER_H2)
    }
}

/// Configuration applied to every session started by a driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Ingest buffer capacity in bytes
    pub buffer_capacity: usize,
    /// Frame synchronization markers
    pub markers: FrameMarkers,
    /// Marker search window in bytes
    pub scan_window: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: GFS_BUFFER_SIZE,
            markers: FrameMarkers::default(),
            scan_window: DEFAULT_SCAN_WINDOW,
        }
    }
}

impl SessionConfig {
    /// Use a different marker pair, keeping everything else
    pub fn with_markers(mut self, first: u8, second: u8) -> Self {
        self.markers = FrameMarkers::new(first, second);
        self
    }

    /// Use a different ingest buffer capacity
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Check that the configuration can carry at least one frame header
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity <= crate::frame::HEADER_SIZE {
            return Err(GfsError::InvalidConfig(format!(
                "Buffer capacity must exceed the {}-byte frame header, got {}",
                crate::frame::HEADER_SIZE,
                self.buffer_capacity
            )));
        }
        if self.scan_window < 2 {
            return Err(GfsError::InvalidConfig(format!(
                "Scan window must cover both marker bytes, got {}",
                self.scan_window
            )));
        }
        Ok(())
    }
}
