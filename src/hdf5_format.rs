//! HDF5 file format for recorded accelerometer batches
//!
//! Layout:
//! - `metadata` group: `start_time`, `sample_rate_hz`, `frame_markers`, `version`
//! - `accel_data` group: `timestamps` (f64), `accel_x`/`accel_y`/`accel_z` (i16 raw counts)

use crate::{AccelRecord, FrameMarkers, GfsError, Result};
use hdf5::types::VarLenUnicode;
use hdf5::{Dataset, File, Group};
use std::path::Path;

const FORMAT_VERSION: &str = "1.0";
const CHUNK_SIZE: usize = 1024;

/// Record with its capture timestamp
#[derive(Debug, Clone, Copy)]
pub struct TimestampedRecord {
    /// Seconds since collection start
    pub timestamp: f64,
    pub record: AccelRecord,
}

/// Metadata stored in the file
#[derive(Debug, Clone)]
pub struct Metadata {
    pub start_time: String, // RFC 3339
    pub sample_rate_hz: f64,
    pub frame_markers: String,
    pub version: String,
}

fn h5_err(context: &str) -> impl Fn(hdf5::Error) -> GfsError + '_ {
    move |e| GfsError::Io(format!("{}: {}", context, e))
}

fn vlu(text: &str) -> Result<VarLenUnicode> {
    text.parse()
        .map_err(|e| GfsError::Io(format!("Invalid HDF5 string {:?}: {:?}", text, e)))
}

struct DatasetHandles {
    timestamps: Dataset,
    accel_x: Dataset,
    accel_y: Dataset,
    accel_z: Dataset,
}

/// HDF5 writer for recorded batches
pub struct Hdf5Writer {
    file: File,
    datasets: DatasetHandles,
    sample_count: usize,
}

impl Hdf5Writer {
    /// Create a new HDF5 file
    ///
    /// # Arguments
    /// * `path` - File path
    /// * `rate` - Configured sampling frequency in Hz
    /// * `markers` - Frame markers the stream was decoded with
    pub fn create<P: AsRef<Path>>(path: P, rate: f64, markers: FrameMarkers) -> Result<Self> {
        let file = File::create(path).map_err(h5_err("Failed to create HDF5 file"))?;

        let metadata_group = file
            .create_group("metadata")
            .map_err(h5_err("Failed to create metadata group"))?;

        let start_time = vlu(&chrono::Local::now().to_rfc3339())?;
        Self::write_string_attr(&metadata_group, "start_time", &start_time)?;

        metadata_group
            .new_attr::<f64>()
            .create("sample_rate_hz")
            .and_then(|attr| attr.write_scalar(&rate))
            .map_err(h5_err("Failed to write sample_rate_hz"))?;

        let markers = vlu(&format!("0x{:02X} 0x{:02X}", markers.first, markers.second))?;
        Self::write_string_attr(&metadata_group, "frame_markers", &markers)?;
        Self::write_string_attr(&metadata_group, "version", &vlu(FORMAT_VERSION)?)?;

        let data_group = file
            .create_group("accel_data")
            .map_err(h5_err("Failed to create accel_data group"))?;

        let datasets = DatasetHandles {
            timestamps: Self::create_dataset::<f64>(&data_group, "timestamps")?,
            accel_x: Self::create_dataset::<i16>(&data_group, "accel_x")?,
            accel_y: Self::create_dataset::<i16>(&data_group, "accel_y")?,
            accel_z: Self::create_dataset::<i16>(&data_group, "accel_z")?,
        };

        Ok(Self {
            file,
            datasets,
            sample_count: 0,
        })
    }

    fn write_string_attr(group: &Group, name: &str, value: &VarLenUnicode) -> Result<()> {
        group
            .new_attr::<VarLenUnicode>()
            .create(name)
            .and_then(|attr| attr.write_scalar(value))
            .map_err(|e| GfsError::Io(format!("Failed to write {}: {}", name, e)))
    }

    /// Create a resizable, chunked, compressed dataset
    fn create_dataset<T: hdf5::H5Type>(group: &Group, name: &str) -> Result<Dataset> {
        group
            .new_dataset::<T>()
            .shape((0..,))
            .chunk((CHUNK_SIZE,))
            .deflate(4)
            .create(name)
            .map_err(|e| GfsError::Io(format!("Failed to create dataset {}: {}", name, e)))
    }

    /// Append a batch of records
    pub fn append_batch(&mut self, records: &[TimestampedRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let new_size = self.sample_count + records.len();

        let timestamps: Vec<f64> = records.iter().map(|r| r.timestamp).collect();
        let accel_x: Vec<i16> = records.iter().map(|r| r.record.x).collect();
        let accel_y: Vec<i16> = records.iter().map(|r| r.record.y).collect();
        let accel_z: Vec<i16> = records.iter().map(|r| r.record.z).collect();

        Self::append_to_dataset(&self.datasets.timestamps, new_size, &timestamps)?;
        Self::append_to_dataset(&self.datasets.accel_x, new_size, &accel_x)?;
        Self::append_to_dataset(&self.datasets.accel_y, new_size, &accel_y)?;
        Self::append_to_dataset(&self.datasets.accel_z, new_size, &accel_z)?;

        self.sample_count = new_size;
        Ok(())
    }

    fn append_to_dataset<T: hdf5::H5Type>(dataset: &Dataset, new_size: usize, data: &[T]) -> Result<()> {
        dataset
            .resize((new_size,))
            .map_err(h5_err("Failed to resize dataset"))?;

        let start = new_size - data.len();
        dataset
            .write_slice(data, start..)
            .map_err(h5_err("Failed to write to dataset"))?;

        Ok(())
    }

    /// Flush data to disk
    pub fn flush(&mut self) -> Result<()> {
        self.file.flush().map_err(h5_err("Failed to flush HDF5 file"))
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }
}

/// HDF5 reader for recorded batches
pub struct Hdf5Reader {
    datasets: DatasetHandles,
    metadata: Metadata,
}

impl Hdf5Reader {
    /// Open an existing HDF5 file for reading
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path).map_err(h5_err("Failed to open HDF5 file"))?;
        let metadata = Self::read_metadata(&file)?;

        let data_group = file
            .group("accel_data")
            .map_err(h5_err("Failed to open accel_data group"))?;
        let open = |name: &str| {
            data_group
                .dataset(name)
                .map_err(|e| GfsError::Io(format!("Failed to open {} dataset: {}", name, e)))
        };

        let datasets = DatasetHandles {
            timestamps: open("timestamps")?,
            accel_x: open("accel_x")?,
            accel_y: open("accel_y")?,
            accel_z: open("accel_z")?,
        };

        Ok(Self { datasets, metadata })
    }

    fn read_metadata(file: &File) -> Result<Metadata> {
        let group = file
            .group("metadata")
            .map_err(h5_err("Failed to open metadata group"))?;
        let read_string = |name: &str| {
            group
                .attr(name)
                .and_then(|attr| attr.read_scalar::<VarLenUnicode>())
                .map(|s| s.to_string())
                .map_err(|e| GfsError::Io(format!("Failed to read {}: {}", name, e)))
        };

        let sample_rate_hz = group
            .attr("sample_rate_hz")
            .and_then(|attr| attr.read_scalar::<f64>())
            .map_err(h5_err("Failed to read sample_rate_hz"))?;

        Ok(Metadata {
            start_time: read_string("start_time")?,
            sample_rate_hz,
            frame_markers: read_string("frame_markers")?,
            version: read_string("version")?,
        })
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Total number of records in the file
    pub fn total_samples(&self) -> usize {
        self.datasets.timestamps.size()
    }

    /// Read a range of records
    pub fn read_range(&self, start: usize, count: usize) -> Result<Vec<TimestampedRecord>> {
        let total = self.total_samples();
        if start >= total {
            return Ok(Vec::new());
        }
        let end = start + count.min(total - start);

        let timestamps = self
            .datasets
            .timestamps
            .read_slice_1d::<f64, _>(start..end)
            .map_err(h5_err("Failed to read timestamps"))?;
        let read_axis = |dataset: &Dataset| {
            dataset
                .read_slice_1d::<i16, _>(start..end)
                .map_err(h5_err("Failed to read axis"))
        };
        let xs = read_axis(&self.datasets.accel_x)?;
        let ys = read_axis(&self.datasets.accel_y)?;
        let zs = read_axis(&self.datasets.accel_z)?;

        Ok(timestamps
            .iter()
            .zip(xs.iter().zip(ys.iter().zip(zs.iter())))
            .map(|(&timestamp, (&x, (&y, &z)))| TimestampedRecord {
                timestamp,
                record: AccelRecord::new(x, y, z),
            })
            .collect())
    }

    /// Read the latest `count` records
    pub fn read_latest(&self, count: usize) -> Result<Vec<TimestampedRecord>> {
        let start = self.total_samples().saturating_sub(count);
        self.read_range(start, count)
    }
}
