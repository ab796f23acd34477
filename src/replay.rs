//! Recorded sensor logs and image directories for offline runs.
//!
//! A sensor log holds one JSON [`SensorSample`] per line, optionally gzipped
//! (`.gz` extension). Images are named `<timestamp_ns>.jpeg` or `.jpg`.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use crate::error::{Result, TrackerError};
use crate::types::SensorSample;

/// Camera frame on disk
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageFrame {
    pub timestamp: i64,
    pub path: PathBuf,
}

impl ImageFrame {
    pub fn read(&self) -> Result<Vec<u8>> {
        fs::read(&self.path).map_err(|e| TrackerError::Replay(format!("{}: {}", self.path.display(), e)))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ReplayEvent {
    Sample(SensorSample),
    Image(ImageFrame),
}

impl ReplayEvent {
    pub fn timestamp(&self) -> i64 {
        match self {
            ReplayEvent::Sample(sample) => sample.timestamp,
            ReplayEvent::Image(frame) => frame.timestamp,
        }
    }
}

pub fn load_sensor_log(path: &Path) -> Result<Vec<SensorSample>> {
    let file = File::open(path)
        .map_err(|e| TrackerError::Replay(format!("{}: {}", path.display(), e)))?;
    let samples = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        parse_sensor_log(GzDecoder::new(file))?
    } else {
        parse_sensor_log(file)?
    };
    log::info!("Loaded {} samples from {}", samples.len(), path.display());
    Ok(samples)
}

/// Parses JSON lines; blank lines are skipped, samples are returned in
/// timestamp order.
pub fn parse_sensor_log<R: Read>(reader: R) -> Result<Vec<SensorSample>> {
    let mut samples = Vec::new();
    for (number, line) in BufReader::new(reader).lines().enumerate() {
        let line = line.map_err(|e| TrackerError::Replay(format!("line {}: {}", number + 1, e)))?;
        if line.trim().is_empty() {
            continue;
        }
        let sample: SensorSample = serde_json::from_str(&line)
            .map_err(|e| TrackerError::Replay(format!("line {}: {}", number + 1, e)))?;
        samples.push(sample);
    }
    // Stable, so coincident samples keep their logged order
    samples.sort_by_key(|s| s.timestamp);
    Ok(samples)
}

/// Images in `dir` whose stem is a nanosecond timestamp, oldest first.
/// Other files are skipped.
pub fn load_image_dir(dir: &Path) -> Result<Vec<ImageFrame>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| TrackerError::Replay(format!("{}: {}", dir.display(), e)))?;

    let mut frames = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| TrackerError::Replay(format!("{}: {}", dir.display(), e)))?
            .path();
        let is_jpeg = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("jpeg") || e.eq_ignore_ascii_case("jpg"))
            .unwrap_or(false);
        if !is_jpeg {
            continue;
        }
        match path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse::<i64>().ok()) {
            Some(timestamp) => frames.push(ImageFrame { timestamp, path }),
            None => log::warn!("Skipping {}: name is not a timestamp", path.display()),
        }
    }
    frames.sort_by_key(|f| f.timestamp);
    log::info!("Found {} images in {}", frames.len(), dir.display());
    Ok(frames)
}

/// Interleaves samples and images by timestamp; on ties samples come first,
/// so an image sees every sample recorded up to its own timestamp.
pub fn merge_timeline(samples: Vec<SensorSample>, frames: Vec<ImageFrame>) -> Vec<ReplayEvent> {
    let mut events: Vec<ReplayEvent> = samples
        .into_iter()
        .map(ReplayEvent::Sample)
        .chain(frames.into_iter().map(ReplayEvent::Image))
        .collect();
    events.sort_by_key(|e| (e.timestamp(), matches!(e, ReplayEvent::Image(_))));
    events
}
