use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fuser::FloorplanTrajectory;
use crate::imu_session::OutputRecord;
use crate::session::SessionMetadata;

/// Line-oriented sink for position and latency records
pub struct RecordWriter<W: Write> {
    writer: W,
    written: usize,
}

impl RecordWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        log::info!("Writing records to {}", path.display());
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> RecordWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn write(&mut self, record: &OutputRecord) -> Result<()> {
        writeln!(self.writer, "{}", record)?;
        self.written += 1;
        Ok(())
    }

    pub fn write_all<'a, I>(&mut self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a OutputRecord>,
    {
        for record in records {
            self.write(record)?;
        }
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Complete session export (JSON-serializable)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionExport {
    pub metadata: SessionMetadata,
    pub stats: SessionStats,
    pub trajectory: Option<FloorplanTrajectory>,
}

impl SessionExport {
    pub fn new(metadata: SessionMetadata, trajectory: Option<FloorplanTrajectory>) -> Self {
        Self {
            stats: SessionStats::from_metadata(&metadata),
            metadata,
            trajectory,
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Serialize to JSON bytes
    pub fn to_json_bytes(&self) -> std::result::Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json_bytes()?)?;
        log::info!("Session export written to {}", path.display());
        Ok(())
    }
}

/// Session statistics for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub sample_count: u32,
    pub position_record_count: u32,
    pub image_count: u32,
    /// Fraction of answered requests that produced a pose
    pub localization_rate: f64,
    /// Fraction of submitted images discarded while a request was in flight
    pub drop_rate: f64,
    pub segment_count: usize,
}

impl SessionStats {
    pub fn from_metadata(meta: &SessionMetadata) -> Self {
        let answered = meta.images_localized + meta.images_unmatched;
        SessionStats {
            sample_count: meta.accel_sample_count + meta.gyro_sample_count + meta.gravity_sample_count,
            position_record_count: meta.position_record_count,
            image_count: meta.image_count,
            localization_rate: ratio(meta.images_localized, answered),
            drop_rate: ratio(meta.images_dropped, meta.image_count),
            segment_count: meta.images_localized as usize,
        }
    }
}

fn ratio(part: u32, whole: u32) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fuser::TrajectorySegment;
    use crate::imu_session::LatencyRecord;
    use crate::integrator::PositionRecord;
    use crate::pose::Pose;
    use crate::session::SessionState;

    fn metadata() -> SessionMetadata {
        SessionMetadata {
            session_id: "test_session".to_string(),
            start_time: "2026-10-14T12:00:00Z".to_string(),
            state: SessionState::Stopped,
            accel_sample_count: 100,
            gyro_sample_count: 100,
            gravity_sample_count: 20,
            position_record_count: 90,
            image_count: 10,
            images_dispatched: 6,
            images_dropped: 4,
            images_localized: 3,
            images_unmatched: 2,
            localization_errors: 0,
        }
    }

    #[test]
    fn test_record_lines() {
        let mut writer = RecordWriter::new(Vec::new());
        writer
            .write_all(&[
                OutputRecord::Latency(LatencyRecord { video_start_ts: 10, imu_start_ts: 4 }),
                OutputRecord::Position(PositionRecord { timestamp: 20, position: [0.0, 1.5, -2.0] }),
            ])
            .unwrap();
        assert_eq!(writer.written(), 2);

        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "10 video recording started. Latency between IMU and camera: 6 (IMU started sooner)",
                "20 position [0.0, 1.5, -2.0]",
            ]
        );
    }

    #[test]
    fn test_export_json_serialization() {
        let trajectory = FloorplanTrajectory {
            segments: vec![TrajectorySegment {
                image_timestamp: 5,
                polyline: vec![[1.0, 2.0], [3.0, 4.0]],
                marker: [3.5, 4.5],
                previous_marker: Some([1.0, 2.0]),
            }],
            last_pose: Some(Pose::Planar { x: 3.5, y: 4.5 }),
        };
        let export = SessionExport::new(metadata(), Some(trajectory));

        let json = export.to_json().unwrap();
        assert!(json.contains("test_session"));
        assert!(json.contains("\"type\": \"planar\""));

        let parsed: SessionExport = serde_json::from_slice(&export.to_json_bytes().unwrap()).unwrap();
        assert_eq!(parsed.stats, export.stats);
    }

    #[test]
    fn test_stats_rates() {
        let stats = SessionStats::from_metadata(&metadata());
        assert_eq!(stats.sample_count, 220);
        assert!((stats.localization_rate - 0.6).abs() < 1e-12);
        assert!((stats.drop_rate - 0.4).abs() < 1e-12);

        let empty = SessionMetadata { image_count: 0, images_localized: 0, images_unmatched: 0, ..metadata() };
        assert_eq!(SessionStats::from_metadata(&empty).localization_rate, 0.0);
    }
}
