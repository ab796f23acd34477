use anyhow::Result;
use rerun::{archetypes::Scalar, LineStrips2D, Points2D, RecordingStreamBuilder};

use crate::fuser::TrajectorySegment;
use crate::integrator::PositionRecord;

/// Rerun visualization of the fused floorplan trajectory
/// Supports Rerun v0.15+ API with archetype-based logging
pub struct RerunLogger {
    rec: rerun::RecordingStream,
    segments: usize,
}

impl RerunLogger {
    /// Initialize Rerun recording to file
    pub fn new(output_path: &str) -> Result<Self> {
        let rec = RecordingStreamBuilder::new("indoor_tracker")
            .save(output_path)
            .map_err(|e| anyhow::anyhow!("Failed to create Rerun recording: {}", e))?;

        log::info!("Rerun recording initialized to: {}", output_path);

        Ok(RerunLogger { rec, segments: 0 })
    }

    /// Set the sensor clock for all subsequent logs
    pub fn set_time_nanos(&self, timestamp: i64) {
        self.rec.set_time_nanos("sensor_time", timestamp);
    }

    /// Log a scalar value (generic for any measurement)
    pub fn log_scalar(&self, path: &str, value: f64) {
        let _ = self.rec.log(path, &Scalar::new(value));
    }

    /// Dead-reckoned inertial position (metres)
    pub fn log_position(&self, record: &PositionRecord) {
        self.set_time_nanos(record.timestamp);
        let [x, y, z] = record.position;
        self.log_scalar("inertial/position/x", x);
        self.log_scalar("inertial/position/y", y);
        self.log_scalar("inertial/position/z", z);
    }

    pub fn segments_logged(&self) -> usize {
        self.segments
    }

    /// One fusion cycle: the polyline (if any) and the pose marker, in floorplan pixels
    pub fn log_segment(&mut self, segment: &TrajectorySegment) {
        self.set_time_nanos(segment.image_timestamp);

        if !segment.polyline.is_empty() {
            let strip: Vec<[f32; 2]> = segment
                .polyline
                .iter()
                .map(|p| [p[0] as f32, p[1] as f32])
                .collect();
            let path = format!("floorplan/trajectory/{}", self.segments);
            let _ = self.rec.log(path.as_str(), &LineStrips2D::new([strip]));
        }
        let [x, y] = segment.marker;
        let _ = self.rec.log(
            "floorplan/poses",
            &Points2D::new([(x as f32, y as f32)]).with_radii([15.0]),
        );
        self.log_scalar("fusion/polyline_points", segment.polyline.len() as f64);
        self.segments += 1;
    }
}
