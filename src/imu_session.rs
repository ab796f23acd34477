use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::TrackerConfig;
use crate::integrator::{InertialIntegrator, PositionRecord};
use crate::orientation::OrientationEstimator;
use crate::types::{SensorKind, SensorSample, TimedVector, Vec3};

/// One-off line comparing when the camera and the IMU started recording
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyRecord {
    pub video_start_ts: i64,
    pub imu_start_ts: i64,
}

impl LatencyRecord {
    /// Positive when the camera started first
    pub fn latency_nanos(&self) -> i64 {
        self.imu_start_ts - self.video_start_ts
    }
}

impl fmt::Display for LatencyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let latency = self.latency_nanos();
        write!(
            f,
            "{} video recording started. Latency between IMU and camera: {} ({} started sooner)",
            self.video_start_ts,
            latency.abs(),
            if latency < 0 { "IMU" } else { "camera" }
        )
    }
}

/// Records produced by the sensor path, in emission order
#[derive(Clone, Debug, PartialEq)]
pub enum OutputRecord {
    Position(PositionRecord),
    Latency(LatencyRecord),
}

impl fmt::Display for OutputRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputRecord::Position(record) => write!(f, "{}", record),
            OutputRecord::Latency(record) => write!(f, "{}", record),
        }
    }
}

/// Latest raw IMU readings relative to an image timestamp
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImuSnapshot {
    pub image_timestamp: i64,
    pub imu_timestamp: i64,
    pub acceleration: [f64; 3],
    pub gyro_timestamp: Option<i64>,
    pub angular_velocity: Option<[f64; 3]>,
    pub imu_delay: i64,
}

impl ImuSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Sensor-thread side of tracking: alignment, integration and the buffer of
/// positions waiting to be handed to the localization client.
pub struct ImuSession {
    estimator: OrientationEstimator,
    integrator: InertialIntegrator,
    latest_accel: Option<TimedVector>,
    latest_gyro: Option<TimedVector>,
    pending_positions: Vec<(i64, Vec3)>,
    imu_start_ts: Option<i64>,
    video_start_ts: Option<i64>,
    latency_reported: bool,
}

impl ImuSession {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            estimator: OrientationEstimator::new(config.alignment, Vec3::from(config.world_gravity)),
            integrator: InertialIntegrator::new(config.integration_interval_nanos),
            latest_accel: None,
            latest_gyro: None,
            pending_positions: Vec::new(),
            imu_start_ts: None,
            video_start_ts: None,
            latency_reported: false,
        }
    }

    pub fn estimator(&self) -> &OrientationEstimator {
        &self.estimator
    }

    pub fn integrator(&self) -> &InertialIntegrator {
        &self.integrator
    }

    /// Dispatches a sample to the matching handler
    pub fn on_sample(&mut self, sample: &SensorSample) -> Vec<OutputRecord> {
        match sample.kind {
            SensorKind::Accelerometer => self.on_accelerometer(sample.timestamp, sample.vector(), None),
            SensorKind::Gyroscope => self.on_gyroscope(sample.timestamp, sample.vector()),
            SensorKind::Gravity => {
                self.on_gravity(sample.vector());
                self.mark_imu_start(sample.timestamp)
            }
        }
    }

    pub fn on_accelerometer(
        &mut self,
        timestamp: i64,
        accel: Vec3,
        gravity: Option<Vec3>,
    ) -> Vec<OutputRecord> {
        let mut out = self.mark_imu_start(timestamp);
        self.latest_accel = Some(TimedVector::new(timestamp, accel));

        let aligned = self.estimator.align(timestamp, accel, gravity);
        let batch = self.integrator.on_accelerometer(timestamp, aligned);
        if !batch.is_empty() {
            log::trace!("Integrated batch of {} positions at {}", batch.len(), timestamp);
        }
        for record in batch {
            self.pending_positions.push((record.timestamp, record.vector()));
            out.push(OutputRecord::Position(record));
        }
        out
    }

    pub fn on_gyroscope(&mut self, timestamp: i64, angular_velocity: Vec3) -> Vec<OutputRecord> {
        let out = self.mark_imu_start(timestamp);
        self.latest_gyro = Some(TimedVector::new(timestamp, angular_velocity));
        self.estimator.on_gyroscope(timestamp, angular_velocity);
        out
    }

    pub fn on_gravity(&mut self, gravity: Vec3) {
        self.estimator.on_gravity(gravity);
    }

    /// Positions emitted since the previous call, oldest first
    pub fn take_positions(&mut self) -> Vec<(i64, Vec3)> {
        std::mem::take(&mut self.pending_positions)
    }

    /// Registers the camera start. The latency record comes back immediately
    /// when the IMU has already started, otherwise with the first sample.
    pub fn notify_video_start(&mut self, video_start_ts: i64) -> Option<OutputRecord> {
        if self.latency_reported || self.video_start_ts.is_some() {
            return None;
        }
        self.video_start_ts = Some(video_start_ts);
        self.take_latency()
    }

    pub fn snapshot_at(&self, image_timestamp: i64) -> Option<ImuSnapshot> {
        let accel = self.latest_accel?;
        Some(ImuSnapshot {
            image_timestamp,
            imu_timestamp: accel.timestamp,
            acceleration: accel.vector.into(),
            gyro_timestamp: self.latest_gyro.map(|g| g.timestamp),
            angular_velocity: self.latest_gyro.map(|g| g.vector.into()),
            imu_delay: accel.timestamp - image_timestamp,
        })
    }

    fn mark_imu_start(&mut self, timestamp: i64) -> Vec<OutputRecord> {
        if self.imu_start_ts.is_none() {
            self.imu_start_ts = Some(timestamp);
        }
        self.take_latency().into_iter().collect()
    }

    fn take_latency(&mut self) -> Option<OutputRecord> {
        if self.latency_reported {
            return None;
        }
        let record = LatencyRecord {
            video_start_ts: self.video_start_ts?,
            imu_start_ts: self.imu_start_ts?,
        };
        self.latency_reported = true;
        log::info!("Latency: {}", record.latency_nanos());
        Some(OutputRecord::Latency(record))
    }
}
