use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::client::{FusionUpdate, LocalizationClient, SubmitOutcome};
use crate::config::TrackerConfig;
use crate::error::{lock_poisoned, Result, TrackerError};
use crate::fuser::FloorplanTrajectory;
use crate::imu_session::{ImuSession, ImuSnapshot, OutputRecord};
use crate::pose::LocalizationReply;
use crate::protocol::CalibrationData;
use crate::types::{SensorKind, SensorSample};

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Created, sensors not yet accepted
    Idle,
    /// Integrating samples and localizing images
    Recording,
    /// Ended; the localization link is closed
    Stopped,
}

/// Session metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub start_time: String,
    pub state: SessionState,
    pub accel_sample_count: u32,
    pub gyro_sample_count: u32,
    pub gravity_sample_count: u32,
    pub position_record_count: u32,
    pub image_count: u32,
    pub images_dispatched: u32,
    pub images_dropped: u32,
    pub images_localized: u32,
    pub images_unmatched: u32,
    pub localization_errors: u32,
}

impl SessionMetadata {
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Push-based tracking session.
///
/// Sensor samples and images may arrive from different threads. The sensor
/// path only touches the IMU state; the image path takes the buffered
/// positions and hands them to the localization client.
pub struct TrackingSession {
    config: TrackerConfig,
    metadata: Mutex<SessionMetadata>,
    imu: Mutex<ImuSession>,
    client: Mutex<Option<LocalizationClient>>,
}

impl TrackingSession {
    /// Create new session in Idle state
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;

        let metadata = SessionMetadata {
            session_id: format!("session_{}", Utc::now().timestamp_millis()),
            start_time: Utc::now().to_rfc3339(),
            state: SessionState::Idle,
            accel_sample_count: 0,
            gyro_sample_count: 0,
            gravity_sample_count: 0,
            position_record_count: 0,
            image_count: 0,
            images_dispatched: 0,
            images_dropped: 0,
            images_localized: 0,
            images_unmatched: 0,
            localization_errors: 0,
        };

        Ok(TrackingSession {
            imu: Mutex::new(ImuSession::new(&config)),
            config,
            metadata: Mutex::new(metadata),
            client: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Transition to Recording (Idle → Recording). Without a client the
    /// session dead-reckons only.
    pub fn start(&self, client: Option<LocalizationClient>) -> Result<()> {
        let mut meta = self.lock_metadata()?;
        match meta.state {
            SessionState::Idle => {
                *self.lock_client()? = client;
                meta.state = SessionState::Recording;
                log::info!("Session {} recording", meta.session_id);
                Ok(())
            }
            SessionState::Recording => Err(TrackerError::InvalidState(
                "Already recording".to_string(),
            )),
            SessionState::Stopped => Err(TrackerError::InvalidState(
                "Session already stopped".to_string(),
            )),
        }
    }

    /// Transition to Stopped (Recording → Stopped). Shuts the client down and
    /// returns the fused trajectory, if there was a client.
    pub fn stop(&self) -> Result<Option<FloorplanTrajectory>> {
        let mut meta = self.lock_metadata()?;
        match meta.state {
            SessionState::Recording => {
                meta.state = SessionState::Stopped;
                log::info!(
                    "Session {} stopped: {} positions, {} images ({} localized)",
                    meta.session_id,
                    meta.position_record_count,
                    meta.image_count,
                    meta.images_localized
                );
                drop(meta);

                let Some(mut client) = self.lock_client()?.take() else {
                    return Ok(None);
                };
                // The trajectory is complete once the worker has drained its queue
                let shutdown = client.shutdown();
                let trajectory = client.trajectory()?;
                shutdown?;
                Ok(Some(trajectory))
            }
            SessionState::Idle => Err(TrackerError::InvalidState("Not recording".to_string())),
            SessionState::Stopped => Err(TrackerError::InvalidState(
                "Session already stopped".to_string(),
            )),
        }
    }

    pub fn state(&self) -> Result<SessionState> {
        Ok(self.lock_metadata()?.state)
    }

    pub fn is_recording(&self) -> Result<bool> {
        Ok(self.state()? == SessionState::Recording)
    }

    /// Feed one sensor sample; ignored unless recording
    pub fn push_sample(&self, sample: &SensorSample) -> Result<Vec<OutputRecord>> {
        if !self.is_recording()? {
            return Ok(Vec::new());
        }

        let records = self.lock_imu()?.on_sample(sample);

        let mut meta = self.lock_metadata()?;
        match sample.kind {
            SensorKind::Accelerometer => meta.accel_sample_count += 1,
            SensorKind::Gyroscope => meta.gyro_sample_count += 1,
            SensorKind::Gravity => meta.gravity_sample_count += 1,
        }
        meta.position_record_count += records
            .iter()
            .filter(|r| matches!(r, OutputRecord::Position(_)))
            .count() as u32;

        Ok(records)
    }

    /// Camera start time, for the latency annotation
    pub fn notify_video_start(&self, video_start_ts: i64) -> Result<Option<OutputRecord>> {
        Ok(self.lock_imu()?.notify_video_start(video_start_ts))
    }

    /// Submit a camera frame. Returns `None` when not recording or when the
    /// session has no localization client.
    pub fn on_image(&self, image_timestamp: i64, jpeg: Vec<u8>) -> Result<Option<SubmitOutcome>> {
        if !self.is_recording()? {
            return Ok(None);
        }
        self.lock_metadata()?.image_count += 1;

        let mut client = self.lock_client()?;
        let Some(client) = client.as_mut() else {
            return Ok(None);
        };
        let deltas = self.lock_imu()?.take_positions();
        let result = client.submit_image(image_timestamp, jpeg, deltas);

        let mut meta = self.lock_metadata()?;
        match &result {
            Ok(SubmitOutcome::Dispatched) => meta.images_dispatched += 1,
            Ok(SubmitOutcome::Dropped) => meta.images_dropped += 1,
            Ok(SubmitOutcome::Completed { reply, .. }) => {
                meta.images_dispatched += 1;
                match reply {
                    LocalizationReply::Matched(_) => meta.images_localized += 1,
                    LocalizationReply::NoMatch => meta.images_unmatched += 1,
                }
            }
            Err(e) => {
                meta.localization_errors += 1;
                log::warn!("Image {} not processed: {}", image_timestamp, e);
            }
        }
        result.map(Some)
    }

    pub fn fetch_calibration(&self) -> Result<CalibrationData> {
        let mut client = self.lock_client()?;
        match client.as_mut() {
            Some(client) => client.fetch_calibration(),
            None => Err(TrackerError::InvalidState(
                "Session has no localization client".to_string(),
            )),
        }
    }

    /// Fusion updates produced since the last call, oldest first
    pub fn drain_updates(&self) -> Result<Vec<FusionUpdate>> {
        match self.lock_client()?.as_ref() {
            Some(client) => Ok(client.updates().try_iter().collect()),
            None => Ok(Vec::new()),
        }
    }

    pub fn snapshot_at(&self, image_timestamp: i64) -> Result<Option<ImuSnapshot>> {
        Ok(self.lock_imu()?.snapshot_at(image_timestamp))
    }

    /// Trajectory fused so far; `None` without a client
    pub fn trajectory(&self) -> Result<Option<FloorplanTrajectory>> {
        match self.lock_client()?.as_ref() {
            Some(client) => client.trajectory().map(Some),
            None => Ok(None),
        }
    }

    /// Get metadata snapshot
    pub fn metadata(&self) -> Result<SessionMetadata> {
        Ok(self.lock_metadata()?.clone())
    }

    fn lock_metadata(&self) -> Result<MutexGuard<'_, SessionMetadata>> {
        self.metadata.lock().map_err(|_| lock_poisoned("metadata"))
    }

    fn lock_imu(&self) -> Result<MutexGuard<'_, ImuSession>> {
        self.imu.lock().map_err(|_| lock_poisoned("imu"))
    }

    fn lock_client(&self) -> Result<MutexGuard<'_, Option<LocalizationClient>>> {
        self.client.lock().map_err(|_| lock_poisoned("client"))
    }
}
