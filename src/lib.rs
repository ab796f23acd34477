//! Inertial-visual position tracking.
//!
//! Accelerometer, gyroscope and gravity samples are aligned into the world
//! frame and double-integrated into a dead-reckoned trajectory, which is
//! periodically re-anchored by poses from a remote image-localization server.

pub mod client;
pub mod config;
pub mod error;
pub mod fuser;
pub mod image_prep;
pub mod imu_session;
pub mod integrator;
pub mod orientation;
pub mod pose;
pub mod protocol;
pub mod recording;
pub mod replay;
#[cfg(feature = "rerun")]
pub mod rerun_logger;
pub mod session;
pub mod transform;
pub mod types;
pub mod vector_math;

pub use client::{DeltaSink, FusionUpdate, LocalizationClient, SubmitOutcome};
pub use config::{ImageConfig, ServerConfig, TrackerConfig};
pub use error::{Result, TrackerError};
pub use fuser::{FloorplanTrajectory, TrajectoryFuser, TrajectorySegment};
pub use imu_session::{ImuSession, ImuSnapshot, LatencyRecord, OutputRecord};
pub use integrator::{InertialIntegrator, PositionRecord};
pub use orientation::{AlignmentMethod, OrientationEstimator};
pub use pose::{parse_pose, LocalizationReply, Pose};
pub use session::{SessionMetadata, SessionState, TrackingSession};
pub use transform::WorldTransform;
pub use types::{SensorKind, SensorSample};
