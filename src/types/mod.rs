pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

/// Physical sensor a sample came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Accelerometer,
    Gyroscope,
    Gravity,
}

/// One reading pushed by the external sensor source
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    /// Monotonic nanoseconds
    pub timestamp: i64,
    pub kind: SensorKind,
    pub values: [f64; 3],
}

impl SensorSample {
    pub fn new(timestamp: i64, kind: SensorKind, values: [f64; 3]) -> Self {
        Self { timestamp, kind, values }
    }

    pub fn vector(&self) -> Vec3 {
        Vec3::from(self.values)
    }
}

/// A timestamped 3-vector; one entry of a kinematic sequence
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimedVector {
    pub timestamp: i64,
    pub vector: Vec3,
}

impl TimedVector {
    pub fn new(timestamp: i64, vector: Vec3) -> Self {
        Self { timestamp, vector }
    }

    pub fn zero(timestamp: i64) -> Self {
        Self { timestamp, vector: Vec3::zeros() }
    }
}
