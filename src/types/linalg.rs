//! Linear algebra aliases for the tracker
//!
//! All inertial math runs in f64 on nalgebra's statically sized types.

use nalgebra::{Matrix3, Quaternion, Vector2, Vector3};

pub type Vec2 = Vector2<f64>;
pub type Vec3 = Vector3<f64>;
pub type Mat3 = Matrix3<f64>;
pub type Quat = Quaternion<f64>;

/// Nanoseconds per second, for converting sensor timestamp gaps
pub const NANOS_PER_SEC: f64 = 1e9;

/// Standard gravity (m/s²), the default world gravity magnitude
pub const STANDARD_GRAVITY: f64 = 9.80665;

/// Seconds between two monotonic nanosecond timestamps
pub fn seconds_between(earlier_ns: i64, later_ns: i64) -> f64 {
    (later_ns - earlier_ns) as f64 / NANOS_PER_SEC
}
