use serde::{Deserialize, Serialize};

use crate::types::{seconds_between, Quat, Vec3};
use crate::vector_math::{
    axis_angle_vector, euler_degrees, quaternion_pose, quaternion_to_matrix, rotate_by_quaternion,
    rotation_matrix,
};

/// How device-frame accelerations are rotated into the world frame.
/// Chosen once per session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlignmentMethod {
    /// AHRS quaternion driven by gyroscope rate with accelerometer feedback
    #[default]
    Quaternion,
    /// Rotation derived from the latest gravity-sensor reading
    Gravity,
}

/// Orientation state, mutated on every gyro/accel/gravity sample
#[derive(Clone, Debug)]
pub struct OrientationState {
    pub quaternion: Quat,
    pub last_gyro_ts: Option<i64>,
    pub last_accel_ts: Option<i64>,
    pub angular_velocity: Vec3,
    pub gravity_estimate: Vec3,
    /// Diagnostic roll/pitch/yaw (degrees) accumulated from gyro deltas
    pub turned_angle: Vec3,
}

impl Default for OrientationState {
    fn default() -> Self {
        Self {
            quaternion: Quat::identity(),
            last_gyro_ts: None,
            last_accel_ts: None,
            angular_velocity: Vec3::zeros(),
            gravity_estimate: Vec3::zeros(),
            turned_angle: Vec3::zeros(),
        }
    }
}

pub struct OrientationEstimator {
    method: AlignmentMethod,
    world_gravity: Vec3,
    state: OrientationState,
}

impl OrientationEstimator {
    pub fn new(method: AlignmentMethod, world_gravity: Vec3) -> Self {
        Self {
            method,
            world_gravity,
            state: OrientationState::default(),
        }
    }

    pub fn method(&self) -> AlignmentMethod {
        self.method
    }

    pub fn world_gravity(&self) -> Vec3 {
        self.world_gravity
    }

    pub fn state(&self) -> &OrientationState {
        &self.state
    }

    pub fn turned_angle(&self) -> Vec3 {
        self.state.turned_angle
    }

    pub fn on_gravity(&mut self, gravity: Vec3) {
        self.state.gravity_estimate = gravity;
    }

    /// Stores the new rate and accumulates the turned angle over the gap
    /// since the previous gyro sample. The turned angle never feeds position.
    pub fn on_gyroscope(&mut self, timestamp: i64, angular_velocity: Vec3) {
        if let Some(last_ts) = self.state.last_gyro_ts {
            let dt = seconds_between(last_ts, timestamp);
            let delta = axis_angle_vector(&angular_velocity, dt);
            self.state.turned_angle += euler_degrees(&quaternion_to_matrix(&delta));
        }
        self.state.angular_velocity = angular_velocity;
        self.state.last_gyro_ts = Some(timestamp);
    }

    /// Gravity-removed, world-frame acceleration for a raw accelerometer sample.
    ///
    /// `gravity` overrides the cached gravity-sensor reading when given.
    pub fn align(&mut self, timestamp: i64, accel: Vec3, gravity: Option<Vec3>) -> Vec3 {
        if let Some(g) = gravity {
            self.state.gravity_estimate = g;
        }
        // First sample has no predecessor to integrate the pose over
        let dt = self
            .state
            .last_accel_ts
            .map(|last| seconds_between(last, timestamp))
            .unwrap_or(0.0);
        self.state.last_accel_ts = Some(timestamp);

        let rotated = match self.method {
            AlignmentMethod::Quaternion => {
                self.state.quaternion = quaternion_pose(
                    &self.state.quaternion,
                    &accel,
                    &self.state.angular_velocity,
                    dt,
                );
                rotate_by_quaternion(&self.state.quaternion, &accel)
            }
            // Until the gravity sensor reports, the device frame is taken as the world frame
            AlignmentMethod::Gravity if self.state.gravity_estimate == Vec3::zeros() => accel,
            AlignmentMethod::Gravity => {
                rotation_matrix(&self.state.gravity_estimate, &self.world_gravity) * accel
            }
        };

        rotated - self.world_gravity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const G: f64 = 9.81;

    #[test]
    fn test_gravity_alignment_level_device() {
        let mut est = OrientationEstimator::new(AlignmentMethod::Gravity, Vec3::new(0.0, 0.0, G));
        est.on_gravity(Vec3::new(0.0, 0.0, G));
        let aligned = est.align(0, Vec3::new(0.0, 0.0, G), None);
        assert_abs_diff_eq!(aligned, Vec3::zeros(), epsilon = 1e-9);
    }

    #[test]
    fn test_gravity_alignment_rotated_device() {
        let mut est = OrientationEstimator::new(AlignmentMethod::Gravity, Vec3::new(0.0, 0.0, G));
        // Device on its side, pushed along its own z axis by 1 m/s²
        let gravity = Vec3::new(0.0, G, 0.0);
        let aligned = est.align(0, Vec3::new(0.0, G, 1.0), Some(gravity));
        assert_abs_diff_eq!(aligned.z, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(aligned.norm(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_quaternion_alignment_level_device() {
        let mut est = OrientationEstimator::new(AlignmentMethod::Quaternion, Vec3::new(0.0, 0.0, G));
        for i in 0..50 {
            let aligned = est.align(i * 20_000_000, Vec3::new(0.0, 0.0, G), None);
            assert_abs_diff_eq!(aligned, Vec3::zeros(), epsilon = 1e-9);
        }
        assert_abs_diff_eq!(est.state().quaternion.norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_first_gyro_sample_only_seeds() {
        let mut est = OrientationEstimator::new(AlignmentMethod::Quaternion, Vec3::new(0.0, 0.0, G));
        est.on_gyroscope(1_000, Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(est.turned_angle(), Vec3::zeros());
        assert_eq!(est.state().last_gyro_ts, Some(1_000));
    }

    #[test]
    fn test_turned_angle_accumulates_yaw() {
        let mut est = OrientationEstimator::new(AlignmentMethod::Quaternion, Vec3::new(0.0, 0.0, G));
        let rate = Vec3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2);
        // π/2 rad/s held for one second, in 100 steps
        for i in 0..=100 {
            est.on_gyroscope(i * 10_000_000, rate);
        }
        assert_abs_diff_eq!(est.turned_angle().z, 90.0, epsilon = 1e-6);
        assert_abs_diff_eq!(est.turned_angle().x, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_method_deserializes_lowercase() {
        let method: AlignmentMethod = serde_json::from_str("\"gravity\"").unwrap();
        assert_eq!(method, AlignmentMethod::Gravity);
    }
}
