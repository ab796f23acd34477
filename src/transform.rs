use nalgebra::Rotation3;
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_FLOORPLAN_SCALE;
use crate::types::{Mat3, Vec2, Vec3};

/// Maps inertial displacements onto floorplan pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldTransform {
    pub rotation: Mat3,
    /// World metres per floorplan pixel
    pub floorplan_scale: f64,
}

impl Default for WorldTransform {
    fn default() -> Self {
        Self::identity(DEFAULT_FLOORPLAN_SCALE)
    }
}

impl WorldTransform {
    pub fn new(rotation: Mat3, floorplan_scale: f64) -> Self {
        Self { rotation, floorplan_scale }
    }

    pub fn identity(floorplan_scale: f64) -> Self {
        Self::new(Mat3::identity(), floorplan_scale)
    }

    /// Rotation of a 6DOF pose, given as an axis-angle vector, with the image
    /// frame's y axis flipped into the floorplan's: `F·R·F`, `F = diag(1, -1, 1)`.
    pub fn from_pose_rotation(axis_angle: &Vec3, floorplan_scale: f64) -> Self {
        let rotation = Rotation3::from_scaled_axis(*axis_angle).into_inner();
        let flip = Mat3::from_diagonal(&Vec3::new(1.0, -1.0, 1.0));
        Self::new(flip * rotation * flip, floorplan_scale)
    }

    /// Replaces the rotation, keeping the current scale
    pub fn recompute(&mut self, axis_angle: &Vec3) {
        *self = Self::from_pose_rotation(axis_angle, self.floorplan_scale);
    }

    /// Floorplan offset, in pixels, of an inertial displacement in metres
    pub fn to_floorplan(&self, displacement: &Vec3) -> Vec2 {
        let world = self.rotation * displacement;
        Vec2::new(world.x, world.y) / self.floorplan_scale
    }
}
