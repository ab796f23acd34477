//! Stateless vector and rotation helpers for orientation alignment.
//!
//! The only special value is the zero vector: normalizing it returns it
//! unchanged instead of dividing by zero.

use crate::types::{Mat3, Quat, Vec3};

/// Below this cross-product magnitude two gravity vectors count as collinear.
const COLLINEAR_EPSILON: f64 = 1e-12;

pub fn magnitude(v: &Vec3) -> f64 {
    (v.x * v.x + v.y * v.y + v.z * v.z).sqrt()
}

/// Unit vector along `v`; the zero vector maps to itself.
pub fn normalize(v: &Vec3) -> Vec3 {
    let mag = magnitude(v);
    if mag != 0.0 {
        v / mag
    } else {
        *v
    }
}

pub fn cross(a: &Vec3, b: &Vec3) -> Vec3 {
    Vec3::new(
        a.y * b.z - a.z * b.y,
        a.z * b.x - a.x * b.z,
        a.x * b.y - a.y * b.x,
    )
}

/// Rotation taking device-frame vectors into the world frame, derived from the
/// gravity vector measured by the device and the known world gravity.
///
/// Builds the Rodrigues matrix for the angle between the two vectors about
/// their common normal and returns its transpose. Collinear inputs pointing
/// the same way yield the identity; anti-parallel inputs have no unique
/// normal, so a half turn about an arbitrary axis orthogonal to world gravity
/// is used.
pub fn rotation_matrix(measured_gravity: &Vec3, world_gravity: &Vec3) -> Mat3 {
    let norm_gravity = normalize(measured_gravity);
    let norm_world = normalize(world_gravity);

    let cross_product = cross(&norm_world, &norm_gravity);
    let sin_a = magnitude(&cross_product);
    let cos_a = norm_world.dot(&norm_gravity);

    if sin_a <= COLLINEAR_EPSILON && cos_a < 0.0 {
        let axis = orthogonal_unit(&norm_world);
        return 2.0 * axis * axis.transpose() - Mat3::identity();
    }

    let axis = normalize(&cross_product);
    let one_minus_cos = 1.0 - cos_a;
    let (x, y, z) = (axis.x, axis.y, axis.z);

    let rodrigues = Mat3::new(
        x * x * one_minus_cos + cos_a,
        y * x * one_minus_cos - sin_a * z,
        z * x * one_minus_cos + sin_a * y,
        x * y * one_minus_cos + sin_a * z,
        y * y * one_minus_cos + cos_a,
        z * y * one_minus_cos - sin_a * x,
        x * z * one_minus_cos - sin_a * y,
        y * z * one_minus_cos + sin_a * x,
        z * z * one_minus_cos + cos_a,
    );

    rodrigues.transpose()
}

/// Small-angle delta rotation for a gyro reading held over `dt` seconds,
/// as the quaternion `(cos(θ/2), sin(θ/2)·axis)` with `θ = |ω|·dt`.
pub fn axis_angle_vector(angular_velocity: &Vec3, dt: f64) -> Quat {
    let omega_magnitude = magnitude(angular_velocity);
    let axis = normalize(angular_velocity);

    let theta_over_two = omega_magnitude * dt / 2.0;
    let (sin_half, cos_half) = theta_over_two.sin_cos();

    Quat::from_parts(cos_half, axis * sin_half)
}

/// One AHRS step: corrects the gyro rate with the cross-product error between
/// the gravity direction implied by `last_pose` and the measured acceleration,
/// integrates `q + ½·q⊗ω·dt` and renormalizes.
pub fn quaternion_pose(last_pose: &Quat, accel: &Vec3, angular_velocity: &Vec3, dt: f64) -> Quat {
    let norm_accel = normalize(accel);
    let (q0, q1, q2, q3) = (last_pose.w, last_pose.i, last_pose.j, last_pose.k);

    // Gravity direction as seen from the current pose estimate
    let estimated_gravity = Vec3::new(
        2.0 * (q1 * q3 - q0 * q2),
        2.0 * (q0 * q1 + q2 * q3),
        q0 * q0 - q1 * q1 - q2 * q2 + q3 * q3,
    );

    let error = cross(&norm_accel, &estimated_gravity);
    let corrected_rate = angular_velocity + error;

    let rate_of_change = last_pose * Quat::from_imag(corrected_rate) * 0.5;
    let next = last_pose + rate_of_change * dt;

    let norm = next.norm();
    if norm != 0.0 {
        next / norm
    } else {
        *last_pose
    }
}

/// Vector part of the sandwich product `q·v·q⁻¹`.
pub fn rotate_by_quaternion(q: &Quat, v: &Vec3) -> Vec3 {
    (q * Quat::from_imag(*v) * q.conjugate()).imag()
}

/// Rotation matrix of a (not necessarily normalized) quaternion.
pub fn quaternion_to_matrix(q: &Quat) -> Mat3 {
    let norm = q.norm();
    if norm == 0.0 {
        return Mat3::identity();
    }
    let q = *q / norm;
    let (w, x, y, z) = (q.w, q.i, q.j, q.k);
    Mat3::new(
        1.0 - 2.0 * (y * y + z * z),
        2.0 * (x * y - w * z),
        2.0 * (x * z + w * y),
        2.0 * (x * y + w * z),
        1.0 - 2.0 * (x * x + z * z),
        2.0 * (y * z - w * x),
        2.0 * (x * z - w * y),
        2.0 * (y * z + w * x),
        1.0 - 2.0 * (x * x + y * y),
    )
}

/// Roll, pitch and yaw in degrees recovered from a rotation matrix.
pub fn euler_degrees(m: &Mat3) -> Vec3 {
    let roll = m[(2, 1)].atan2(m[(2, 2)]);
    let pitch = (-m[(2, 0)]).atan2(m[(2, 1)].hypot(m[(2, 2)]));
    let yaw = m[(1, 0)].atan2(m[(0, 0)]);
    Vec3::new(roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees())
}

fn orthogonal_unit(v: &Vec3) -> Vec3 {
    let (ax, ay, az) = (v.x.abs(), v.y.abs(), v.z.abs());
    let basis = if ax <= ay && ax <= az {
        Vec3::x()
    } else if ay <= az {
        Vec3::y()
    } else {
        Vec3::z()
    };
    normalize(&cross(v, &basis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_normalize_unit_length() {
        for v in [
            Vec3::new(3.0, 4.0, 0.0),
            Vec3::new(-1e-4, 2e-4, 7e-5),
            Vec3::new(1e6, -3e5, 2.5e5),
        ] {
            assert_abs_diff_eq!(magnitude(&normalize(&v)), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_normalize_zero_is_noop() {
        assert_eq!(normalize(&Vec3::zeros()), Vec3::zeros());
    }

    #[test]
    fn test_cross_matches_nalgebra() {
        let a = Vec3::new(1.0, -2.0, 0.5);
        let b = Vec3::new(0.3, 4.0, -1.0);
        assert_abs_diff_eq!(cross(&a, &b), a.cross(&b), epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_matrix_aligned_is_identity() {
        for g in [Vec3::new(0.0, 0.0, 9.81), Vec3::new(1.0, 2.0, 3.0), Vec3::new(-0.2, 9.7, 0.4)] {
            assert_abs_diff_eq!(rotation_matrix(&g, &g), Mat3::identity(), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_rotation_matrix_maps_measured_onto_world() {
        let world = Vec3::new(0.0, 0.0, 9.81);
        // Device lying on its side: gravity shows up on the y axis
        let measured = Vec3::new(0.0, 9.81, 0.0);
        let rot = rotation_matrix(&measured, &world);
        assert_abs_diff_eq!(rot * measured, world, epsilon = 1e-9);

        let tilted = Vec3::new(1.2, -3.4, 8.9);
        let rot = rotation_matrix(&tilted, &world);
        assert_abs_diff_eq!(rot * normalize(&tilted), normalize(&world), epsilon = 1e-9);
        assert_abs_diff_eq!(rot.determinant(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rotation_matrix_anti_parallel_is_proper_rotation() {
        let world = Vec3::new(0.0, 0.0, 9.81);
        let measured = Vec3::new(0.0, 0.0, -9.81);
        let rot = rotation_matrix(&measured, &world);
        assert_abs_diff_eq!(rot.determinant(), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(rot * measured, world, epsilon = 1e-9);
    }

    #[test]
    fn test_axis_angle_vector() {
        let omega = Vec3::new(0.0, 0.0, std::f64::consts::PI);
        let q = axis_angle_vector(&omega, 1.0);
        // Half turn about z
        assert_abs_diff_eq!(q.w, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(q.k, 1.0, epsilon = 1e-12);

        let still = axis_angle_vector(&Vec3::zeros(), 0.02);
        assert_eq!(still, Quat::identity());
    }

    #[test]
    fn test_quaternion_pose_stays_unit() {
        let mut pose = Quat::identity();
        let accel = Vec3::new(0.3, -0.1, 9.7);
        let omega = Vec3::new(0.4, -0.2, 1.1);
        for _ in 0..500 {
            pose = quaternion_pose(&pose, &accel, &omega, 0.01);
            assert_abs_diff_eq!(pose.norm(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_quaternion_pose_level_and_still() {
        let pose = quaternion_pose(&Quat::identity(), &Vec3::new(0.0, 0.0, 9.81), &Vec3::zeros(), 0.02);
        assert_abs_diff_eq!(pose, Quat::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_rotate_by_quaternion_matches_matrix() {
        let q = axis_angle_vector(&Vec3::new(0.3, 0.8, -0.5), 0.7);
        let v = Vec3::new(1.0, 2.0, 3.0);
        assert_abs_diff_eq!(rotate_by_quaternion(&q, &v), quaternion_to_matrix(&q) * v, epsilon = 1e-9);
    }

    #[test]
    fn test_euler_degrees_yaw() {
        let q = axis_angle_vector(&Vec3::new(0.0, 0.0, 1.0), std::f64::consts::FRAC_PI_2);
        let angles = euler_degrees(&quaternion_to_matrix(&q));
        assert_abs_diff_eq!(angles, Vec3::new(0.0, 0.0, 90.0), epsilon = 1e-9);
    }
}
