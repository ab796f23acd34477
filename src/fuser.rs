//! Fusion of dead-reckoned positions with visual poses.
//!
//! Inertial positions are buffered as they are emitted. When a pose arrives
//! for an image, every buffered position older than the image is turned into
//! a floorplan polyline starting at the previous pose, and the queue keeps the
//! rest for the next cycle.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::pose::Pose;
use crate::transform::WorldTransform;
use crate::types::{Vec2, Vec3};

/// Floorplan-frame output of one fusion cycle
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrajectorySegment {
    pub image_timestamp: i64,
    /// Dead-reckoned path from the previous pose; empty when the trajectory restarts
    pub polyline: Vec<[f64; 2]>,
    /// The new pose itself
    pub marker: [f64; 2],
    /// Marker of the pose this segment continues from
    pub previous_marker: Option<[f64; 2]>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FloorplanTrajectory {
    pub segments: Vec<TrajectorySegment>,
    pub last_pose: Option<Pose>,
}

impl FloorplanTrajectory {
    /// Every polyline point in order, across segments
    pub fn points(&self) -> impl Iterator<Item = &[f64; 2]> {
        self.segments.iter().flat_map(|s| s.polyline.iter())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Default)]
pub struct TrajectoryFuser {
    buffered: VecDeque<(i64, Vec3)>,
    last_pose: Option<Pose>,
    trajectory: FloorplanTrajectory,
}

impl TrajectoryFuser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_deltas<I>(&mut self, deltas: I)
    where
        I: IntoIterator<Item = (i64, Vec3)>,
    {
        self.buffered.extend(deltas);
    }

    pub fn buffered(&self) -> &VecDeque<(i64, Vec3)> {
        &self.buffered
    }

    pub fn last_pose(&self) -> Option<&Pose> {
        self.last_pose.as_ref()
    }

    pub fn trajectory(&self) -> &FloorplanTrajectory {
        &self.trajectory
    }

    /// Next successful pose starts an unconnected segment
    pub fn invalidate_reference(&mut self) {
        self.last_pose = None;
        self.trajectory.last_pose = None;
    }

    /// Consumes buffered positions strictly older than `image_timestamp`.
    ///
    /// The newest consumed position stays at the front of the queue as the
    /// origin of the next cycle's first displacement.
    pub fn consume_up_to(
        &mut self,
        image_timestamp: i64,
        pose: &Pose,
        transform: &WorldTransform,
    ) -> TrajectorySegment {
        let origin = self.last_pose.map(|p| p.planar());
        let mut polyline: Vec<Vec2> = Vec::new();

        let mut index = 1;
        while index < self.buffered.len() && self.buffered[index].0 < image_timestamp {
            if let Some(origin) = origin {
                let last = *polyline.last().unwrap_or(&origin);
                if polyline.is_empty() {
                    polyline.push(origin);
                }
                let displacement = self.buffered[index].1 - self.buffered[index - 1].1;
                polyline.push(last + transform.to_floorplan(&displacement));
            }
            index += 1;
        }
        self.buffered.drain(..index - 1);

        let segment = TrajectorySegment {
            image_timestamp,
            polyline: polyline.iter().map(|p| [p.x, p.y]).collect(),
            marker: pose.planar().into(),
            previous_marker: origin.map(Into::into),
        };
        log::debug!(
            "Fused {} positions up to {} ({} still buffered)",
            segment.polyline.len().saturating_sub(1),
            image_timestamp,
            self.buffered.len()
        );

        self.last_pose = Some(*pose);
        self.trajectory.last_pose = Some(*pose);
        self.trajectory.segments.push(segment.clone());
        segment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn planar(x: f64, y: f64) -> Pose {
        Pose::Planar { x, y }
    }

    fn walk_east(fuser: &mut TrajectoryFuser, from_ts: i64, count: i64) {
        fuser.append_deltas((0..count).map(|i| {
            let ts = from_ts + i * 10;
            (ts, Vec3::new(ts as f64 / 10.0, 0.0, 0.0))
        }));
    }

    #[test]
    fn test_first_pose_has_no_polyline() {
        let mut fuser = TrajectoryFuser::new();
        walk_east(&mut fuser, 0, 5);
        let segment = fuser.consume_up_to(25, &planar(100.0, 50.0), &WorldTransform::identity(1.0));
        assert!(segment.polyline.is_empty());
        assert_eq!(segment.marker, [100.0, 50.0]);
        assert_eq!(segment.previous_marker, None);
        // Entries at 20, 30, 40 remain, the one at 20 as the anchor
        let remaining: Vec<i64> = fuser.buffered().iter().map(|(ts, _)| *ts).collect();
        assert_eq!(remaining, vec![20, 30, 40]);
    }

    #[test]
    fn test_polyline_starts_at_previous_pose() {
        let mut fuser = TrajectoryFuser::new();
        let transform = WorldTransform::identity(0.5);
        walk_east(&mut fuser, 0, 3);
        fuser.consume_up_to(5, &planar(10.0, 10.0), &transform);

        walk_east(&mut fuser, 30, 3);
        let segment = fuser.consume_up_to(45, &planar(30.0, 10.0), &transform);
        // Anchor at 0, then 10, 20, 30, 40: four displacements of 1 m = 2 px each
        assert_eq!(segment.polyline.len(), 5);
        assert_eq!(segment.polyline[0], [10.0, 10.0]);
        assert_abs_diff_eq!(segment.polyline[4][0], 18.0, epsilon = 1e-12);
        assert_eq!(segment.previous_marker, Some([10.0, 10.0]));

        let remaining: Vec<i64> = fuser.buffered().iter().map(|(ts, _)| *ts).collect();
        assert_eq!(remaining, vec![40, 50]);
    }

    #[test]
    fn test_entries_at_image_timestamp_are_retained() {
        let mut fuser = TrajectoryFuser::new();
        fuser.consume_up_to(0, &planar(0.0, 0.0), &WorldTransform::identity(1.0));
        walk_east(&mut fuser, 0, 4);
        let segment = fuser.consume_up_to(20, &planar(2.0, 0.0), &WorldTransform::identity(1.0));
        assert_eq!(segment.polyline, vec![[0.0, 0.0], [1.0, 0.0]]);
        let remaining: Vec<i64> = fuser.buffered().iter().map(|(ts, _)| *ts).collect();
        assert_eq!(remaining, vec![10, 20, 30]);
    }

    #[test]
    fn test_invalidation_restarts_polyline() {
        let mut fuser = TrajectoryFuser::new();
        let transform = WorldTransform::identity(1.0);
        walk_east(&mut fuser, 0, 3);
        fuser.consume_up_to(15, &planar(0.0, 0.0), &transform);

        fuser.invalidate_reference();
        walk_east(&mut fuser, 30, 3);
        let segment = fuser.consume_up_to(100, &planar(50.0, 50.0), &transform);
        assert!(segment.polyline.is_empty());
        assert_eq!(segment.previous_marker, None);
        assert_eq!(fuser.buffered().len(), 1);

        assert_eq!(fuser.trajectory().segments.len(), 2);
        assert_eq!(fuser.trajectory().last_pose, Some(planar(50.0, 50.0)));
        assert_eq!(fuser.trajectory().points().count(), 0);
    }

    #[test]
    fn test_rotation_applied_to_displacements() {
        let mut fuser = TrajectoryFuser::new();
        fuser.consume_up_to(0, &planar(0.0, 0.0), &WorldTransform::identity(1.0));
        walk_east(&mut fuser, 0, 2);
        let quarter_turn = WorldTransform::new(
            nalgebra::Rotation3::from_axis_angle(&Vec3::z_axis(), std::f64::consts::FRAC_PI_2).into_inner(),
            1.0,
        );
        let segment = fuser.consume_up_to(100, &planar(0.0, 1.0), &quarter_turn);
        assert_abs_diff_eq!(segment.polyline[1][0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(segment.polyline[1][1], 1.0, epsilon = 1e-12);
    }
}
