//! Batched trapezoidal double integration of world-frame accelerations.
//!
//! Accelerations are appended on every sample; velocities and positions only
//! catch up once the integration interval has elapsed, after which the batch
//! is emitted as position records and the sequences collapse to a single
//! carry-over entry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{seconds_between, TimedVector, Vec3};

/// One emitted position estimate, in the inertial world frame (metres)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub timestamp: i64,
    pub position: [f64; 3],
}

impl PositionRecord {
    pub fn vector(&self) -> Vec3 {
        Vec3::from(self.position)
    }
}

impl fmt::Display for PositionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x, y, z] = self.position;
        write!(f, "{} position [{:?}, {:?}, {:?}]", self.timestamp, x, y, z)
    }
}

/// Accelerations, velocities and positions as parallel timestamped sequences
#[derive(Clone, Debug, Default)]
pub struct KinematicSequence {
    pub accelerations: Vec<TimedVector>,
    pub velocities: Vec<TimedVector>,
    pub positions: Vec<TimedVector>,
}

impl KinematicSequence {
    /// Panics unless all three sequences have equal length and identical
    /// timestamps index by index.
    pub fn assert_aligned(&self) {
        assert_eq!(
            self.accelerations.len(),
            self.velocities.len(),
            "acceleration/velocity length mismatch"
        );
        assert_eq!(
            self.accelerations.len(),
            self.positions.len(),
            "acceleration/position length mismatch"
        );
        for ((a, v), p) in self
            .accelerations
            .iter()
            .zip(&self.velocities)
            .zip(&self.positions)
        {
            assert!(
                a.timestamp == v.timestamp && a.timestamp == p.timestamp,
                "kinematic timestamps diverge at {} / {} / {}",
                a.timestamp,
                v.timestamp,
                p.timestamp
            );
        }
    }

    pub fn len(&self) -> usize {
        self.accelerations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accelerations.is_empty()
    }
}

pub struct InertialIntegrator {
    interval_nanos: i64,
    sequence: KinematicSequence,
    last_integration_ts: Option<i64>,
}

impl InertialIntegrator {
    pub fn new(interval_nanos: i64) -> Self {
        Self {
            interval_nanos,
            sequence: KinematicSequence::default(),
            last_integration_ts: None,
        }
    }

    pub fn sequence(&self) -> &KinematicSequence {
        &self.sequence
    }

    /// Most recent integrated velocity
    pub fn velocity(&self) -> Option<Vec3> {
        self.sequence.velocities.last().map(|v| v.vector)
    }

    /// Most recent integrated position
    pub fn position(&self) -> Option<Vec3> {
        self.sequence.positions.last().map(|p| p.vector)
    }

    /// Appends an aligned acceleration; returns the position batch when the
    /// integration interval has been crossed, otherwise an empty batch.
    pub fn on_accelerometer(&mut self, timestamp: i64, aligned_accel: Vec3) -> Vec<PositionRecord> {
        self.sequence
            .accelerations
            .push(TimedVector::new(timestamp, aligned_accel));

        if self.sequence.velocities.is_empty() {
            self.sequence.velocities.push(TimedVector::zero(timestamp));
            self.sequence.positions.push(TimedVector::zero(timestamp));
        }

        let last_ts = *self.last_integration_ts.get_or_insert(timestamp);
        if timestamp - last_ts > self.interval_nanos {
            self.double_integration();
            self.last_integration_ts = Some(timestamp);
            return self.emit_and_truncate();
        }
        Vec::new()
    }

    /// Brings velocities, then positions, level with the accelerations.
    pub fn double_integration(&mut self) {
        let seq = &mut self.sequence;
        let accels = &seq.accelerations;

        for i in seq.velocities.len().max(1)..accels.len() {
            let dt = seconds_between(accels[i - 1].timestamp, accels[i].timestamp);
            let prev = seq.velocities[i - 1].vector;
            let velocity = prev + dt * (accels[i - 1].vector + accels[i].vector) / 2.0;
            seq.velocities.push(TimedVector::new(accels[i].timestamp, velocity));
        }

        // Constant jerk between samples: Δp = dt²(a₁ + 2a₀)/6 + dt·v₀
        for i in seq.positions.len().max(1)..accels.len() {
            let dt = seconds_between(accels[i - 1].timestamp, accels[i].timestamp);
            let prev = seq.positions[i - 1].vector;
            let position = prev
                + dt * dt * (accels[i].vector + 2.0 * accels[i - 1].vector) / 6.0
                + dt * seq.velocities[i - 1].vector;
            seq.positions.push(TimedVector::new(accels[i].timestamp, position));
        }
    }

    /// Emits every position except the newest, which becomes the carry-over
    /// seed of all three sequences.
    pub fn emit_and_truncate(&mut self) -> Vec<PositionRecord> {
        let seq = &mut self.sequence;
        seq.assert_aligned();

        let (Some(accel), Some(velocity), Some(position)) = (
            seq.accelerations.pop(),
            seq.velocities.pop(),
            seq.positions.pop(),
        ) else {
            return Vec::new();
        };

        let records = seq
            .positions
            .iter()
            .map(|p| PositionRecord {
                timestamp: p.timestamp,
                position: p.vector.into(),
            })
            .collect();

        seq.accelerations.clear();
        seq.velocities.clear();
        seq.positions.clear();
        seq.accelerations.push(accel);
        seq.velocities.push(velocity);
        seq.positions.push(position);

        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const INTERVAL: i64 = 20_000_000;

    #[test]
    fn test_record_format() {
        let record = PositionRecord { timestamp: 1234, position: [1.0, -0.5, 2.25e-3] };
        assert_eq!(record.to_string(), "1234 position [1.0, -0.5, 0.00225]");
    }

    #[test]
    fn test_first_sample_seeds_zero_state() {
        let mut integrator = InertialIntegrator::new(INTERVAL);
        let out = integrator.on_accelerometer(5, Vec3::new(1.0, 0.0, 0.0));
        assert!(out.is_empty());
        assert_eq!(integrator.sequence().len(), 1);
        assert_eq!(integrator.velocity(), Some(Vec3::zeros()));
        assert_eq!(integrator.position(), Some(Vec3::zeros()));
    }

    #[test]
    fn test_truncate_leaves_single_carry_over() {
        let mut integrator = InertialIntegrator::new(INTERVAL);
        let mut batches = 0;
        for i in 0..40 {
            let out = integrator.on_accelerometer(i * 5_000_000, Vec3::new(0.1, 0.2, 0.0));
            if !out.is_empty() {
                batches += 1;
                let seq = integrator.sequence();
                assert_eq!(seq.accelerations.len(), 1);
                assert_eq!(seq.velocities.len(), 1);
                assert_eq!(seq.positions.len(), 1);
                assert_eq!(seq.accelerations[0].timestamp, seq.positions[0].timestamp);
                assert_eq!(seq.velocities[0].timestamp, i * 5_000_000);
            }
        }
        assert!(batches > 0);
    }

    #[test]
    fn test_every_position_emitted_once() {
        let mut integrator = InertialIntegrator::new(INTERVAL);
        let mut emitted = Vec::new();
        for i in 0..100 {
            emitted.extend(integrator.on_accelerometer(i * 4_000_000, Vec3::new(0.0, 1.0, 0.0)));
        }
        let timestamps: Vec<i64> = emitted.iter().map(|r| r.timestamp).collect();
        let mut deduped = timestamps.clone();
        deduped.dedup();
        assert_eq!(timestamps, deduped);
        assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(timestamps[0], 0);
    }

    #[test]
    fn test_constant_acceleration_matches_closed_form() {
        let accel = Vec3::new(0.5, -0.25, 0.1);
        let dt_ns = 10_000_000;
        let n = 200;
        let mut integrator = InertialIntegrator::new(INTERVAL);
        for i in 0..=n {
            integrator.on_accelerometer(i * dt_ns, accel);
        }
        integrator.double_integration();

        let t = (n * dt_ns) as f64 / 1e9;
        let dt = dt_ns as f64 / 1e9;
        let expected = 0.5 * accel * t * t;
        let position = integrator.position().unwrap();
        assert_abs_diff_eq!(position, expected, epsilon = 10.0 * dt * dt);
        assert_abs_diff_eq!(integrator.velocity().unwrap(), accel * t, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_acceleration_stays_put() {
        let mut integrator = InertialIntegrator::new(INTERVAL);
        integrator.on_accelerometer(0, Vec3::zeros());
        let out = integrator.on_accelerometer(1_000_000_000, Vec3::zeros());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp, 0);
        assert_eq!(out[0].vector(), Vec3::zeros());
        assert_eq!(integrator.position(), Some(Vec3::zeros()));
    }

    #[test]
    #[should_panic(expected = "length mismatch")]
    fn test_misaligned_sequences_panic() {
        let mut integrator = InertialIntegrator::new(INTERVAL);
        integrator.on_accelerometer(0, Vec3::zeros());
        integrator.on_accelerometer(1_000, Vec3::zeros());
        // Velocities have not caught up with the second acceleration
        integrator.emit_and_truncate();
    }

    #[test]
    #[should_panic(expected = "timestamps diverge")]
    fn test_diverging_timestamps_panic() {
        let seq = KinematicSequence {
            accelerations: vec![TimedVector::zero(0), TimedVector::zero(20)],
            velocities: vec![TimedVector::zero(0), TimedVector::zero(20)],
            positions: vec![TimedVector::zero(0), TimedVector::zero(25)],
        };
        seq.assert_aligned();
    }
}
