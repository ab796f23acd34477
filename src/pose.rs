//! Pose replies from the localization server.
//!
//! A reply is free text carrying one bracketed, comma-separated list of
//! numbers, e.g. `pose: [1.0, 2.0]`. Two values are a planar position, six
//! are a position plus an axis-angle rotation.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};
use crate::types::{Vec2, Vec3};

/// Literal the server sends when an image could not be matched
pub const NO_MATCH: &str = "None";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocalizationReply {
    Matched(String),
    NoMatch,
}

impl LocalizationReply {
    pub fn from_text(text: String) -> Self {
        if text.trim() == NO_MATCH {
            LocalizationReply::NoMatch
        } else {
            LocalizationReply::Matched(text)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Pose {
    Planar {
        x: f64,
        y: f64,
    },
    SixDof {
        x: f64,
        y: f64,
        z: f64,
        rx: f64,
        ry: f64,
        rz: f64,
    },
}

impl Pose {
    /// Floorplan coordinate of the pose
    pub fn planar(&self) -> Vec2 {
        match *self {
            Pose::Planar { x, y } | Pose::SixDof { x, y, .. } => Vec2::new(x, y),
        }
    }

    /// Axis-angle rotation, only present on 6DOF poses
    pub fn rotation(&self) -> Option<Vec3> {
        match *self {
            Pose::Planar { .. } => None,
            Pose::SixDof { rx, ry, rz, .. } => Some(Vec3::new(rx, ry, rz)),
        }
    }

    pub fn values(&self) -> Vec<f64> {
        match *self {
            Pose::Planar { x, y } => vec![x, y],
            Pose::SixDof { x, y, z, rx, ry, rz } => vec![x, y, z, rx, ry, rz],
        }
    }
}

/// Parses the first `[...]` list in `text` into a pose.
pub fn parse_pose(text: &str) -> Result<Pose> {
    let open = text
        .find('[')
        .ok_or_else(|| TrackerError::PoseParse(format!("no '[' in {:?}", text)))?;
    let close = text[open..]
        .find(']')
        .map(|i| open + i)
        .ok_or_else(|| TrackerError::PoseParse(format!("unterminated list in {:?}", text)))?;

    let values = text[open + 1..close]
        .split(',')
        .map(|field| {
            let field = field.trim();
            match field.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(v),
                _ => Err(TrackerError::PoseParse(format!("bad number {:?}", field))),
            }
        })
        .collect::<Result<Vec<f64>>>()?;

    match values.as_slice() {
        &[x, y] => Ok(Pose::Planar { x, y }),
        &[x, y, z, rx, ry, rz] => Ok(Pose::SixDof { x, y, z, rx, ry, rz }),
        other => Err(TrackerError::PoseParse(format!(
            "expected 2 or 6 values, got {}",
            other.len()
        ))),
    }
}
