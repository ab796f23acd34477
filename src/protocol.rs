//! Localization server wire protocol.
//!
//! # Wire Protocol
//!
//! ```text
//! Localize   → │ i32 opcode=1 │ i32 len │ len JPEG bytes │
//!            ← │ i32 len │ len UTF-8 bytes ("None" = no match) │
//!
//! Calibrate  → │ i32 opcode=2 │
//!            ← │ i32 len │ len image bytes │ f64 scale │ i32 side │ side² f64 (row-major) │
//!
//! Terminate  → │ i32 opcode=0 │   (no reply, stream closed)
//! ```
//!
//! Integers are 4-byte and floats 8-byte, both big-endian. Every read loops
//! until the declared length has arrived.

use std::io::{Read, Write};

use crate::error::{Result, TrackerError};
use crate::pose::LocalizationReply;
use crate::types::Mat3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum Opcode {
    Terminate = 0,
    Localize = 1,
    Calibrate = 2,
}

/// Reference data returned by a calibration fetch
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationData {
    pub floorplan_image: Vec<u8>,
    pub floorplan_scale: f64,
    pub transform: Mat3,
}

pub fn write_localization_request<W: Write>(writer: &mut W, jpeg: &[u8]) -> Result<()> {
    let len = frame_len(jpeg.len())?;
    write_i32(writer, Opcode::Localize as i32)?;
    write_i32(writer, len)?;
    writer.write_all(jpeg)?;
    writer.flush()?;
    Ok(())
}

pub fn read_pose_reply<R: Read>(reader: &mut R, max_frame_bytes: usize) -> Result<LocalizationReply> {
    let payload = read_frame(reader, max_frame_bytes)?;
    let text = String::from_utf8(payload)
        .map_err(|e| TrackerError::Protocol(format!("pose reply is not UTF-8: {}", e)))?;
    Ok(LocalizationReply::from_text(text))
}

pub fn write_calibration_request<W: Write>(writer: &mut W) -> Result<()> {
    write_i32(writer, Opcode::Calibrate as i32)?;
    writer.flush()?;
    Ok(())
}

pub fn read_calibration_reply<R: Read>(reader: &mut R, max_frame_bytes: usize) -> Result<CalibrationData> {
    let floorplan_image = read_frame(reader, max_frame_bytes)?;
    let floorplan_scale = read_f64(reader)?;
    let side = read_i32(reader)?;

    let mut transform = Mat3::identity();
    match side {
        2 | 3 => {
            let side = side as usize;
            for row in 0..side {
                for col in 0..side {
                    transform[(row, col)] = read_f64(reader)?;
                }
            }
        }
        other => {
            return Err(TrackerError::Protocol(format!(
                "unsupported calibration matrix side {}",
                other
            )))
        }
    }

    Ok(CalibrationData {
        floorplan_image,
        floorplan_scale,
        transform,
    })
}

pub fn write_termination<W: Write>(writer: &mut W) -> Result<()> {
    write_i32(writer, Opcode::Terminate as i32)?;
    writer.flush()?;
    Ok(())
}

/// Length-prefixed payload, bounded by `max_frame_bytes`
fn read_frame<R: Read>(reader: &mut R, max_frame_bytes: usize) -> Result<Vec<u8>> {
    let len = read_i32(reader)?;
    if len < 0 {
        return Err(TrackerError::Protocol(format!("negative frame length {}", len)));
    }
    let len = len as usize;
    if len > max_frame_bytes {
        return Err(TrackerError::Protocol(format!(
            "frame of {} bytes exceeds limit of {}",
            len, max_frame_bytes
        )));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

fn frame_len(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| TrackerError::Protocol(format!("payload of {} bytes is too large", len)))
}

fn write_i32<W: Write>(writer: &mut W, value: i32) -> Result<()> {
    writer.write_all(&value.to_be_bytes())?;
    Ok(())
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

fn read_f64<R: Read>(reader: &mut R) -> Result<f64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(f64::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const LIMIT: usize = 1 << 20;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as i32).to_be_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_localization_request_layout() {
        let mut out = Vec::new();
        write_localization_request(&mut out, &[0xFF, 0xD8, 0xFF]).unwrap();
        assert_eq!(out, vec![0, 0, 0, 1, 0, 0, 0, 3, 0xFF, 0xD8, 0xFF]);
    }

    #[test]
    fn test_opcode_only_requests() {
        let mut out = Vec::new();
        write_calibration_request(&mut out).unwrap();
        write_termination(&mut out).unwrap();
        assert_eq!(out, vec![0, 0, 0, 2, 0, 0, 0, 0]);
    }

    #[test]
    fn test_pose_reply() {
        let mut input = Cursor::new(frame(b"[1.5, 2.5]"));
        assert_eq!(
            read_pose_reply(&mut input, LIMIT).unwrap(),
            LocalizationReply::Matched("[1.5, 2.5]".to_string())
        );

        let mut input = Cursor::new(frame(b"None"));
        assert_eq!(read_pose_reply(&mut input, LIMIT).unwrap(), LocalizationReply::NoMatch);
    }

    #[test]
    fn test_truncated_reply_is_transport_error() {
        let mut bytes = frame(b"[1.5, 2.5]");
        bytes.truncate(7);
        let err = read_pose_reply(&mut Cursor::new(bytes), LIMIT).unwrap_err();
        assert!(matches!(err, TrackerError::Transport(_)));
    }

    #[test]
    fn test_frame_limits() {
        let err = read_pose_reply(&mut Cursor::new((-4i32).to_be_bytes().to_vec()), LIMIT).unwrap_err();
        assert!(matches!(err, TrackerError::Protocol(_)));

        let err = read_pose_reply(&mut Cursor::new(frame(&[b'x'; 64])), 16).unwrap_err();
        assert!(matches!(err, TrackerError::Protocol(_)));

        let err = read_pose_reply(&mut Cursor::new(frame(&[0xC3, 0x28])), LIMIT).unwrap_err();
        assert!(matches!(err, TrackerError::Protocol(_)));
    }

    fn calibration_bytes(side: i32, values: &[f64]) -> Vec<u8> {
        let mut bytes = frame(b"PNG");
        bytes.extend_from_slice(&0.05f64.to_be_bytes());
        bytes.extend_from_slice(&side.to_be_bytes());
        for v in values {
            bytes.extend_from_slice(&v.to_be_bytes());
        }
        bytes
    }

    #[test]
    fn test_calibration_reply_three_by_three() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let data = read_calibration_reply(&mut Cursor::new(calibration_bytes(3, &values)), LIMIT).unwrap();
        assert_eq!(data.floorplan_image, b"PNG".to_vec());
        assert_eq!(data.floorplan_scale, 0.05);
        assert_eq!(data.transform, Mat3::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0));
    }

    #[test]
    fn test_calibration_reply_two_by_two_is_embedded() {
        let data =
            read_calibration_reply(&mut Cursor::new(calibration_bytes(2, &[0.0, -1.0, 1.0, 0.0])), LIMIT).unwrap();
        assert_eq!(data.transform, Mat3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn test_calibration_reply_bad_side() {
        let err = read_calibration_reply(&mut Cursor::new(calibration_bytes(4, &[0.0; 16])), LIMIT).unwrap_err();
        assert!(matches!(err, TrackerError::Protocol(_)));
    }
}
