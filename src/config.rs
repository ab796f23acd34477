use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};
use crate::orientation::AlignmentMethod;
use crate::types::STANDARD_GRAVITY;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Floorplan metres per pixel of the reference map, used until a calibration
/// fetch supplies the server's value
pub const DEFAULT_FLOORPLAN_SCALE: f64 = 0.01209306372;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    // ── Inertial path ──
    pub world_gravity: [f64; 3],
    pub alignment: AlignmentMethod,
    pub integration_interval_nanos: i64,

    // ── Fusion ──
    pub floorplan_scale: f64,

    // ── Localization link ──
    pub server: ServerConfig,
    pub image: ImageConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            world_gravity: [0.0, 0.0, STANDARD_GRAVITY],
            alignment: AlignmentMethod::Quaternion,
            integration_interval_nanos: 20_000_000,
            floorplan_scale: DEFAULT_FLOORPLAN_SCALE,
            server: ServerConfig::default(),
            image: ImageConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    /// Read/write timeout on the socket; `None` blocks indefinitely
    pub io_timeout_ms: Option<u64>,
    /// Upper bound on any length-prefixed frame the server may send
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 30004,
            connect_timeout_ms: 5_000,
            io_timeout_ms: None,
            max_frame_bytes: 64 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Re-encode images before sending; when false the bytes go out as given
    pub resize: bool,
    /// Cap on the longer image side, in pixels
    pub max_dimension: u32,
    pub jpeg_quality: u8,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            resize: true,
            max_dimension: 640,
            jpeg_quality: 100,
        }
    }
}

impl TrackerConfig {
    /// Load a JSON config file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TrackerError::InvalidConfig(format!("{}: {}", path.display(), e))
        })?;
        let config: TrackerConfig = serde_json::from_str(&contents)
            .map_err(|e| TrackerError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.integration_interval_nanos <= 0 {
            return Err(TrackerError::InvalidConfig(
                "integration_interval_nanos must be positive".to_string(),
            ));
        }
        if !(self.floorplan_scale.is_finite() && self.floorplan_scale > 0.0) {
            return Err(TrackerError::InvalidConfig(
                "floorplan_scale must be a positive number".to_string(),
            ));
        }
        if self.world_gravity.iter().all(|c| *c == 0.0) {
            return Err(TrackerError::InvalidConfig(
                "world_gravity must be non-zero".to_string(),
            ));
        }
        if self.image.max_dimension == 0 {
            return Err(TrackerError::InvalidConfig(
                "image.max_dimension must be non-zero".to_string(),
            ));
        }
        if !(1..=100).contains(&self.image.jpeg_quality) {
            return Err(TrackerError::InvalidConfig(
                "image.jpeg_quality must be within 1..=100".to_string(),
            ));
        }
        if self.server.connect_timeout_ms == 0 || self.server.io_timeout_ms == Some(0) {
            return Err(TrackerError::InvalidConfig(
                "server timeouts must be non-zero".to_string(),
            ));
        }
        if self.server.max_frame_bytes == 0 {
            return Err(TrackerError::InvalidConfig(
                "server.max_frame_bytes must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TrackerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.integration_interval_nanos, 20_000_000);
        assert_eq!(config.server.address(), "127.0.0.1:30004");
        assert_eq!(config.server.io_timeout(), None);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{ "alignment": "gravity", "server": { "host": "10.0.0.2", "io_timeout_ms": 2500 } }"#;
        let config: TrackerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.alignment, AlignmentMethod::Gravity);
        assert_eq!(config.server.host, "10.0.0.2");
        assert_eq!(config.server.port, 30004);
        assert_eq!(config.server.io_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.image.max_dimension, 640);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = TrackerConfig::default();
        config.integration_interval_nanos = 0;
        assert!(matches!(config.validate(), Err(TrackerError::InvalidConfig(_))));

        let mut config = TrackerConfig::default();
        config.world_gravity = [0.0; 3];
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::default();
        config.image.jpeg_quality = 0;
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::default();
        config.floorplan_scale = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = TrackerConfig::load(Path::new("/nonexistent/tracker.json")).unwrap_err();
        assert!(matches!(err, TrackerError::InvalidConfig(_)));
    }
}
