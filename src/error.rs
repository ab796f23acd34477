use thiserror::Error;

/// Tracker error types
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Pose cannot be parsed: {0}")]
    PoseParse(String),

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Localization session failed: {0}")]
    SessionFailed(String),

    #[error("Localization worker is no longer running")]
    WorkerUnavailable,

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Replay error: {0}")]
    Replay(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<image::ImageError> for TrackerError {
    fn from(e: image::ImageError) -> Self {
        TrackerError::Image(e.to_string())
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(e: serde_json::Error) -> Self {
        TrackerError::Replay(e.to_string())
    }
}

impl TrackerError {
    /// Whether the error ends the localization session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TrackerError::Transport(_)
                | TrackerError::Protocol(_)
                | TrackerError::SessionFailed(_)
                | TrackerError::WorkerUnavailable
        )
    }
}

/// Result type for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Error for a poisoned mutex, named after the guarded state
pub(crate) fn lock_poisoned(what: &str) -> TrackerError {
    TrackerError::Internal(format!("Failed to acquire {} lock", what))
}
