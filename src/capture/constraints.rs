//! Capture constraints
//!
//! Each channel is either disabled or enabled with its own settings, so there
//! is no "true or object" ambiguity to check at runtime.

use serde::{Deserialize, Serialize};

pub const DEFAULT_FRAME_RATE: u32 = 30;
pub const DEFAULT_WIDTH: u32 = 1280;
pub const DEFAULT_HEIGHT: u32 = 720;

/// Video channel request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum VideoConstraint {
    Disabled,
    #[serde(rename_all = "camelCase")]
    Enabled {
        device_id: Option<String>,
        frame_rate: u32,
        width: u32,
        height: u32,
    },
}

impl VideoConstraint {
    /// Default camera with the default 720p/30 settings
    pub fn default_camera() -> Self {
        VideoConstraint::Enabled {
            device_id: None,
            frame_rate: DEFAULT_FRAME_RATE,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, VideoConstraint::Enabled { .. })
    }

    pub fn device_id(&self) -> Option<&str> {
        match self {
            VideoConstraint::Enabled { device_id, .. } => device_id.as_deref(),
            VideoConstraint::Disabled => None,
        }
    }
}

/// Audio channel request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum AudioConstraint {
    Disabled,
    #[serde(rename_all = "camelCase")]
    Enabled { device_id: Option<String> },
}

impl AudioConstraint {
    pub fn default_microphone() -> Self {
        AudioConstraint::Enabled { device_id: None }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, AudioConstraint::Enabled { .. })
    }

    pub fn device_id(&self) -> Option<&str> {
        match self {
            AudioConstraint::Enabled { device_id } => device_id.as_deref(),
            AudioConstraint::Disabled => None,
        }
    }
}

/// What to request from the device API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    pub video: VideoConstraint,
    pub audio: AudioConstraint,
}

impl CaptureConstraints {
    /// Default camera and default microphone
    pub fn camera_and_microphone() -> Self {
        Self {
            video: VideoConstraint::default_camera(),
            audio: AudioConstraint::default_microphone(),
        }
    }

    /// Whether nothing would be captured
    pub fn is_empty(&self) -> bool {
        !self.video.is_enabled() && !self.audio.is_enabled()
    }

    pub fn has_video(&self) -> bool {
        self.video.is_enabled()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_enabled()
    }
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self::camera_and_microphone()
    }
}
