//! Recorder configuration
//!
//! The host passes these props as JSON when embedding the recorder. Required
//! fields are optional at the serde level so validation can name every one
//! that is missing instead of failing on the first.

use crate::capture::constraints::{
    AudioConstraint, CaptureConstraints, VideoConstraint, DEFAULT_FRAME_RATE, DEFAULT_HEIGHT,
    DEFAULT_WIDTH,
};
use crate::upload::types::EntryTemplate;
use crate::utils::error::{RecorderError, RecorderResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

pub const DEFAULT_ENTRY_TAGS: &str = "expressrecorder";
pub const DEFAULT_ENTRY_NAME: &str = "Express Recording";

// =============================================================================
// Video Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoSettings {
    pub frame_rate: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

// =============================================================================
// Recorder Config
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfig {
    /// Base URL of the media service
    pub service_url: Option<String>,

    /// Session credential
    pub ks: Option<String>,

    pub partner_id: Option<u64>,

    pub ui_conf_id: Option<u64>,

    pub entry_name: Option<String>,

    pub entry_tags: String,

    pub conversion_profile_id: Option<u64>,

    pub allow_video: bool,

    pub allow_audio: bool,

    pub allow_screen_share: bool,

    /// Stop recording automatically after this many seconds
    pub max_recording_time_secs: Option<u64>,

    pub video: VideoSettings,

    pub camera_device_id: Option<String>,

    pub microphone_device_id: Option<String>,

    /// Source string to localized string
    pub translations: HashMap<String, String>,

    pub request_timeout_secs: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            service_url: None,
            ks: None,
            partner_id: None,
            ui_conf_id: None,
            entry_name: None,
            entry_tags: DEFAULT_ENTRY_TAGS.to_string(),
            conversion_profile_id: None,
            allow_video: true,
            allow_audio: true,
            allow_screen_share: false,
            max_recording_time_secs: None,
            video: VideoSettings::default(),
            camera_device_id: None,
            microphone_device_id: None,
            translations: HashMap::new(),
            request_timeout_secs: 60,
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

impl RecorderConfig {
    pub fn from_json_str(json: &str) -> RecorderResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> RecorderResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Check required fields and option combinations
    pub fn validate(&self) -> RecorderResult<()> {
        let mut missing = Vec::new();
        if is_blank(&self.service_url) {
            missing.push("serviceUrl");
        }
        if is_blank(&self.ks) {
            missing.push("ks");
        }
        if self.partner_id.is_none() {
            missing.push("partnerId");
        }
        if !missing.is_empty() {
            return Err(RecorderError::Configuration(format!(
                "missing required configuration: {}",
                missing.join(", ")
            )));
        }

        if let Some(service_url) = &self.service_url {
            let url = Url::parse(service_url).map_err(|e| {
                RecorderError::Configuration(format!("invalid serviceUrl '{}': {}", service_url, e))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(RecorderError::Configuration(format!(
                    "serviceUrl must be http or https, got '{}'",
                    url.scheme()
                )));
            }
        }

        if !self.allow_video && !self.allow_audio {
            return Err(RecorderError::Configuration(
                "at least one of allowVideo or allowAudio must be enabled".to_string(),
            ));
        }

        Ok(())
    }

    /// Initial capture request derived from the allowed channels and devices
    pub fn constraints(&self) -> CaptureConstraints {
        let video = if self.allow_video {
            VideoConstraint::Enabled {
                device_id: self.camera_device_id.clone(),
                frame_rate: self.video.frame_rate,
                width: self.video.width,
                height: self.video.height,
            }
        } else {
            VideoConstraint::Disabled
        };
        let audio = if self.allow_audio {
            AudioConstraint::Enabled {
                device_id: self.microphone_device_id.clone(),
            }
        } else {
            AudioConstraint::Disabled
        };
        CaptureConstraints { video, audio }
    }

    pub fn entry_template(&self) -> EntryTemplate {
        EntryTemplate {
            name: self
                .entry_name
                .clone()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ENTRY_NAME.to_string()),
            tags: self.entry_tags.clone(),
            conversion_profile_id: self.conversion_profile_id,
        }
    }

    pub fn max_recording_time(&self) -> Option<Duration> {
        self.max_recording_time_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
