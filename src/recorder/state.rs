//! Recording state management
//!
//! Defines the session state machine and the finished recording.

use crate::utils::error::ErrorKind;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Current state of a recording session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum SessionState {
    /// Preview only, nothing captured
    Idle,
    /// Counting down before capture begins
    CountingDown { remaining: u32 },
    /// Encoders are running
    Recording,
    /// A finished recording is available for playback
    Reviewing,
    /// The recording is being sent to the media service
    Uploading,
    /// Something failed; see `kind`
    Error { kind: ErrorKind, message: String },
    /// Torn down, nothing else can happen
    Destroyed,
}

impl SessionState {
    /// Recording or uploading; leaving the page would lose work
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SessionState::Recording | SessionState::Uploading)
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(self, SessionState::Destroyed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::CountingDown { .. } => "counting down",
            SessionState::Recording => "recording",
            SessionState::Reviewing => "reviewing",
            SessionState::Uploading => "uploading",
            SessionState::Error { .. } => "in error",
            SessionState::Destroyed => "destroyed",
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A completed recording
///
/// Created once when recording stops and never modified afterwards.
#[derive(Debug, Clone)]
pub struct RecordingResult {
    /// Identifies this recording in logs and saved copies
    pub id: Uuid,

    /// Camera/microphone capture
    pub primary: Bytes,

    /// Encoding of `primary`
    pub primary_mime_type: String,

    /// Screen-share capture, if screen share was active
    pub screen: Option<Bytes>,

    /// Encoding of `screen`
    pub screen_mime_type: Option<String>,

    /// Whether the primary capture contains video
    pub has_video: bool,

    /// Wall-clock time from start to stop
    pub duration_ms: u64,

    /// When recording started
    pub started_at: DateTime<Utc>,
}

impl RecordingResult {
    /// Bytes across every capture
    pub fn total_bytes(&self) -> u64 {
        self.primary.len() as u64 + self.screen.as_ref().map_or(0, |s| s.len() as u64)
    }

    pub fn playback(&self) -> PlaybackSource {
        PlaybackSource {
            data: self.primary.clone(),
            mime_type: self.primary_mime_type.clone(),
        }
    }

    pub fn screen_playback(&self) -> Option<PlaybackSource> {
        self.screen.as_ref().map(|data| PlaybackSource {
            data: data.clone(),
            mime_type: self.screen_mime_type.clone().unwrap_or_default(),
        })
    }
}

/// What a player needs to preview a recording
#[derive(Debug, Clone)]
pub struct PlaybackSource {
    pub data: Bytes,
    pub mime_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_states() {
        assert!(SessionState::Recording.is_in_flight());
        assert!(SessionState::Uploading.is_in_flight());
        assert!(!SessionState::Reviewing.is_in_flight());
        assert!(!SessionState::CountingDown { remaining: 2 }.is_in_flight());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_value(SessionState::Error {
            kind: ErrorKind::Transfer,
            message: "connection reset".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["kind"], "transfer");

        let json = serde_json::to_value(SessionState::CountingDown { remaining: 2 }).unwrap();
        assert_eq!(json["type"], "countingDown");
        assert_eq!(json["remaining"], 2);
    }
}
