//! Capture trait definitions
//!
//! Platform-agnostic boundaries for the device API and the media encoder.
//! The embedding host provides implementations (a browser binding, a native
//! backend, or the fakes used in tests).

use super::constraints::CaptureConstraints;
use crate::recorder::channel::ChunkSink;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Class of a capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    #[serde(rename = "videoinput")]
    VideoInput,
    #[serde(rename = "audioinput")]
    AudioInput,
    #[serde(rename = "audiooutput")]
    AudioOutput,
}

/// Information about a capture device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Device class
    pub kind: DeviceKind,

    /// Unique device ID
    pub device_id: String,

    /// Human readable label (empty until permission is granted)
    pub label: String,
}

/// Failures reported by the device API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("device is busy or in use by another application")]
    Busy,

    #[error("requested device not found")]
    NotFound,

    #[error("{0}")]
    Other(String),
}

/// A live capture stream
///
/// Dropping a handle does not release the hardware; `stop_tracks` does.
pub trait MediaStream: Send + Sync {
    /// Stream identifier
    fn id(&self) -> String;

    /// Whether the stream carries a video track
    fn has_video(&self) -> bool;

    /// Whether the stream carries an audio track
    fn has_audio(&self) -> bool;

    /// Stop every track of the stream, releasing the devices
    fn stop_tracks(&self);

    /// Whether any track is still live
    fn is_live(&self) -> bool;
}

/// Device API boundary
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Whether the platform exposes real-time capture at all
    fn is_supported(&self) -> bool;

    /// List the available input and output devices
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError>;

    /// Request a camera/microphone stream
    async fn get_user_media(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Arc<dyn MediaStream>, DeviceError>;

    /// Request a screen-share stream
    async fn get_display_media(&self) -> Result<Arc<dyn MediaStream>, DeviceError>;
}

/// Encoder boundary
pub trait EncoderFactory: Send + Sync {
    /// Whether the platform has a media recorder
    fn is_supported(&self) -> bool;

    /// Capability query for a MIME type
    fn is_type_supported(&self, mime_type: &str) -> bool;

    /// Construct an encoder for `stream`. An empty `mime_type` lets the
    /// platform pick.
    fn create(
        &self,
        stream: Arc<dyn MediaStream>,
        mime_type: &str,
    ) -> Result<Box<dyn MediaEncoder>, String>;
}

/// A single running encoder
pub trait MediaEncoder: Send {
    /// MIME type the encoder actually produces
    fn mime_type(&self) -> String;

    /// Begin emitting chunks into `sink` every `timeslice`
    fn start(&mut self, timeslice: Duration, sink: ChunkSink) -> Result<(), String>;

    /// Request a stop. The receiver resolves once the final chunk has been
    /// delivered to the sink; a dropped sender counts as stopped.
    fn stop(&mut self) -> oneshot::Receiver<()>;
}
