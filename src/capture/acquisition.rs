//! Media acquisition
//!
//! Resolves requested constraints against the devices actually present and
//! owns the live camera/microphone stream and the optional screen-share
//! stream. Acquiring again always stops the previous stream first.

use super::constraints::{AudioConstraint, CaptureConstraints, VideoConstraint};
use super::traits::{DeviceInfo, DeviceKind, MediaDevices, MediaStream};
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::Mutex;
use std::sync::Arc;

/// A stream together with the constraints it was actually opened with
#[derive(Clone)]
pub struct AcquiredStream {
    pub stream: Arc<dyn MediaStream>,
    pub constraints: CaptureConstraints,
}

impl std::fmt::Debug for AcquiredStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquiredStream")
            .field("stream", &self.stream.id())
            .field("constraints", &self.constraints)
            .finish()
    }
}

/// Downgrade every channel that has no matching device class.
///
/// A requested device id that is not present falls back to the default
/// device of that class.
pub fn resolve_constraints(
    requested: &CaptureConstraints,
    devices: &[DeviceInfo],
) -> CaptureConstraints {
    let has = |kind: DeviceKind| devices.iter().any(|d| d.kind == kind);
    let known = |kind: DeviceKind, id: &str| {
        devices.iter().any(|d| d.kind == kind && d.device_id == id)
    };

    let video = match &requested.video {
        VideoConstraint::Enabled {
            device_id,
            frame_rate,
            width,
            height,
        } if has(DeviceKind::VideoInput) => VideoConstraint::Enabled {
            device_id: device_id
                .clone()
                .filter(|id| known(DeviceKind::VideoInput, id)),
            frame_rate: *frame_rate,
            width: *width,
            height: *height,
        },
        VideoConstraint::Enabled { .. } => {
            tracing::warn!("No camera found, disabling video");
            VideoConstraint::Disabled
        }
        VideoConstraint::Disabled => VideoConstraint::Disabled,
    };

    let audio = match &requested.audio {
        AudioConstraint::Enabled { device_id } if has(DeviceKind::AudioInput) => {
            AudioConstraint::Enabled {
                device_id: device_id
                    .clone()
                    .filter(|id| known(DeviceKind::AudioInput, id)),
            }
        }
        AudioConstraint::Enabled { .. } => {
            tracing::warn!("No microphone found, disabling audio");
            AudioConstraint::Disabled
        }
        AudioConstraint::Disabled => AudioConstraint::Disabled,
    };

    CaptureConstraints { video, audio }
}

/// Owner of the live device streams
pub struct MediaAcquisition {
    devices: Arc<dyn MediaDevices>,
    current: Mutex<Option<AcquiredStream>>,
    screen: Mutex<Option<Arc<dyn MediaStream>>>,
}

impl MediaAcquisition {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            current: Mutex::new(None),
            screen: Mutex::new(None),
        }
    }

    /// Whether the platform exposes capture at all
    pub fn is_supported(&self) -> bool {
        self.devices.is_supported()
    }

    /// List the available devices
    pub async fn devices(&self) -> RecorderResult<Vec<DeviceInfo>> {
        Ok(self.devices.enumerate_devices().await?)
    }

    /// Acquire a camera/microphone stream, replacing the current one
    pub async fn acquire(&self, requested: &CaptureConstraints) -> RecorderResult<AcquiredStream> {
        if requested.is_empty() {
            return Err(RecorderError::InvalidConstraints);
        }

        self.release();

        let devices = self.devices.enumerate_devices().await?;
        let constraints = resolve_constraints(requested, &devices);
        if constraints.is_empty() {
            tracing::error!("No capture device matches the requested constraints");
            return Err(RecorderError::NoDeviceAvailable);
        }

        tracing::info!(
            "Acquiring stream: video={}, audio={}",
            constraints.has_video(),
            constraints.has_audio()
        );
        let stream = self.devices.get_user_media(&constraints).await?;
        let acquired = AcquiredStream {
            stream,
            constraints,
        };

        // A concurrent acquire may have finished while this one awaited.
        if let Some(previous) = self.current.lock().replace(acquired.clone()) {
            previous.stream.stop_tracks();
        }

        tracing::debug!("Stream {} acquired", acquired.stream.id());
        Ok(acquired)
    }

    /// The current stream, if it is still live
    pub fn current(&self) -> Option<AcquiredStream> {
        self.current
            .lock()
            .as_ref()
            .filter(|acquired| acquired.stream.is_live())
            .cloned()
    }

    /// Stop and forget the camera/microphone stream
    pub fn release(&self) {
        if let Some(previous) = self.current.lock().take() {
            tracing::debug!("Releasing stream {}", previous.stream.id());
            previous.stream.stop_tracks();
        }
    }

    /// Acquire a screen-share stream, replacing the current one
    pub async fn acquire_display(&self) -> RecorderResult<Arc<dyn MediaStream>> {
        self.release_display();

        let stream = self.devices.get_display_media().await?;
        if let Some(previous) = self.screen.lock().replace(stream.clone()) {
            previous.stop_tracks();
        }

        tracing::info!("Screen share {} acquired", stream.id());
        Ok(stream)
    }

    /// The screen-share stream, if it is still live
    pub fn display(&self) -> Option<Arc<dyn MediaStream>> {
        self.screen
            .lock()
            .as_ref()
            .filter(|stream| stream.is_live())
            .cloned()
    }

    pub fn release_display(&self) {
        if let Some(previous) = self.screen.lock().take() {
            tracing::debug!("Releasing screen share {}", previous.id());
            previous.stop_tracks();
        }
    }

    /// Stop every stream this acquisition owns
    pub fn release_all(&self) {
        self.release();
        self.release_display();
    }
}

impl Drop for MediaAcquisition {
    fn drop(&mut self) {
        self.release_all();
    }
}
