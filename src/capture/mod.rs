//! Device capture
//!
//! This module resolves capture constraints and owns the live streams.

pub mod acquisition;
pub mod constraints;
pub mod traits;

pub use acquisition::{AcquiredStream, MediaAcquisition};
pub use constraints::{AudioConstraint, CaptureConstraints, VideoConstraint};
pub use traits::{
    DeviceError, DeviceInfo, DeviceKind, EncoderFactory, MediaDevices, MediaEncoder, MediaStream,
};
