//! Recording system module
//!
//! This module implements the capture side of a session:
//! - RecordingChannel pairing an encoder with its chunk buffer
//! - Countdown before capture begins
//! - CaptureSession driving the session state machine

pub mod channel;
pub mod coordinator;
pub mod countdown;
pub mod state;

pub use channel::{ChannelKind, ChunkSink, RecordingChannel};
pub use coordinator::CaptureSession;
pub use state::{PlaybackSource, RecordingResult, SessionState};
