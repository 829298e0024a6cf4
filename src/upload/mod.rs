//! Upload to the media service
//!
//! This module handles:
//! - The media service boundary and its HTTP client
//! - Entry creation, byte transfer and cleanup of failed attempts
//! - Aggregated upload progress and cancellation

pub mod http;
pub mod pipeline;
pub mod service;
pub mod types;

pub use http::HttpMediaService;
pub use pipeline::UploadPipeline;
pub use service::MediaService;
pub use types::{CancelFlag, EntryTemplate, MediaType, ProgressFn, UploadError, UploadSession};
