//! Recording channels
//!
//! A channel pairs one encoder with the append-only chunk buffer it writes
//! into. The camera/microphone stream always gets a channel; screen share
//! gets a second, independent one.

use crate::capture::traits::{EncoderFactory, MediaEncoder, MediaStream};
use crate::utils::error::{RecorderError, RecorderResult};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Encoder time slice
pub const TIMESLICE: Duration = Duration::from_millis(10);

/// How long a stop waits for the encoder's final chunk
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Preferred encodings when video is captured, best first.
/// The empty string lets the platform choose.
pub const VIDEO_MIME_TYPES: &[&str] = &[
    "video/webm;codecs=vp9,opus",
    "video/webm;codecs=vp8,opus",
    "video/webm;codecs=h264,opus",
    "video/webm",
    "video/mp4",
    "",
];

/// Preferred encodings for audio-only capture
pub const AUDIO_MIME_TYPES: &[&str] = &[
    "audio/webm;codecs=opus",
    "audio/webm",
    "audio/ogg;codecs=opus",
    "audio/mp4",
    "",
];

/// Pick the first supported MIME type. The empty fallback is never probed.
pub fn select_mime_type(factory: &dyn EncoderFactory, candidates: &[&str]) -> String {
    candidates
        .iter()
        .find(|mime| mime.is_empty() || factory.is_type_supported(mime))
        .map(|mime| mime.to_string())
        .unwrap_or_default()
}

#[derive(Default)]
struct ChunkBuffer {
    chunks: Vec<Bytes>,
    len: usize,
    sealed: bool,
}

/// Append-only destination for encoder output
///
/// Chunks keep their delivery order. Empty payloads are ignored and nothing
/// is accepted once the buffer is sealed.
#[derive(Clone, Default)]
pub struct ChunkSink {
    inner: Arc<Mutex<ChunkBuffer>>,
}

impl ChunkSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk. Returns whether it was kept.
    pub fn push(&self, chunk: Bytes) -> bool {
        if chunk.is_empty() {
            return false;
        }
        let mut buffer = self.inner.lock();
        if buffer.sealed {
            tracing::debug!("Dropping {} byte chunk delivered after stop", chunk.len());
            return false;
        }
        buffer.len += chunk.len();
        buffer.chunks.push(chunk);
        true
    }

    /// Bytes buffered so far
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.inner.lock().chunks.len()
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.lock().sealed
    }

    /// Close the buffer and flatten it into one immutable blob
    pub fn seal(&self) -> Bytes {
        let mut buffer = self.inner.lock();
        buffer.sealed = true;
        let mut blob = BytesMut::with_capacity(buffer.len);
        for chunk in buffer.chunks.drain(..) {
            blob.extend_from_slice(&chunk);
        }
        buffer.len = 0;
        blob.freeze()
    }
}

/// Which capture a channel records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Primary,
    Screen,
}

/// Finalized output of one channel
#[derive(Debug, Clone)]
pub struct ChannelOutput {
    pub kind: ChannelKind,
    pub data: Bytes,
    pub mime_type: String,
}

/// One encoder and its buffer
pub struct RecordingChannel {
    kind: ChannelKind,
    encoder: Box<dyn MediaEncoder>,
    sink: ChunkSink,
    mime_type: String,
}

impl RecordingChannel {
    /// Construct the encoder for `stream` with the best supported encoding
    pub fn open(
        kind: ChannelKind,
        factory: &dyn EncoderFactory,
        stream: Arc<dyn MediaStream>,
        candidates: &[&str],
    ) -> RecorderResult<Self> {
        let requested = select_mime_type(factory, candidates);
        let encoder = factory.create(stream, &requested).map_err(|e| {
            RecorderError::RecorderInit(format!(
                "failed to create {:?} encoder ({}): {}",
                kind,
                if requested.is_empty() { "platform default" } else { requested.as_str() },
                e
            ))
        })?;

        let mime_type = match encoder.mime_type() {
            produced if !produced.is_empty() => produced,
            _ => requested,
        };
        tracing::info!("Opened {:?} channel with encoding '{}'", kind, mime_type);

        Ok(Self {
            kind,
            encoder,
            sink: ChunkSink::new(),
            mime_type,
        })
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Bytes recorded so far
    pub fn recorded_bytes(&self) -> usize {
        self.sink.len()
    }

    pub fn start(&mut self) -> RecorderResult<()> {
        self.encoder
            .start(TIMESLICE, self.sink.clone())
            .map_err(|e| RecorderError::RecorderInit(format!("failed to start encoder: {}", e)))
    }

    /// Stop the encoder and wait for its final chunk
    pub async fn stop(mut self) -> ChannelOutput {
        let stopped = self.encoder.stop();
        // A dropped sender means the encoder is already gone.
        if tokio::time::timeout(STOP_TIMEOUT, stopped).await.is_err() {
            tracing::warn!(
                "{:?} encoder did not confirm stop within {:?}; keeping {} buffered bytes",
                self.kind,
                STOP_TIMEOUT,
                self.sink.len()
            );
        }
        ChannelOutput {
            kind: self.kind,
            data: self.sink.seal(),
            mime_type: self.mime_type,
        }
    }

    /// Stop without waiting; buffered data is discarded
    pub fn abort(mut self) {
        let _ = self.encoder.stop();
        self.sink.seal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeEncoders, FakeStream};

    #[test]
    fn test_sink_keeps_order_and_drops_empty() {
        let sink = ChunkSink::new();
        assert!(sink.push(Bytes::from_static(b"ab")));
        assert!(!sink.push(Bytes::new()));
        assert!(sink.push(Bytes::from_static(b"cd")));
        assert_eq!(sink.chunk_count(), 2);
        assert_eq!(sink.len(), 4);

        assert_eq!(&sink.seal()[..], b"abcd");
        assert!(!sink.push(Bytes::from_static(b"late")));
        assert!(sink.is_sealed());
    }

    #[test]
    fn test_first_supported_mime_wins() {
        let factory = FakeEncoders::supporting(&["video/webm", "video/mp4"]);
        assert_eq!(select_mime_type(&factory, VIDEO_MIME_TYPES), "video/webm");
    }

    #[test]
    fn test_empty_mime_is_final_fallback() {
        let factory = FakeEncoders::supporting(&[]);
        assert_eq!(select_mime_type(&factory, AUDIO_MIME_TYPES), "");
    }

    #[test]
    fn test_encoder_construction_failure() {
        let factory = FakeEncoders::failing();
        let err = RecordingChannel::open(
            ChannelKind::Primary,
            &factory,
            FakeStream::new(true, true),
            VIDEO_MIME_TYPES,
        )
        .err()
        .unwrap();
        assert!(matches!(err, RecorderError::RecorderInit(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_collects_chunks_until_stop() {
        let factory = FakeEncoders::default();
        let mut channel = RecordingChannel::open(
            ChannelKind::Primary,
            &factory,
            FakeStream::new(true, true),
            VIDEO_MIME_TYPES,
        )
        .unwrap();
        channel.start().unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let output = channel.stop().await;

        assert_eq!(output.kind, ChannelKind::Primary);
        assert!(!output.data.is_empty());
        assert_eq!(output.mime_type, "video/webm;codecs=vp9,opus");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_gives_up_on_silent_encoder() {
        let factory = FakeEncoders::hanging();
        let mut channel = RecordingChannel::open(
            ChannelKind::Screen,
            &factory,
            FakeStream::new(true, false),
            VIDEO_MIME_TYPES,
        )
        .unwrap();
        channel.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = tokio::time::Instant::now();
        let output = channel.stop().await;

        assert!(started.elapsed() >= STOP_TIMEOUT);
        assert_eq!(output.kind, ChannelKind::Screen);
        assert!(!output.data.is_empty());
    }
}
