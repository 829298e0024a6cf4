//! In-memory stand-ins for the device API, the encoder and the media service

use crate::capture::constraints::CaptureConstraints;
use crate::capture::traits::{
    DeviceError, DeviceInfo, DeviceKind, EncoderFactory, MediaDevices, MediaEncoder, MediaStream,
};
use crate::events::{EventBus, SessionEvent};
use crate::recorder::channel::ChunkSink;
use crate::upload::service::MediaService;
use crate::upload::types::{CreatedEntry, EntryRequest, ProgressFn, UploadError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

static NEXT_STREAM: AtomicUsize = AtomicUsize::new(1);

/// Record every event emitted on `events`
pub fn collect_events(events: &EventBus) -> Arc<Mutex<Vec<SessionEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    events.add_any_listener(move |event| sink.lock().push(event.clone()));
    seen
}

pub struct FakeStream {
    id: usize,
    video: bool,
    audio: bool,
    live: AtomicBool,
}

impl FakeStream {
    pub fn new(video: bool, audio: bool) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_STREAM.fetch_add(1, Ordering::Relaxed),
            video,
            audio,
            live: AtomicBool::new(true),
        })
    }
}

impl MediaStream for FakeStream {
    fn id(&self) -> String {
        format!("stream-{}", self.id)
    }

    fn has_video(&self) -> bool {
        self.video
    }

    fn has_audio(&self) -> bool {
        self.audio
    }

    fn stop_tracks(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

fn device(kind: DeviceKind, id: &str) -> DeviceInfo {
    DeviceInfo {
        kind,
        device_id: id.to_string(),
        label: id.to_string(),
    }
}

pub struct FakeDevices {
    supported: bool,
    devices: Vec<DeviceInfo>,
    next_error: Mutex<Option<DeviceError>>,
    streams: Mutex<Vec<Arc<FakeStream>>>,
    requests: AtomicUsize,
}

impl Default for FakeDevices {
    fn default() -> Self {
        Self::with_devices(vec![
            device(DeviceKind::VideoInput, "cam-1"),
            device(DeviceKind::AudioInput, "mic-1"),
            device(DeviceKind::AudioOutput, "speaker-1"),
        ])
    }
}

impl FakeDevices {
    pub fn with_devices(devices: Vec<DeviceInfo>) -> Self {
        Self {
            supported: true,
            devices,
            next_error: Mutex::new(None),
            streams: Mutex::new(Vec::new()),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn cameras_only() -> Self {
        Self::with_devices(vec![device(DeviceKind::VideoInput, "cam-1")])
    }

    /// A platform without capture support
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::default()
        }
    }

    pub fn fail_next_request(&self, error: DeviceError) {
        *self.next_error.lock() = Some(error);
    }

    pub fn live_streams(&self) -> usize {
        self.streams.lock().iter().filter(|s| s.is_live()).count()
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn open(&self, video: bool, audio: bool) -> Result<Arc<dyn MediaStream>, DeviceError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.next_error.lock().take() {
            return Err(error);
        }
        let stream = FakeStream::new(video, audio);
        self.streams.lock().push(stream.clone());
        Ok(stream)
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        Ok(self.devices.clone())
    }

    async fn get_user_media(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Arc<dyn MediaStream>, DeviceError> {
        self.open(constraints.has_video(), constraints.has_audio())
    }

    async fn get_display_media(&self) -> Result<Arc<dyn MediaStream>, DeviceError> {
        self.open(true, false)
    }
}

/// Encoder factory; by default supports every MIME type
#[derive(Default)]
pub struct FakeEncoders {
    unavailable: bool,
    supported: Option<Vec<String>>,
    failing: bool,
    hanging: bool,
}

impl FakeEncoders {
    pub fn supporting(types: &[&str]) -> Self {
        Self {
            supported: Some(types.iter().map(|t| t.to_string()).collect()),
            ..Self::default()
        }
    }

    /// Every construction fails
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Encoders never confirm a stop
    pub fn hanging() -> Self {
        Self {
            hanging: true,
            ..Self::default()
        }
    }

    /// No media recorder on this platform
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }
}

impl EncoderFactory for FakeEncoders {
    fn is_supported(&self) -> bool {
        !self.unavailable
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        match &self.supported {
            Some(types) => types.iter().any(|t| t == mime_type),
            None => true,
        }
    }

    fn create(
        &self,
        _stream: Arc<dyn MediaStream>,
        mime_type: &str,
    ) -> Result<Box<dyn MediaEncoder>, String> {
        if self.failing {
            return Err("encoder construction failed".to_string());
        }
        Ok(Box::new(FakeEncoder {
            mime_type: mime_type.to_string(),
            task: None,
            sink: None,
            hanging: self.hanging,
            unconfirmed: None,
        }))
    }
}

/// Bytes emitted per timeslice
const CHUNK_SIZE: usize = 1000;

struct FakeEncoder {
    mime_type: String,
    task: Option<JoinHandle<()>>,
    sink: Option<ChunkSink>,
    hanging: bool,
    unconfirmed: Option<oneshot::Sender<()>>,
}

impl MediaEncoder for FakeEncoder {
    fn mime_type(&self) -> String {
        self.mime_type.clone()
    }

    fn start(&mut self, timeslice: Duration, sink: ChunkSink) -> Result<(), String> {
        let chunks = sink.clone();
        self.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(timeslice);
            loop {
                interval.tick().await;
                chunks.push(Bytes::from(vec![1u8; CHUNK_SIZE]));
            }
        }));
        self.sink = Some(sink);
        Ok(())
    }

    fn stop(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(sink) = self.sink.take() {
            sink.push(Bytes::from(vec![2u8; CHUNK_SIZE]));
        }
        if self.hanging {
            self.unconfirmed = Some(tx);
        } else {
            let _ = tx.send(());
        }
        rx
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    Create(EntryRequest),
    Upload { token_id: String, bytes: usize },
    Delete(String),
}

/// Media service that hands out sequential entry ids
#[derive(Default)]
pub struct FakeService {
    calls: Mutex<Vec<ServiceCall>>,
    deleted: Mutex<Vec<String>>,
    next_entry: AtomicUsize,
    create_time: Duration,
    transfer_time: Duration,
    create_failure: Mutex<Option<UploadError>>,
    transfer_failure: Mutex<Option<String>>,
    deletes_fail: AtomicBool,
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_create_time(mut self, time: Duration) -> Self {
        self.create_time = time;
        self
    }

    /// Transfers report ten progress steps spread over `time`
    pub fn with_transfer_time(mut self, time: Duration) -> Self {
        self.transfer_time = time;
        self
    }

    /// The batch creates an entry and then fails to bind the token
    pub fn fail_create_with_partial_entry(&self, message: &str) {
        *self.create_failure.lock() = Some(UploadError::TokenBind {
            message: message.to_string(),
            entry_id: Some("0_partial".to_string()),
        });
    }

    pub fn fail_create(&self, message: &str) {
        *self.create_failure.lock() = Some(UploadError::EntryCreation {
            message: message.to_string(),
            entry_id: None,
        });
    }

    pub fn fail_transfer(&self, message: &str) {
        *self.transfer_failure.lock() = Some(message.to_string());
    }

    pub fn clear_failures(&self) {
        self.create_failure.lock().take();
        self.transfer_failure.lock().take();
    }

    pub fn fail_deletes(&self) {
        self.deletes_fail.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    pub fn uploads(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, ServiceCall::Upload { .. }))
            .count()
    }
}

#[async_trait]
impl MediaService for FakeService {
    async fn create_entry(&self, request: &EntryRequest) -> Result<CreatedEntry, UploadError> {
        if !self.create_time.is_zero() {
            tokio::time::sleep(self.create_time).await;
        }
        self.calls.lock().push(ServiceCall::Create(request.clone()));
        if let Some(error) = self.create_failure.lock().clone() {
            return Err(error);
        }
        let n = self.next_entry.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CreatedEntry {
            entry_id: format!("0_entry{}", n),
            token_id: format!("token{}", n),
        })
    }

    async fn upload(
        &self,
        token_id: &str,
        data: Bytes,
        _mime_type: &str,
        progress: ProgressFn,
    ) -> Result<(), UploadError> {
        self.calls.lock().push(ServiceCall::Upload {
            token_id: token_id.to_string(),
            bytes: data.len(),
        });
        if let Some(message) = self.transfer_failure.lock().clone() {
            return Err(UploadError::Transfer(message));
        }

        let total = data.len() as u64;
        let steps = 10u64;
        for step in 1..=steps {
            if !self.transfer_time.is_zero() {
                tokio::time::sleep(self.transfer_time / steps as u32).await;
            }
            progress(total * step / steps, total);
        }
        Ok(())
    }

    async fn delete_entry(&self, entry_id: &str) -> Result<(), UploadError> {
        self.calls.lock().push(ServiceCall::Delete(entry_id.to_string()));
        if self.deletes_fail.load(Ordering::SeqCst) {
            return Err(UploadError::Service("delete refused".to_string()));
        }
        self.deleted.lock().push(entry_id.to_string());
        Ok(())
    }
}
