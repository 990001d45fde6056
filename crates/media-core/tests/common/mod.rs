//! Shared fixtures for media-core integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use callcore_media_core::description::StreamDescription;
use callcore_media_core::endpoint::{LocalTrack, RemoteAudioSink, RemoteVideoSink};
use callcore_media_core::io::{FrameSink, FrameSource, MediaSourceFactory};
use callcore_media_core::transport::{ConnectionChangeCallback, NetworkInterface};
use callcore_media_core::{Device, FrameData, Result};

/// Route test logs through the test writer; `RUST_LOG` selects the level
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `cond` until it holds or `timeout` elapses
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Source producing `limit` frames (or endless), each filled with its index
pub struct PatternSource {
    next: AtomicUsize,
    limit: Option<usize>,
}

impl PatternSource {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            next: AtomicUsize::new(0),
            limit,
        }
    }
}

impl FrameSource for PatternSource {
    fn read(&self, size: usize) -> Result<Option<Bytes>> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        if self.limit.map_or(false, |limit| n >= limit) {
            return Ok(None);
        }
        Ok(Some(Bytes::from(vec![(n % 256) as u8; size])))
    }
}

#[derive(Default)]
pub struct CollectSink {
    pub frames: Mutex<Vec<Bytes>>,
}

impl FrameSink for CollectSink {
    fn write(&self, data: &[u8]) -> Result<()> {
        self.frames.lock().push(Bytes::copy_from_slice(data));
        Ok(())
    }
}

/// Factory handing out in-memory sources and sinks for every media source
pub struct MemoryFactory {
    pub frames: Option<usize>,
    pub fail: AtomicBool,
    /// Device whose sources fail to open
    pub fail_device: Mutex<Option<Device>>,
    pub sinks: Mutex<Vec<Arc<CollectSink>>>,
}

impl MemoryFactory {
    pub fn endless() -> Arc<Self> {
        Arc::new(Self {
            frames: None,
            fail: AtomicBool::new(false),
            fail_device: Mutex::new(None),
            sinks: Mutex::new(Vec::new()),
        })
    }

    pub fn limited(frames: usize) -> Arc<Self> {
        Arc::new(Self {
            frames: Some(frames),
            fail: AtomicBool::new(false),
            fail_device: Mutex::new(None),
            sinks: Mutex::new(Vec::new()),
        })
    }
}

impl MediaSourceFactory for MemoryFactory {
    fn create_source(&self, device: Device, _desc: &StreamDescription) -> Result<Arc<dyn FrameSource>> {
        if self.fail.load(Ordering::SeqCst) || *self.fail_device.lock() == Some(device) {
            return Err(callcore_media_core::MediaError::shell("source unavailable"));
        }
        Ok(Arc::new(PatternSource::new(self.frames)))
    }

    fn create_sink(&self, _device: Device, _desc: &StreamDescription) -> Result<Arc<dyn FrameSink>> {
        let sink = Arc::new(CollectSink::default());
        self.sinks.lock().push(Arc::clone(&sink));
        Ok(sink)
    }
}

/// Transport double recording every binding
#[derive(Default)]
pub struct MockTransport {
    pub tracks: Mutex<Vec<Arc<LocalTrack>>>,
    pub sent: Arc<Mutex<Vec<(Device, Bytes, FrameData)>>>,
    pub audio_sinks: Mutex<Vec<Arc<RemoteAudioSink>>>,
    pub video_sinks: Mutex<Vec<(Arc<RemoteVideoSink>, bool)>>,
    pub audio_incoming: Mutex<Option<bool>>,
    pub camera_incoming: Mutex<Option<bool>>,
    pub screen_incoming: Mutex<Option<bool>>,
    pub callback: Mutex<Option<ConnectionChangeCallback>>,
    pub closed: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent_count(&self, device: Device) -> usize {
        self.sent.lock().iter().filter(|(d, _, _)| *d == device).count()
    }
}

impl NetworkInterface for MockTransport {
    fn add_outgoing_track(&self, track: Arc<LocalTrack>) {
        let device = track.device();
        let sent = Arc::clone(&self.sent);
        track.set_output(Some(Arc::new(move |data: Bytes, frame_data: FrameData| {
            sent.lock().push((device, data, frame_data));
        })));
        self.tracks.lock().push(track);
    }

    fn add_incoming_audio(&self, sink: Arc<RemoteAudioSink>) {
        self.audio_sinks.lock().push(sink);
    }

    fn add_incoming_video(&self, sink: Arc<RemoteVideoSink>, is_screencast: bool) {
        self.video_sinks.lock().push((sink, is_screencast));
    }

    fn enable_audio_incoming(&self, enable: bool) {
        *self.audio_incoming.lock() = Some(enable);
    }

    fn enable_video_incoming(&self, enable: bool, is_screencast: bool) {
        if is_screencast {
            *self.screen_incoming.lock() = Some(enable);
        } else {
            *self.camera_incoming.lock() = Some(enable);
        }
    }

    fn on_connection_change(&self, callback: Option<ConnectionChangeCallback>) {
        *self.callback.lock() = callback;
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
