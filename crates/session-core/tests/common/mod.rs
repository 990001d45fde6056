//! Shared fixtures for session-core integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use callcore_media_core::description::StreamDescription;
use callcore_media_core::{
    ConnectionChangeCallback, Device, FrameData, FrameSink, FrameSource, LocalTrack, MediaSourceFactory,
    NetworkInterface, RemoteAudioSink, RemoteVideoSink, TransportState,
};
use callcore_infra_common::{setup_logging, LoggingConfig};
use callcore_session_core::CallNetworkState;

/// Install the stack's subscriber once per test binary
pub fn init_logging() {
    let _ = setup_logging(LoggingConfig::new(tracing::Level::DEBUG, "session-core-tests"));
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

/// Transport double whose connection signals are driven by the test
#[derive(Default)]
pub struct ScriptedTransport {
    pub callback: Mutex<Option<ConnectionChangeCallback>>,
    pub tracks: Mutex<Vec<Arc<LocalTrack>>>,
    pub sent: Arc<Mutex<Vec<(Device, Bytes)>>>,
    pub audio_sinks: Mutex<Vec<Arc<RemoteAudioSink>>>,
    pub video_sinks: Mutex<Vec<(Arc<RemoteVideoSink>, bool)>>,
    pub audio_incoming: Mutex<Option<bool>>,
    pub closed: AtomicBool,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver a transport state signal; false when nobody is registered
    pub fn signal(&self, state: TransportState) -> bool {
        let callback = self.callback.lock().clone();
        match callback {
            Some(callback) => {
                callback(state);
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.callback.lock().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn sent_count(&self, device: Device) -> usize {
        self.sent.lock().iter().filter(|(d, _)| *d == device).count()
    }
}

impl NetworkInterface for ScriptedTransport {
    fn add_outgoing_track(&self, track: Arc<LocalTrack>) {
        let device = track.device();
        let sent = Arc::clone(&self.sent);
        track.set_output(Some(Arc::new(move |data: Bytes, _frame_data: FrameData| {
            sent.lock().push((device, data));
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

    fn enable_video_incoming(&self, _enable: bool, _is_screencast: bool) {}

    fn on_connection_change(&self, callback: Option<ConnectionChangeCallback>) {
        *self.callback.lock() = callback;
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Endless source of zeroed frames
pub struct SilenceSource;

impl FrameSource for SilenceSource {
    fn read(&self, size: usize) -> callcore_media_core::Result<Option<Bytes>> {
        Ok(Some(Bytes::from(vec![0u8; size])))
    }
}

pub struct NullSink;

impl FrameSink for NullSink {
    fn write(&self, _data: &[u8]) -> callcore_media_core::Result<()> {
        Ok(())
    }
}

/// Factory backing every file, shell or device source with silence
#[derive(Default)]
pub struct SilenceFactory {
    pub sources: AtomicUsize,
}

impl MediaSourceFactory for SilenceFactory {
    fn create_source(&self, _device: Device, _desc: &StreamDescription) -> callcore_media_core::Result<Arc<dyn FrameSource>> {
        self.sources.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(SilenceSource))
    }

    fn create_sink(&self, _device: Device, _desc: &StreamDescription) -> callcore_media_core::Result<Arc<dyn FrameSink>> {
        Ok(Arc::new(NullSink))
    }
}

/// Collects connection events in arrival order
#[derive(Clone, Default)]
pub struct EventLog {
    pub events: Arc<Mutex<Vec<CallNetworkState>>>,
}

impl EventLog {
    pub fn push(&self, state: CallNetworkState) {
        self.events.lock().push(state);
    }

    pub fn snapshot(&self) -> Vec<CallNetworkState> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }
}
