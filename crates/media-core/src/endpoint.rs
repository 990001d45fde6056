//! Stream endpoints and their transport bindings
//!
//! An [`Endpoint`] is the live binding of one (mode, device) key to a frame
//! geometry. Capture endpoints push frames into a [`LocalTrack`], playback
//! endpoints count the frames arriving through a [`RemoteAudioSink`] or
//! [`RemoteVideoSink`]. Tracks and sinks are what the transport sees; they
//! outlive endpoint replacement so a transport registration is made once per
//! key.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::trace;

use crate::description::{AudioDescription, FrameGeometry, StreamDescription, VideoDescription};
use crate::error::{MediaError, Result};
use crate::types::{AudioFrames, Device, FrameData, Mode, StreamKey};

/// Transport side consumer of an outgoing track
pub type TrackOutput = Arc<dyn Fn(Bytes, FrameData) + Send + Sync>;

/// Consumer of one playback tick of remote audio
pub type AudioFramesHandler = Arc<dyn Fn(&AudioFrames) + Send + Sync>;

/// Consumer of one remote video frame, tagged with its source id
pub type VideoFrameHandler = Arc<dyn Fn(u32, Bytes, FrameData) + Send + Sync>;

/// Outgoing media track of one capture key
pub struct LocalTrack {
    key: StreamKey,
    enabled: AtomicBool,
    output: RwLock<Option<TrackOutput>>,
}

impl LocalTrack {
    pub fn new(key: StreamKey) -> Self {
        Self {
            key,
            enabled: AtomicBool::new(true),
            output: RwLock::new(None),
        }
    }

    pub fn key(&self) -> StreamKey {
        self.key
    }

    pub fn device(&self) -> Device {
        self.key.device
    }

    /// Attach the transport side consumer; called by the transport when the
    /// track is added
    pub fn set_output(&self, output: Option<TrackOutput>) {
        *self.output.write() = output;
    }

    pub fn is_bound(&self) -> bool {
        self.output.read().is_some()
    }

    /// Returns whether the value changed
    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::SeqCst) != enabled
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Forward a frame to the transport. Disabled tracks drop frames.
    pub fn push(&self, data: Bytes, frame_data: FrameData) {
        if !self.is_enabled() {
            return;
        }
        let output = self.output.read().clone();
        match output {
            Some(output) => output(data, frame_data),
            None => trace!("Track {} not bound, dropping frame", self.key),
        }
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("key", &self.key)
            .field("enabled", &self.is_enabled())
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// Incoming audio of one playback key, fed by the transport
#[derive(Default)]
pub struct RemoteAudioSink {
    handler: RwLock<Option<AudioFramesHandler>>,
}

impl RemoteAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_handler(&self, handler: Option<AudioFramesHandler>) {
        *self.handler.write() = handler;
    }

    pub fn push(&self, frames: &AudioFrames) {
        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler(frames);
        }
    }
}

/// Incoming video of one playback key, fed by the transport
#[derive(Default)]
pub struct RemoteVideoSink {
    handler: RwLock<Option<VideoFrameHandler>>,
}

impl RemoteVideoSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_handler(&self, handler: Option<VideoFrameHandler>) {
        *self.handler.write() = handler;
    }

    pub fn push(&self, source_id: u32, data: Bytes, frame_data: FrameData) {
        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler(source_id, data, frame_data);
        }
    }
}

/// Counts frames to report elapsed stream time
#[derive(Debug)]
struct FrameClock {
    frame_time: Duration,
    frames: AtomicU64,
}

impl FrameClock {
    fn new(frame_time: Duration) -> Self {
        Self {
            frame_time,
            frames: AtomicU64::new(0),
        }
    }

    fn tick(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    fn elapsed(&self) -> Duration {
        let frames = self.frames.load(Ordering::Relaxed);
        self.frame_time.saturating_mul(u32::try_from(frames).unwrap_or(u32::MAX))
    }
}

pub struct AudioStreamer {
    description: AudioDescription,
    track: Arc<LocalTrack>,
    clock: FrameClock,
}

impl AudioStreamer {
    pub fn new(description: AudioDescription, track: Arc<LocalTrack>) -> Self {
        let clock = FrameClock::new(description.geometry().frame_time);
        Self {
            description,
            track,
            clock,
        }
    }

    pub fn send_data(&self, data: Bytes, frame_data: FrameData) {
        self.clock.tick();
        self.track.push(data, frame_data);
    }
}

pub struct VideoStreamer {
    description: VideoDescription,
    track: Arc<LocalTrack>,
    clock: FrameClock,
}

impl VideoStreamer {
    pub fn new(description: VideoDescription, track: Arc<LocalTrack>) -> Self {
        let clock = FrameClock::new(description.geometry().frame_time);
        Self {
            description,
            track,
            clock,
        }
    }

    pub fn send_data(&self, data: Bytes, mut frame_data: FrameData) {
        if frame_data.width == 0 || frame_data.height == 0 {
            frame_data.width = self.description.width;
            frame_data.height = self.description.height;
        }
        self.clock.tick();
        self.track.push(data, frame_data);
    }
}

pub struct AudioReceiver {
    description: AudioDescription,
    clock: FrameClock,
}

impl AudioReceiver {
    pub fn new(description: AudioDescription) -> Self {
        let clock = FrameClock::new(description.geometry().frame_time);
        Self { description, clock }
    }

    pub fn record_frame(&self) {
        self.clock.tick();
    }
}

pub struct VideoReceiver {
    description: VideoDescription,
    clock: FrameClock,
}

impl VideoReceiver {
    pub fn new(description: VideoDescription) -> Self {
        let clock = FrameClock::new(description.geometry().frame_time);
        Self { description, clock }
    }

    pub fn record_frame(&self) {
        self.clock.tick();
    }
}

/// Live endpoint of one (mode, device) key
#[derive(Clone)]
pub enum Endpoint {
    AudioCapture(Arc<AudioStreamer>),
    VideoCapture(Arc<VideoStreamer>),
    AudioPlayback(Arc<AudioReceiver>),
    VideoPlayback(Arc<VideoReceiver>),
}

impl Endpoint {
    /// Build the endpoint variant matching `mode` and `desc`
    pub fn build(mode: Mode, desc: &StreamDescription, track: Option<Arc<LocalTrack>>) -> Result<Self> {
        match (mode, desc) {
            (Mode::Capture, StreamDescription::Audio(desc)) => {
                let track = track.ok_or_else(|| MediaError::invalid_params("Capture endpoint needs a track"))?;
                Ok(Endpoint::AudioCapture(Arc::new(AudioStreamer::new(desc.clone(), track))))
            }
            (Mode::Capture, StreamDescription::Video(desc)) => {
                let track = track.ok_or_else(|| MediaError::invalid_params("Capture endpoint needs a track"))?;
                Ok(Endpoint::VideoCapture(Arc::new(VideoStreamer::new(desc.clone(), track))))
            }
            (Mode::Playback, StreamDescription::Audio(desc)) => {
                Ok(Endpoint::AudioPlayback(Arc::new(AudioReceiver::new(desc.clone()))))
            }
            (Mode::Playback, StreamDescription::Video(desc)) => {
                Ok(Endpoint::VideoPlayback(Arc::new(VideoReceiver::new(desc.clone()))))
            }
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            Endpoint::AudioCapture(_) | Endpoint::VideoCapture(_) => Mode::Capture,
            Endpoint::AudioPlayback(_) | Endpoint::VideoPlayback(_) => Mode::Playback,
        }
    }

    pub fn description(&self) -> StreamDescription {
        match self {
            Endpoint::AudioCapture(e) => StreamDescription::Audio(e.description.clone()),
            Endpoint::VideoCapture(e) => StreamDescription::Video(e.description.clone()),
            Endpoint::AudioPlayback(e) => StreamDescription::Audio(e.description.clone()),
            Endpoint::VideoPlayback(e) => StreamDescription::Video(e.description.clone()),
        }
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.description().geometry()
    }

    /// Elapsed stream time, derived from the number of frames handled
    pub fn time(&self) -> Duration {
        match self {
            Endpoint::AudioCapture(e) => e.clock.elapsed(),
            Endpoint::VideoCapture(e) => e.clock.elapsed(),
            Endpoint::AudioPlayback(e) => e.clock.elapsed(),
            Endpoint::VideoPlayback(e) => e.clock.elapsed(),
        }
    }

    /// Push a captured frame to the transport
    pub fn send_data(&self, data: Bytes, frame_data: FrameData) -> Result<()> {
        match self {
            Endpoint::AudioCapture(e) => {
                e.send_data(data, frame_data);
                Ok(())
            }
            Endpoint::VideoCapture(e) => {
                e.send_data(data, frame_data);
                Ok(())
            }
            Endpoint::AudioPlayback(_) | Endpoint::VideoPlayback(_) => Err(MediaError::invalid_params(
                "Cannot send frames through a playback endpoint",
            )),
        }
    }

    /// Count one received frame on a playback endpoint
    pub fn record_frame(&self) {
        match self {
            Endpoint::AudioPlayback(e) => e.record_frame(),
            Endpoint::VideoPlayback(e) => e.record_frame(),
            Endpoint::AudioCapture(_) | Endpoint::VideoCapture(_) => {}
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Endpoint::AudioCapture(_) => "AudioCapture",
            Endpoint::VideoCapture(_) => "VideoCapture",
            Endpoint::AudioPlayback(_) => "AudioPlayback",
            Endpoint::VideoPlayback(_) => "VideoPlayback",
        };
        f.debug_struct("Endpoint")
            .field("kind", &kind)
            .field("time", &self.time())
            .finish()
    }
}
