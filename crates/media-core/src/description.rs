//! Media descriptions
//!
//! A [`MediaDescription`] carries one optional sub-configuration per device.
//! An absent entry means "not configured": applying the description removes
//! whatever endpoint the device had. Each sub-configuration declares where
//! its frames come from (or go to) through [`MediaSource`] and the
//! parameters that fix its frame geometry.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MediaError, Result};
use crate::types::Device;

/// Duration of one audio frame
pub const AUDIO_FRAME_TIME: Duration = Duration::from_millis(10);

/// Where a stream's frames come from (capture) or go to (playback)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaSource {
    /// Raw frames read from / written to a file path
    File,
    /// Raw frames read from a process' stdout / written to its stdin
    Shell,
    /// Frames produced by a capture device backend. Device video is also
    /// shown locally, so captured frames are mirrored to the frame observer.
    Device,
    /// Frames pushed and drained by the application itself
    External,
}

/// Fixed frame size and cadence of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    /// Bytes per frame
    pub frame_size: usize,
    /// Target duration of one frame
    pub frame_time: Duration,
}

/// Raw 16-bit PCM audio stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDescription {
    pub media_source: MediaSource,
    /// File path or shell command, depending on `media_source`
    #[serde(default)]
    pub input: String,
    pub sample_rate: u32,
    pub channel_count: u8,
}

impl AudioDescription {
    pub fn new(media_source: MediaSource, input: impl Into<String>, sample_rate: u32, channel_count: u8) -> Self {
        Self {
            media_source,
            input: input.into(),
            sample_rate,
            channel_count,
        }
    }

    /// 48 kHz stereo audio fed by the application
    pub fn external() -> Self {
        Self::new(MediaSource::External, "", 48000, 2)
    }

    /// 10 ms of 16-bit interleaved PCM
    pub fn geometry(&self) -> FrameGeometry {
        let bytes_per_second = self.sample_rate as usize * self.channel_count as usize * 2;
        FrameGeometry {
            frame_size: bytes_per_second / 100,
            frame_time: AUDIO_FRAME_TIME,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.channel_count == 0 {
            return Err(MediaError::invalid_params(format!(
                "Invalid audio parameters: {} Hz, {} channels",
                self.sample_rate, self.channel_count
            )));
        }
        if self.geometry().frame_size == 0 {
            return Err(MediaError::invalid_params("Audio frame size is zero"));
        }
        validate_input(self.media_source, &self.input)
    }
}

/// Raw I420 video stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoDescription {
    pub media_source: MediaSource,
    #[serde(default)]
    pub input: String,
    pub width: u16,
    pub height: u16,
    pub fps: u8,
}

impl VideoDescription {
    pub fn new(media_source: MediaSource, input: impl Into<String>, width: u16, height: u16, fps: u8) -> Self {
        Self {
            media_source,
            input: input.into(),
            width,
            height,
            fps,
        }
    }

    /// 720p30 video fed by the application
    pub fn external() -> Self {
        Self::new(MediaSource::External, "", 1280, 720, 30)
    }

    /// One I420 frame per `1 / fps` seconds
    pub fn geometry(&self) -> FrameGeometry {
        let pixels = self.width as usize * self.height as usize;
        FrameGeometry {
            frame_size: pixels * 3 / 2,
            frame_time: Duration::from_secs(1) / u32::from(self.fps.max(1)),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 || self.fps == 0 {
            return Err(MediaError::invalid_params(format!(
                "Invalid video parameters: {}x{}@{}",
                self.width, self.height, self.fps
            )));
        }
        validate_input(self.media_source, &self.input)
    }
}

fn validate_input(source: MediaSource, input: &str) -> Result<()> {
    match source {
        MediaSource::File | MediaSource::Shell if input.trim().is_empty() => Err(
            MediaError::invalid_params(format!("{:?} source requires an input", source)),
        ),
        _ => Ok(()),
    }
}

/// Per-call media description, one optional entry per device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescription {
    #[serde(default)]
    pub microphone: Option<AudioDescription>,
    #[serde(default)]
    pub speaker: Option<AudioDescription>,
    #[serde(default)]
    pub camera: Option<VideoDescription>,
    #[serde(default)]
    pub screen: Option<VideoDescription>,
}

impl MediaDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_microphone(mut self, desc: AudioDescription) -> Self {
        self.microphone = Some(desc);
        self
    }

    pub fn with_speaker(mut self, desc: AudioDescription) -> Self {
        self.speaker = Some(desc);
        self
    }

    pub fn with_camera(mut self, desc: VideoDescription) -> Self {
        self.camera = Some(desc);
        self
    }

    pub fn with_screen(mut self, desc: VideoDescription) -> Self {
        self.screen = Some(desc);
        self
    }

    /// The sub-configuration of one device, if any
    pub fn get(&self, device: Device) -> Option<StreamDescription> {
        match device {
            Device::Microphone => self.microphone.clone().map(StreamDescription::Audio),
            Device::Speaker => self.speaker.clone().map(StreamDescription::Audio),
            Device::Camera => self.camera.clone().map(StreamDescription::Video),
            Device::Screen => self.screen.clone().map(StreamDescription::Video),
        }
    }

    pub fn is_empty(&self) -> bool {
        Device::ALL.iter().all(|d| self.get(*d).is_none())
    }
}

/// A single device's sub-configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamDescription {
    Audio(AudioDescription),
    Video(VideoDescription),
}

impl StreamDescription {
    pub fn media_source(&self) -> MediaSource {
        match self {
            StreamDescription::Audio(desc) => desc.media_source,
            StreamDescription::Video(desc) => desc.media_source,
        }
    }

    pub fn input(&self) -> &str {
        match self {
            StreamDescription::Audio(desc) => &desc.input,
            StreamDescription::Video(desc) => &desc.input,
        }
    }

    pub fn geometry(&self) -> FrameGeometry {
        match self {
            StreamDescription::Audio(desc) => desc.geometry(),
            StreamDescription::Video(desc) => desc.geometry(),
        }
    }

    pub fn is_external(&self) -> bool {
        self.media_source() == MediaSource::External
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            StreamDescription::Audio(desc) => desc.validate(),
            StreamDescription::Video(desc) => desc.validate(),
        }
    }
}
