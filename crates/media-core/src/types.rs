//! Core media types shared by the stream manager, endpoints and transports

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Logical capture or playback endpoint kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Device {
    Microphone,
    Speaker,
    Camera,
    Screen,
}

impl Device {
    /// Every device, in configuration order
    pub const ALL: [Device; 4] = [
        Device::Microphone,
        Device::Speaker,
        Device::Camera,
        Device::Screen,
    ];

    pub fn stream_type(self) -> StreamType {
        match self {
            Device::Microphone | Device::Speaker => StreamType::Audio,
            Device::Camera | Device::Screen => StreamType::Video,
        }
    }

    pub fn is_video(self) -> bool {
        self.stream_type() == StreamType::Video
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Microphone => write!(f, "microphone"),
            Device::Speaker => write!(f, "speaker"),
            Device::Camera => write!(f, "camera"),
            Device::Screen => write!(f, "screen"),
        }
    }
}

/// Local production or remote consumption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Mode {
    Capture,
    Playback,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Capture => write!(f, "capture"),
            Mode::Playback => write!(f, "playback"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamType {
    Audio,
    Video,
}

/// Stream status for one mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Active,
    Paused,
    Idling,
}

/// Status of both directions of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStatus {
    pub playback: Status,
    pub capture: Status,
}

/// Composite key of the endpoint table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    pub mode: Mode,
    pub device: Device,
}

impl StreamKey {
    pub fn new(mode: Mode, device: Device) -> Self {
        Self { mode, device }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.mode, self.device)
    }
}

/// Per-frame metadata travelling alongside a payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameData {
    /// Wall-clock capture time in milliseconds since the UNIX epoch
    pub absolute_capture_timestamp_ms: i64,
    /// Clockwise rotation in degrees (0, 90, 180, 270)
    pub rotation: u16,
    pub width: u16,
    pub height: u16,
}

/// Derived snapshot of the local media state, sent with upgrade
/// notifications
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaState {
    /// At least one capture audio track is disabled
    pub muted: bool,
    /// Paused or muted
    pub video_paused: bool,
    /// Neither camera nor screen is being captured
    pub video_stopped: bool,
    /// Paused or muted
    pub presentation_paused: bool,
}

/// Remote audio frames of one playback tick, keyed by remote source id
pub type AudioFrames = BTreeMap<u32, Bytes>;

/// Current wall-clock time in milliseconds
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_types() {
        assert_eq!(Device::Microphone.stream_type(), StreamType::Audio);
        assert_eq!(Device::Speaker.stream_type(), StreamType::Audio);
        assert!(Device::Camera.is_video());
        assert!(Device::Screen.is_video());
    }

    #[test]
    fn test_stream_key_display() {
        let key = StreamKey::new(Mode::Playback, Device::Screen);
        assert_eq!(key.to_string(), "playback/screen");
    }
}
