//! Endpoint table
//!
//! Plain data guarded by the manager's lock. Nothing in here calls out to
//! observers or transports.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::description::StreamDescription;
use crate::endpoint::{Endpoint, LocalTrack, RemoteAudioSink, RemoteVideoSink};
use crate::io::{AudioWriter, MediaReader};
use crate::types::{Device, MediaState, Mode, Status, StreamKey};

pub(crate) struct EndpointSlot {
    /// Device that configured the endpoint. Differs from the key's device
    /// when camera and screen share one capture slot.
    pub device: Device,
    pub endpoint: Endpoint,
}

pub(crate) struct StreamTable {
    pub initialized: bool,
    pub started: bool,
    pub closed: bool,
    pub video_simulcast: bool,
    pub endpoints: HashMap<StreamKey, EndpointSlot>,
    /// Applied description per configured (mode, device)
    pub descriptions: HashMap<StreamKey, StreamDescription>,
    pub tracks: HashMap<StreamKey, Arc<LocalTrack>>,
    pub audio_sinks: HashMap<StreamKey, Arc<RemoteAudioSink>>,
    pub video_sinks: HashMap<StreamKey, Arc<RemoteVideoSink>>,
    pub readers: HashMap<Device, MediaReader>,
    pub writers: HashMap<Device, Arc<AudioWriter>>,
    pub external_readers: HashSet<Device>,
    pub external_writers: HashSet<Device>,
    /// State last reported through an upgrade notification
    pub last_state: MediaState,
}

impl StreamTable {
    pub fn new(video_simulcast: bool) -> Self {
        Self {
            initialized: false,
            started: false,
            closed: false,
            video_simulcast,
            endpoints: HashMap::new(),
            descriptions: HashMap::new(),
            tracks: HashMap::new(),
            audio_sinks: HashMap::new(),
            video_sinks: HashMap::new(),
            readers: HashMap::new(),
            writers: HashMap::new(),
            external_readers: HashSet::new(),
            external_writers: HashSet::new(),
            last_state: MediaState::default(),
        }
    }

    /// Table key of a device's endpoint. Without simulcast camera and screen
    /// capture share the camera slot.
    pub fn endpoint_key(&self, mode: Mode, device: Device) -> StreamKey {
        if mode == Mode::Capture && device.is_video() && !self.video_simulcast {
            StreamKey::new(Mode::Capture, Device::Camera)
        } else {
            StreamKey::new(mode, device)
        }
    }

    /// Key of the slot currently holding `device`'s endpoint. The slot may
    /// predate the last simulcast change, so both capture video keys are
    /// checked.
    pub fn slot_key(&self, mode: Mode, device: Device) -> Option<StreamKey> {
        let own = StreamKey::new(mode, device);
        let shared = StreamKey::new(Mode::Capture, Device::Camera);
        let mut candidates = vec![own];
        if mode == Mode::Capture && device.is_video() && own != shared {
            candidates.push(shared);
        }
        candidates
            .into_iter()
            .find(|key| self.endpoints.get(key).map_or(false, |slot| slot.device == device))
    }

    /// Endpoint configured by `device`, if any
    pub fn endpoint_of(&self, mode: Mode, device: Device) -> Option<&Endpoint> {
        let key = self.slot_key(mode, device)?;
        self.endpoints.get(&key).map(|slot| &slot.endpoint)
    }

    pub fn track_for(&mut self, key: StreamKey) -> Arc<LocalTrack> {
        Arc::clone(
            self.tracks
                .entry(key)
                .or_insert_with(|| Arc::new(LocalTrack::new(key))),
        )
    }

    pub fn audio_sink_for(&mut self, key: StreamKey) -> Arc<RemoteAudioSink> {
        Arc::clone(self.audio_sinks.entry(key).or_default())
    }

    pub fn video_sink_for(&mut self, key: StreamKey) -> Arc<RemoteVideoSink> {
        Arc::clone(self.video_sinks.entry(key).or_default())
    }

    pub fn has_device(&self, mode: Mode, device: Device) -> bool {
        match mode {
            Mode::Capture => self.readers.contains_key(&device) || self.external_readers.contains(&device),
            Mode::Playback => self.writers.contains_key(&device) || self.external_writers.contains(&device),
        }
    }

    /// Whether the io backing a configured device is missing
    pub fn io_missing(&self, mode: Mode, device: Device, desc: &StreamDescription) -> bool {
        if self.slot_key(mode, device) != Some(self.endpoint_key(mode, device)) {
            return true;
        }
        match (mode, desc.is_external()) {
            (Mode::Capture, true) => !self.external_readers.contains(&device),
            (Mode::Capture, false) => !self.readers.contains_key(&device),
            (Mode::Playback, true) => !self.external_writers.contains(&device),
            (Mode::Playback, false) => !self.writers.contains_key(&device),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.readers.values().any(|reader| !reader.is_enabled())
    }

    pub fn is_muted(&self) -> bool {
        self.tracks
            .iter()
            .any(|(key, track)| key.mode == Mode::Capture && !track.is_enabled())
    }

    pub fn media_state(&self) -> MediaState {
        let muted = self.is_muted();
        let paused = self.is_paused();
        MediaState {
            muted,
            video_paused: paused || muted,
            video_stopped: !self.has_device(Mode::Capture, Device::Camera)
                && !self.has_device(Mode::Capture, Device::Screen),
            presentation_paused: paused || muted,
        }
    }

    pub fn status(&self, mode: Mode) -> Status {
        match mode {
            Mode::Capture => {
                if self.readers.is_empty() {
                    Status::Idling
                } else if self.is_paused() {
                    Status::Paused
                } else {
                    Status::Active
                }
            }
            Mode::Playback => {
                if self.writers.is_empty() {
                    Status::Idling
                } else {
                    Status::Active
                }
            }
        }
    }
}
