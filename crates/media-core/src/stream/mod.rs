//! Stream manager
//!
//! The [`StreamManager`] owns the endpoints of one call, keyed by
//! (mode, device), together with the readers and writers that feed and
//! drain them. It enforces mute and pause semantics and reports changes of
//! the derived [`MediaState`] through upgrade notifications.
//!
//! Locking rules:
//!
//! - the endpoint table sits behind one `RwLock`; queries take it shared,
//!   mutations exclusive
//! - upgrade and end-of-stream notifications are posted onto the update
//!   queue, never invoked with the table locked
//! - reader lanes never take the table lock; their handlers capture the
//!   endpoint they feed
//! - readers and writers removed from the table are dropped after the lock
//!   is released, since dropping joins their threads

mod observers;
mod table;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use callcore_infra_common::DispatchQueue;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

pub use observers::{FrameCallback, StreamEndCallback, UpgradeCallback};

use crate::description::{MediaDescription, MediaSource, StreamDescription};
use crate::endpoint::Endpoint;
use crate::error::{MediaError, Result};
use crate::io::{AudioWriter, DefaultSourceFactory, MediaReader, MediaSourceFactory};
use crate::scheduler::DEFAULT_LANES;
use crate::transport::NetworkInterface;
use crate::types::{now_ms, AudioFrames, Device, FrameData, MediaState, MediaStatus, Mode, Status, StreamKey};
use observers::Observers;
use table::{EndpointSlot, StreamTable};

/// Stream manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamManagerConfig {
    /// Allow camera and screen to be captured at the same time
    pub video_simulcast: bool,
    /// Lanes per capture reader
    pub reader_lanes: usize,
}

impl Default for StreamManagerConfig {
    fn default() -> Self {
        Self {
            video_simulcast: true,
            reader_lanes: DEFAULT_LANES,
        }
    }
}

impl StreamManagerConfig {
    pub fn with_video_simulcast(mut self, enable: bool) -> Self {
        self.video_simulcast = enable;
        self
    }

    pub fn with_reader_lanes(mut self, lanes: usize) -> Self {
        self.reader_lanes = lanes;
        self
    }
}

/// Reader or writer built for one device before the table is touched
enum PreparedIo {
    Reader(MediaReader),
    Writer(Arc<AudioWriter>),
    ExternalReader,
    ExternalWriter,
}

enum Change {
    Configure {
        device: Device,
        description: StreamDescription,
        endpoint: Endpoint,
        io: PreparedIo,
    },
    Remove(Device),
}

/// Readers and writers taken out of the table, dropped once it is unlocked
#[derive(Default)]
struct Retired {
    readers: Vec<MediaReader>,
    writers: Vec<Arc<AudioWriter>>,
}

impl Retired {
    /// Keep prepared but uncommitted io alive until the table is unlocked
    fn take_prepared(&mut self, changes: Vec<Change>) {
        for change in changes {
            if let Change::Configure { io, .. } = change {
                match io {
                    PreparedIo::Reader(reader) => self.readers.push(reader),
                    PreparedIo::Writer(writer) => self.writers.push(writer),
                    PreparedIo::ExternalReader | PreparedIo::ExternalWriter => {}
                }
            }
        }
    }
}

struct ManagerInner {
    table: RwLock<StreamTable>,
    observers: Arc<Observers>,
    update_queue: Arc<DispatchQueue>,
    factory: Arc<dyn MediaSourceFactory>,
    next_io_id: AtomicU64,
    lanes: usize,
}

/// Per-call table of capture and playback endpoints
pub struct StreamManager {
    inner: Arc<ManagerInner>,
}

impl StreamManager {
    /// Create a manager using the file/shell source factory
    pub fn new(update_queue: Arc<DispatchQueue>, config: StreamManagerConfig) -> Self {
        Self::with_factory(update_queue, config, Arc::new(DefaultSourceFactory))
    }

    pub fn with_factory(
        update_queue: Arc<DispatchQueue>,
        config: StreamManagerConfig,
        factory: Arc<dyn MediaSourceFactory>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                table: RwLock::new(StreamTable::new(config.video_simulcast)),
                observers: Arc::new(Observers::default()),
                update_queue,
                factory,
                next_io_id: AtomicU64::new(1),
                lanes: config.reader_lanes.max(1),
            }),
        }
    }

    pub fn enable_video_simulcast(&self, enable: bool) {
        self.inner.table.write().video_simulcast = enable;
    }

    pub fn video_simulcast(&self) -> bool {
        self.inner.table.read().video_simulcast
    }

    /// Apply the configuration of one mode.
    ///
    /// Devices present in `desc` get their endpoint created or replaced,
    /// absent devices lose theirs. Either every device is applied or, on
    /// error, the table is left untouched.
    pub fn set_stream_sources(&self, mode: Mode, desc: &MediaDescription) -> Result<()> {
        let mut retired = Retired::default();
        let result = self.inner.apply(mode, desc, &mut retired);
        drop(retired);
        result
    }

    pub fn pause(&self) -> bool {
        self.inner.update_pause(true)
    }

    pub fn resume(&self) -> bool {
        self.inner.update_pause(false)
    }

    pub fn mute(&self) -> bool {
        self.inner.update_mute(true)
    }

    pub fn unmute(&self) -> bool {
        self.inner.update_mute(false)
    }

    /// Open every configured reader and writer
    pub fn start(&self) -> Result<()> {
        let mut table = self.inner.table.write();
        if table.closed {
            return Err(MediaError::connection("Stream manager is closed"));
        }
        table.started = true;
        let mut first_error = None;
        for reader in table.readers.values() {
            if let Err(e) = reader.open() {
                warn!("Failed to open {} reader: {}", reader.device(), e);
                first_error.get_or_insert(e);
            }
        }
        for (device, writer) in &table.writers {
            if let Err(e) = writer.open() {
                warn!("Failed to open {} writer: {}", device, e);
                first_error.get_or_insert(e);
            }
        }
        info!(
            "Stream manager started: {} readers, {} writers",
            table.readers.len(),
            table.writers.len()
        );
        first_error.map_or(Ok(()), Err)
    }

    /// Mean elapsed time of the endpoints of `mode` that have handled at
    /// least one frame. Zero when none has.
    pub fn time(&self, mode: Mode) -> Duration {
        let table = self.inner.table.read();
        let times: Vec<Duration> = table
            .endpoints
            .iter()
            .filter(|(key, _)| key.mode == mode)
            .map(|(_, slot)| slot.endpoint.time())
            .filter(|time| !time.is_zero())
            .collect();
        if times.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = times.iter().sum();
        total / times.len() as u32
    }

    pub fn status(&self, mode: Mode) -> Status {
        self.inner.table.read().status(mode)
    }

    pub fn media_status(&self) -> MediaStatus {
        let table = self.inner.table.read();
        MediaStatus {
            playback: table.status(Mode::Playback),
            capture: table.status(Mode::Capture),
        }
    }

    pub fn get_state(&self) -> MediaState {
        self.inner.table.read().media_state()
    }

    /// Whether `device` is backed by a reader/writer or registered external
    pub fn has_device(&self, mode: Mode, device: Device) -> bool {
        self.inner.table.read().has_device(mode, device)
    }

    /// Push an application frame through an externally fed capture device
    pub fn send_external_frame(&self, device: Device, data: Bytes, mut frame_data: FrameData) -> Result<()> {
        let endpoint = {
            let table = self.inner.table.read();
            match table.endpoint_of(Mode::Capture, device) {
                Some(endpoint) if table.external_readers.contains(&device) => endpoint.clone(),
                _ => return Err(MediaError::invalid_params("External source not initialized")),
            }
        };
        if frame_data.absolute_capture_timestamp_ms == 0 {
            frame_data.absolute_capture_timestamp_ms = now_ms();
        }
        endpoint.send_data(data, frame_data)
    }

    /// Register the key's outgoing track (capture) or incoming sink
    /// (playback) with `transport`
    pub fn add_track(&self, mode: Mode, device: Device, transport: &dyn NetworkInterface) {
        let mut table = self.inner.table.write();
        let key = table.endpoint_key(mode, device);
        match (mode, device.is_video()) {
            (Mode::Capture, _) => {
                let track = table.track_for(key);
                drop(table);
                debug!("Adding outgoing track {}", key);
                transport.add_outgoing_track(track);
            }
            (Mode::Playback, false) => {
                let sink = table.audio_sink_for(key);
                drop(table);
                debug!("Adding incoming audio {}", key);
                transport.add_incoming_audio(sink);
            }
            (Mode::Playback, true) => {
                let sink = table.video_sink_for(key);
                drop(table);
                debug!("Adding incoming video {}", key);
                transport.add_incoming_video(sink, device == Device::Screen);
            }
        }
    }

    /// Only receive the remote media something is configured to consume
    pub fn optimize_sources(&self, transport: &dyn NetworkInterface) {
        let (audio, camera, screen) = {
            let table = self.inner.table.read();
            (
                table.has_device(Mode::Playback, Device::Microphone)
                    || table.has_device(Mode::Playback, Device::Speaker),
                table.has_device(Mode::Playback, Device::Camera),
                table.has_device(Mode::Playback, Device::Screen),
            )
        };
        trace!("Incoming media: audio={} camera={} screen={}", audio, camera, screen);
        transport.enable_audio_incoming(audio);
        transport.enable_video_incoming(camera, false);
        transport.enable_video_incoming(screen, true);
    }

    pub fn on_stream_end(&self, callback: StreamEndCallback) {
        self.inner.observers.set_stream_end(callback);
    }

    pub fn on_upgrade(&self, callback: UpgradeCallback) {
        self.inner.observers.set_upgrade(callback);
    }

    pub fn on_frame(&self, callback: FrameCallback) {
        self.inner.observers.set_frame(callback);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.table.read().closed
    }

    /// Drop every endpoint, reader and writer and silence all observers.
    /// Idempotent.
    pub fn close(&self) {
        let mut retired = Retired::default();
        {
            let mut table = self.inner.table.write();
            if table.closed {
                return;
            }
            table.closed = true;
            self.inner.observers.clear();
            for sink in table.audio_sinks.values() {
                sink.set_handler(None);
            }
            for sink in table.video_sinks.values() {
                sink.set_handler(None);
            }
            retired.readers.extend(table.readers.drain().map(|(_, reader)| reader));
            retired.writers.extend(table.writers.drain().map(|(_, writer)| writer));
            table.external_readers.clear();
            table.external_writers.clear();
            table.endpoints.clear();
            table.descriptions.clear();
        }
        debug!(
            "Closing stream manager: {} readers, {} writers",
            retired.readers.len(),
            retired.writers.len()
        );
        drop(retired);
        info!("Stream manager closed");
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for StreamManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.inner.table.read();
        f.debug_struct("StreamManager")
            .field("initialized", &table.initialized)
            .field("closed", &table.closed)
            .field("endpoints", &table.endpoints.len())
            .field("readers", &table.readers.len())
            .field("writers", &table.writers.len())
            .finish()
    }
}

impl ManagerInner {
    fn apply(self: &Arc<Self>, mode: Mode, desc: &MediaDescription, retired: &mut Retired) -> Result<()> {
        let mut table = self.table.write();
        if table.closed {
            return Err(MediaError::connection("Stream manager is closed"));
        }

        if mode == Mode::Capture && !table.video_simulcast && desc.camera.is_some() && desc.screen.is_some() {
            return Err(MediaError::invalid_params("Cannot mix camera and screen sources"));
        }
        for device in Device::ALL {
            if let Some(sub) = desc.get(device) {
                sub.validate()?;
                if mode == Mode::Playback && device.is_video() && !sub.is_external() {
                    return Err(MediaError::invalid_params("Invalid input mode"));
                }
            }
        }

        let open_now = table.initialized || table.started;
        let mut changes = Vec::new();
        for device in Device::ALL {
            match desc.get(device) {
                Some(sub) => {
                    let key = StreamKey::new(mode, device);
                    let unchanged = table.descriptions.get(&key) == Some(&sub)
                        && !table.io_missing(mode, device, &sub);
                    if unchanged {
                        continue;
                    }
                    match self.prepare(&mut table, mode, device, sub) {
                        Ok(change) => changes.push(change),
                        Err(e) => {
                            retired.take_prepared(changes);
                            warn!("Failed to configure {} {}: {}", mode, device, e);
                            return Err(e);
                        }
                    }
                }
                None => {
                    if table.descriptions.contains_key(&StreamKey::new(mode, device))
                        || table.has_device(mode, device)
                    {
                        changes.push(Change::Remove(device));
                    }
                }
            }
        }

        let had_changes = !changes.is_empty();
        let mut configured = Vec::new();
        for change in changes {
            match change {
                Change::Remove(device) => self.remove_device(&mut table, mode, device, retired),
                Change::Configure {
                    device,
                    description,
                    endpoint,
                    io,
                } => {
                    self.commit(&mut table, mode, device, description, endpoint, io, retired);
                    configured.push(device);
                }
            }
        }

        // Only committed io may start producing frames
        let mut open_error = None;
        if open_now {
            for device in configured {
                let opened = match mode {
                    Mode::Capture => table.readers.get(&device).map(MediaReader::open),
                    Mode::Playback => table.writers.get(&device).map(|writer| writer.open()),
                };
                if let Some(Err(e)) = opened {
                    warn!("Failed to open {} {}: {}", mode, device, e);
                    open_error.get_or_insert(e);
                }
            }
        }

        if mode == Mode::Capture {
            if table.initialized {
                self.check_upgrade(&mut table);
            } else {
                table.initialized = true;
                table.last_state = table.media_state();
                debug!("Stream manager initialized");
            }
        }

        if had_changes {
            info!(
                "Applied {} sources: {} endpoints, {} readers, {} writers",
                mode,
                table.endpoints.len(),
                table.readers.len(),
                table.writers.len()
            );
        }
        open_error.map_or(Ok(()), Err)
    }

    /// Build the endpoint and io of one device. Only creates tracks and
    /// sinks in the table, which persist anyway.
    fn prepare(
        self: &Arc<Self>,
        table: &mut StreamTable,
        mode: Mode,
        device: Device,
        description: StreamDescription,
    ) -> Result<Change> {
        let key = table.endpoint_key(mode, device);
        let track = match mode {
            Mode::Capture => Some(table.track_for(key)),
            Mode::Playback => None,
        };
        let endpoint = Endpoint::build(mode, &description, track)?;

        let io = match (mode, description.is_external()) {
            (Mode::Capture, true) => PreparedIo::ExternalReader,
            (Mode::Playback, true) => PreparedIo::ExternalWriter,
            (Mode::Capture, false) => {
                PreparedIo::Reader(self.build_reader(device, &description, &endpoint)?)
            }
            (Mode::Playback, false) => {
                PreparedIo::Writer(self.build_writer(device, &description)?)
            }
        };

        trace!("Prepared {} {} from {:?}", mode, device, description.media_source());
        Ok(Change::Configure {
            device,
            description,
            endpoint,
            io,
        })
    }

    fn build_reader(
        self: &Arc<Self>,
        device: Device,
        description: &StreamDescription,
        endpoint: &Endpoint,
    ) -> Result<MediaReader> {
        let source = self.factory.create_source(device, description)?;
        let id = self.next_io_id.fetch_add(1, Ordering::Relaxed);
        let mut template = FrameData::default();
        if let StreamDescription::Video(video) = description {
            template.width = video.width;
            template.height = video.height;
        }
        let reader = MediaReader::new(id, device, source, description.geometry(), self.lanes, template)?;

        let shared = device.is_video() && description.media_source() == MediaSource::Device;
        let endpoint = endpoint.clone();
        let observers = Arc::clone(&self.observers);
        reader.on_data(Arc::new(move |data: Bytes, mut frame_data: FrameData| {
            frame_data.absolute_capture_timestamp_ms = now_ms();
            if shared {
                observers.emit_frame(0, Mode::Capture, device, data.clone(), frame_data);
            }
            if let Err(e) = endpoint.send_data(data, frame_data) {
                trace!("Dropping {} frame: {}", device, e);
            }
        }));

        let queue = Arc::clone(&self.update_queue);
        let weak: Weak<ManagerInner> = Arc::downgrade(self);
        reader.on_eof(Box::new(move || {
            queue.post(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_reader_eof(device, id);
                }
            });
        }));
        Ok(reader)
    }

    fn build_writer(self: &Arc<Self>, device: Device, description: &StreamDescription) -> Result<Arc<AudioWriter>> {
        let sink = self.factory.create_sink(device, description)?;
        let id = self.next_io_id.fetch_add(1, Ordering::Relaxed);
        let writer = Arc::new(AudioWriter::new(id, sink, description.geometry().frame_size));

        let queue = Arc::clone(&self.update_queue);
        let weak: Weak<ManagerInner> = Arc::downgrade(self);
        writer.on_eof(Box::new(move || {
            queue.post(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_writer_eof(device, id);
                }
            });
        }));
        Ok(writer)
    }

    fn commit(
        &self,
        table: &mut StreamTable,
        mode: Mode,
        device: Device,
        description: StreamDescription,
        endpoint: Endpoint,
        io: PreparedIo,
        retired: &mut Retired,
    ) {
        let key = table.endpoint_key(mode, device);
        if let Some(stale) = table.slot_key(mode, device).filter(|stale| *stale != key) {
            table.endpoints.remove(&stale);
        }
        table.endpoints.insert(
            key,
            EndpointSlot {
                device,
                endpoint: endpoint.clone(),
            },
        );
        table.descriptions.insert(StreamKey::new(mode, device), description);

        match io {
            PreparedIo::Reader(reader) => {
                table.external_readers.remove(&device);
                if let Some(old) = table.readers.insert(device, reader) {
                    retired.readers.push(old);
                }
            }
            PreparedIo::ExternalReader => {
                if let Some(old) = table.readers.remove(&device) {
                    retired.readers.push(old);
                }
                table.external_readers.insert(device);
            }
            PreparedIo::Writer(writer) => {
                table.external_writers.remove(&device);
                let weak_writer = Arc::downgrade(&writer);
                if let Some(old) = table.writers.insert(device, writer) {
                    retired.writers.push(old);
                }
                let sink = table.audio_sink_for(key);
                sink.set_handler(Some(Arc::new(move |frames: &AudioFrames| {
                    endpoint.record_frame();
                    if let Some(writer) = weak_writer.upgrade() {
                        writer.send_frames(frames);
                    }
                })));
            }
            PreparedIo::ExternalWriter => {
                if let Some(old) = table.writers.remove(&device) {
                    retired.writers.push(old);
                }
                table.external_writers.insert(device);
                let observers = Arc::clone(&self.observers);
                if device.is_video() {
                    let sink = table.video_sink_for(key);
                    sink.set_handler(Some(Arc::new(move |source_id: u32, data: Bytes, frame_data: FrameData| {
                        endpoint.record_frame();
                        observers.emit_frame(i64::from(source_id), Mode::Playback, device, data, frame_data);
                    })));
                } else {
                    let sink = table.audio_sink_for(key);
                    sink.set_handler(Some(Arc::new(move |frames: &AudioFrames| {
                        endpoint.record_frame();
                        for (source_id, data) in frames {
                            observers.emit_frame(
                                i64::from(*source_id),
                                Mode::Playback,
                                device,
                                data.clone(),
                                FrameData::default(),
                            );
                        }
                    })));
                }
            }
        }
        debug!("Configured {} {}", mode, device);
    }

    fn remove_device(&self, table: &mut StreamTable, mode: Mode, device: Device, retired: &mut Retired) {
        if let Some(key) = table.slot_key(mode, device) {
            table.endpoints.remove(&key);
            if mode == Mode::Playback {
                if let Some(sink) = table.audio_sinks.get(&key) {
                    sink.set_handler(None);
                }
                if let Some(sink) = table.video_sinks.get(&key) {
                    sink.set_handler(None);
                }
            }
        }
        table.descriptions.remove(&StreamKey::new(mode, device));
        match mode {
            Mode::Capture => {
                if let Some(reader) = table.readers.remove(&device) {
                    retired.readers.push(reader);
                }
                table.external_readers.remove(&device);
            }
            Mode::Playback => {
                if let Some(writer) = table.writers.remove(&device) {
                    retired.writers.push(writer);
                }
                table.external_writers.remove(&device);
            }
        }
        debug!("Removed {} {}", mode, device);
    }

    fn update_pause(&self, paused: bool) -> bool {
        let mut gates = Vec::new();
        let changed = {
            let mut table = self.table.write();
            if table.closed {
                return false;
            }
            let mut changed = false;
            for reader in table.readers.values() {
                if reader.request_enabled(!paused) {
                    changed = true;
                    if paused {
                        gates.push(reader.delivery_gate());
                    }
                }
            }
            if changed {
                debug!("Capture {}", if paused { "paused" } else { "resumed" });
                self.check_upgrade(&mut table);
            }
            changed
        };
        // delivery callbacks may read the table
        for gate in gates {
            gate.wait_idle();
        }
        changed
    }

    fn update_mute(&self, muted: bool) -> bool {
        let mut table = self.table.write();
        if table.closed {
            return false;
        }
        let mut changed = false;
        for (key, track) in &table.tracks {
            if key.mode == Mode::Playback || key.device.is_video() {
                continue;
            }
            if track.set_enabled(!muted) {
                changed = true;
            }
        }
        if changed {
            debug!("Capture audio {}", if muted { "muted" } else { "unmuted" });
            self.check_upgrade(&mut table);
        }
        changed
    }

    /// Post an upgrade notification when the derived state changed since the
    /// last one. No-op before initialization.
    fn check_upgrade(&self, table: &mut StreamTable) {
        if !table.initialized || table.closed {
            return;
        }
        let state = table.media_state();
        if state == table.last_state {
            return;
        }
        table.last_state = state;
        let observers = Arc::clone(&self.observers);
        trace!("Media state changed: {:?}", state);
        self.update_queue.post(move || observers.emit_upgrade(state));
    }

    /// Runs on the update queue
    fn handle_reader_eof(&self, device: Device, id: u64) {
        let reader = {
            let mut table = self.table.write();
            if table.closed || table.readers.get(&device).map(MediaReader::id) != Some(id) {
                return;
            }
            let reader = table.readers.remove(&device);
            self.check_upgrade(&mut table);
            reader
        };
        drop(reader);
        info!("{} source reached end of stream", device);
        self.observers.emit_stream_end(device.stream_type(), device);
    }

    /// Runs on the update queue
    fn handle_writer_eof(&self, device: Device, id: u64) {
        let writer = {
            let mut table = self.table.write();
            if table.closed || table.writers.get(&device).map(|w| w.id()) != Some(id) {
                return;
            }
            table.writers.remove(&device)
        };
        drop(writer);
        debug!("{} output ended", device);
    }
}
