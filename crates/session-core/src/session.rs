//! Call session and its connection lifecycle
//!
//! A [`CallSession`] owns one [`StreamManager`] and up to two transport
//! connections: the call itself and an optional presentation. It turns the
//! raw transport signals of a connection attempt into session level events:
//!
//! - `Connecting` is raised when the attempt starts
//! - the first transport `Connected` starts the stream manager and raises
//!   `Connected`, later ones are ignored
//! - transport `Connecting` after `Connected` is a silent reconnect
//! - transport `Failed` raises `Failed`, `Disconnected` and `Closed` raise
//!   `Closed`; both end the attempt and unregister the transport callback
//! - an attempt not connected within the configured timeout ends with
//!   `Timeout`
//!
//! Transport signals and the timeout are handled on the session's network
//! queue. The lifecycle mutex only guards connection bookkeeping and is never
//! held while calling into the stream manager, a transport or an observer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use callcore_infra_common::DispatchQueue;
use callcore_media_core::{
    Device, FrameCallback, FrameData, MediaDescription, MediaState, MediaStatus, Mode, NetworkInterface,
    Status, StreamEndCallback, StreamManager, TransportState, UpgradeCallback,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use crate::config::SessionConfig;
use crate::errors::{Result, SessionError};
use crate::state::{CallNetworkState, ConnectionKind, ConnectionState};

/// Receives every session level connection event
pub type ConnectionChangeHandler = Arc<dyn Fn(CallNetworkState) + Send + Sync>;

/// Bookkeeping of the current connection attempt of one kind
#[derive(Debug, Default, Clone, Copy)]
struct Attempt {
    generation: u64,
    connected: bool,
    finished: bool,
}

#[derive(Default)]
struct Lifecycle {
    connection: Option<Arc<dyn NetworkInterface>>,
    presentation: Option<Arc<dyn NetworkInterface>>,
    normal_attempt: Attempt,
    presentation_attempt: Attempt,
    next_generation: u64,
    /// Set by the first Connected of any attempt
    streams_started: bool,
}

impl Lifecycle {
    fn connection(&self, kind: ConnectionKind) -> Option<&Arc<dyn NetworkInterface>> {
        match kind {
            ConnectionKind::Normal => self.connection.as_ref(),
            ConnectionKind::Presentation => self.presentation.as_ref(),
        }
    }

    fn attempt_mut(&mut self, kind: ConnectionKind) -> &mut Attempt {
        match kind {
            ConnectionKind::Normal => &mut self.normal_attempt,
            ConnectionKind::Presentation => &mut self.presentation_attempt,
        }
    }
}

struct SessionInner {
    config: SessionConfig,
    stream_manager: StreamManager,
    network_queue: DispatchQueue,
    lifecycle: Mutex<Lifecycle>,
    connection_change: RwLock<Option<ConnectionChangeHandler>>,
    exiting: AtomicBool,
}

/// One call: a stream manager plus its transport connections
pub struct CallSession {
    inner: Arc<SessionInner>,
}

impl CallSession {
    /// Create a session whose stream manager posts notifications onto
    /// `update_queue`
    pub fn new(update_queue: Arc<DispatchQueue>, config: SessionConfig) -> Result<Self> {
        let network_queue = DispatchQueue::new("call-network")?;
        let stream_manager = StreamManager::new(update_queue, config.stream.clone());
        Ok(Self::from_parts(config, stream_manager, network_queue))
    }

    /// Create a session around an already built stream manager
    pub fn with_stream_manager(config: SessionConfig, stream_manager: StreamManager) -> Result<Self> {
        let network_queue = DispatchQueue::new("call-network")?;
        Ok(Self::from_parts(config, stream_manager, network_queue))
    }

    fn from_parts(config: SessionConfig, stream_manager: StreamManager, network_queue: DispatchQueue) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                config,
                stream_manager,
                network_queue,
                lifecycle: Mutex::new(Lifecycle::default()),
                connection_change: RwLock::new(None),
                exiting: AtomicBool::new(false),
            }),
        }
    }

    /// Attach the call connection and apply the playback configuration.
    ///
    /// Registers the capture tracks and the incoming audio/video sinks of
    /// the call with `connection`.
    pub fn init(&self, connection: Arc<dyn NetworkInterface>, playback: &MediaDescription) -> Result<()> {
        info!("Initializing call");
        self.ensure_open()?;
        if self.inner.lifecycle.lock().connection.is_some() {
            error!("Connection already made");
            return Err(SessionError::connection("Connection already made"));
        }

        let manager = &self.inner.stream_manager;
        manager.set_stream_sources(Mode::Playback, playback)?;
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.connection.is_some() {
                return Err(SessionError::connection("Connection already made"));
            }
            lifecycle.connection = Some(Arc::clone(&connection));
        }

        manager.add_track(Mode::Capture, Device::Microphone, connection.as_ref());
        manager.add_track(Mode::Capture, Device::Camera, connection.as_ref());
        manager.add_track(Mode::Playback, Device::Microphone, connection.as_ref());
        manager.add_track(Mode::Playback, Device::Camera, connection.as_ref());
        manager.optimize_sources(connection.as_ref());
        info!("Call initialized");
        Ok(())
    }

    /// Attach the presentation connection carrying screen sharing
    pub fn init_presentation(&self, connection: Arc<dyn NetworkInterface>) -> Result<()> {
        info!("Initializing screen sharing");
        self.ensure_open()?;
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.presentation.is_some() {
                error!("Screen sharing already initialized");
                return Err(SessionError::connection("Screen sharing already initialized"));
            }
            lifecycle.presentation = Some(Arc::clone(&connection));
        }

        let manager = &self.inner.stream_manager;
        // without simulcast the screen shares the camera track of the call
        if manager.video_simulcast() {
            manager.add_track(Mode::Capture, Device::Screen, connection.as_ref());
        }
        manager.add_track(Mode::Playback, Device::Speaker, connection.as_ref());
        manager.add_track(Mode::Playback, Device::Screen, connection.as_ref());
        info!("Screen sharing initialized");
        Ok(())
    }

    /// Start a connection attempt on the call or presentation connection
    pub fn connect(&self, kind: ConnectionKind) -> Result<()> {
        self.ensure_open()?;
        let (connection, generation) = {
            let mut lifecycle = self.inner.lifecycle.lock();
            let connection = match lifecycle.connection(kind) {
                Some(connection) => Arc::clone(connection),
                None => {
                    error!("Connection not initialized");
                    return Err(SessionError::connection("Connection not initialized"));
                }
            };
            lifecycle.next_generation += 1;
            let generation = lifecycle.next_generation;
            *lifecycle.attempt_mut(kind) = Attempt {
                generation,
                ..Attempt::default()
            };
            (connection, generation)
        };

        info!("Connecting {} connection", kind);
        self.inner.emit(CallNetworkState::new(ConnectionState::Connecting, kind));

        let weak = Arc::downgrade(&self.inner);
        connection.on_connection_change(Some(Arc::new(move |state: TransportState| {
            SessionInner::post_transport_state(&weak, kind, generation, state);
        })));

        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        self.inner
            .network_queue
            .post_delayed(self.inner.config.connection_timeout, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_timeout(kind, generation);
                }
            });
        Ok(())
    }

    /// Close the presentation connection. Without `force` a missing
    /// presentation is ignored, with it the call fails.
    pub fn stop_presentation(&self, force: bool) -> Result<()> {
        let presentation = {
            let mut lifecycle = self.inner.lifecycle.lock();
            let presentation = lifecycle.presentation.take();
            if presentation.is_some() {
                // late signals of the closed attempt are ignored
                lifecycle.presentation_attempt.finished = true;
            }
            presentation
        };
        match presentation {
            Some(presentation) => {
                presentation.on_connection_change(None);
                presentation.close();
                info!("Screen sharing stopped");
                Ok(())
            }
            None if force => Err(SessionError::connection("Presentation not initialized")),
            None => Ok(()),
        }
    }

    /// Apply the configuration of one mode. A playback change also updates
    /// which remote media the call connection receives.
    pub fn set_stream_sources(&self, mode: Mode, desc: &MediaDescription) -> Result<()> {
        self.inner.stream_manager.set_stream_sources(mode, desc)?;
        if mode == Mode::Playback {
            let connection = self.inner.lifecycle.lock().connection.clone();
            if let Some(connection) = connection {
                self.inner.stream_manager.optimize_sources(connection.as_ref());
            }
        }
        Ok(())
    }

    pub fn pause(&self) -> bool {
        self.inner.stream_manager.pause()
    }

    pub fn resume(&self) -> bool {
        self.inner.stream_manager.resume()
    }

    pub fn mute(&self) -> bool {
        self.inner.stream_manager.mute()
    }

    pub fn unmute(&self) -> bool {
        self.inner.stream_manager.unmute()
    }

    pub fn time(&self, mode: Mode) -> Duration {
        self.inner.stream_manager.time(mode)
    }

    pub fn get_state(&self) -> MediaState {
        self.inner.stream_manager.get_state()
    }

    pub fn status(&self, mode: Mode) -> Status {
        self.inner.stream_manager.status(mode)
    }

    pub fn media_status(&self) -> MediaStatus {
        self.inner.stream_manager.media_status()
    }

    pub fn send_external_frame(&self, device: Device, data: Bytes, frame_data: FrameData) -> Result<()> {
        Ok(self.inner.stream_manager.send_external_frame(device, data, frame_data)?)
    }

    pub fn enable_video_simulcast(&self, enable: bool) {
        self.inner.stream_manager.enable_video_simulcast(enable);
    }

    pub fn on_stream_end(&self, callback: StreamEndCallback) {
        self.inner.stream_manager.on_stream_end(callback);
    }

    pub fn on_upgrade(&self, callback: UpgradeCallback) {
        self.inner.stream_manager.on_upgrade(callback);
    }

    pub fn on_frame(&self, callback: FrameCallback) {
        self.inner.stream_manager.on_frame(callback);
    }

    pub fn on_connection_change(&self, callback: ConnectionChangeHandler) {
        *self.inner.connection_change.write() = Some(callback);
    }

    /// Whether the current attempt of `kind` has connected
    pub fn is_connected(&self, kind: ConnectionKind) -> bool {
        let mut lifecycle = self.inner.lifecycle.lock();
        let attempt = *lifecycle.attempt_mut(kind);
        attempt.connected && !attempt.finished
    }

    /// Whether a connection has come up and started the streams
    pub fn is_streaming(&self) -> bool {
        self.inner.lifecycle.lock().streams_started
    }

    pub fn is_closed(&self) -> bool {
        self.inner.exiting.load(Ordering::SeqCst)
    }

    /// Tear the session down: silence the observers, close the stream
    /// manager and every connection, then stop the network queue.
    /// Idempotent, and safe to call from the session's own callbacks.
    pub fn close(&self) {
        if self.inner.exiting.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Destroying call session");
        let inner = Arc::clone(&self.inner);
        if let Err(e) = self.inner.network_queue.blocking_call(move || inner.teardown()) {
            warn!("Network queue unavailable for teardown: {}", e);
            self.inner.teardown();
        }
        self.inner.network_queue.stop();
        info!("Call session destroyed");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SessionError::connection("Session is closed"));
        }
        Ok(())
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lifecycle = self.inner.lifecycle.lock();
        f.debug_struct("CallSession")
            .field("connection", &lifecycle.connection.is_some())
            .field("presentation", &lifecycle.presentation.is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SessionInner {
    fn emit(&self, state: CallNetworkState) {
        let handler = self.connection_change.read().clone();
        if let Some(handler) = handler {
            handler(state);
        } else {
            trace!("No connection observer for {}", state);
        }
    }

    /// Called from the transport; the signal is handled on the network queue
    fn post_transport_state(weak: &Weak<SessionInner>, kind: ConnectionKind, generation: u64, state: TransportState) {
        let Some(inner) = weak.upgrade() else { return };
        let weak = Weak::clone(weak);
        inner.network_queue.post(move || {
            if let Some(inner) = weak.upgrade() {
                inner.handle_transport_state(kind, generation, state);
            }
        });
    }

    fn handle_transport_state(&self, kind: ConnectionKind, generation: u64, state: TransportState) {
        if self.exiting.load(Ordering::SeqCst) {
            return;
        }
        let (event, start_streams) = {
            let mut lifecycle = self.lifecycle.lock();
            let attempt = lifecycle.attempt_mut(kind);
            if attempt.generation != generation || attempt.finished {
                trace!("Ignoring {} signal {} of a finished attempt", kind, state);
                return;
            }
            let event = match state {
                TransportState::Connecting => {
                    if attempt.connected {
                        info!("Reconnecting...");
                    }
                    None
                }
                TransportState::Connected if attempt.connected => None,
                TransportState::Connected => {
                    attempt.connected = true;
                    Some(ConnectionState::Connected)
                }
                TransportState::Failed => {
                    attempt.finished = true;
                    Some(ConnectionState::Failed)
                }
                TransportState::Disconnected | TransportState::Closed => {
                    attempt.finished = true;
                    Some(ConnectionState::Closed)
                }
            };
            let start_streams =
                event == Some(ConnectionState::Connected) && !std::mem::replace(&mut lifecycle.streams_started, true);
            (event, start_streams)
        };
        let Some(event) = event else { return };

        match event {
            ConnectionState::Connected => {
                info!("Connection established");
                if start_streams {
                    match self.stream_manager.start() {
                        Ok(()) => info!("Stream started"),
                        Err(e) => warn!("Failed to start streams: {}", e),
                    }
                }
            }
            ConnectionState::Failed => {
                error!("Connection failed");
                self.unregister(kind);
            }
            _ => {
                info!("Connection closed");
                self.unregister(kind);
            }
        }
        self.emit(CallNetworkState::new(event, kind));
    }

    fn handle_timeout(&self, kind: ConnectionKind, generation: u64) {
        if self.exiting.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut lifecycle = self.lifecycle.lock();
            let attempt = lifecycle.attempt_mut(kind);
            if attempt.generation != generation || attempt.connected || attempt.finished {
                return;
            }
            attempt.finished = true;
        }
        error!("Connection timeout");
        self.unregister(kind);
        self.emit(CallNetworkState::new(ConnectionState::Timeout, kind));
    }

    fn unregister(&self, kind: ConnectionKind) {
        let connection = self.lifecycle.lock().connection(kind).cloned();
        if let Some(connection) = connection {
            debug!("Removing {} connection listener", kind);
            connection.on_connection_change(None);
        }
    }

    /// Runs on the network queue
    fn teardown(&self) {
        self.connection_change.write().take();
        let (connection, presentation) = {
            let mut lifecycle = self.lifecycle.lock();
            (lifecycle.connection.take(), lifecycle.presentation.take())
        };
        self.stream_manager.close();
        for connection in [connection, presentation].into_iter().flatten() {
            debug!("Removing connection listener");
            connection.on_connection_change(None);
            debug!("Closing connection");
            connection.close();
        }
        debug!("Call session torn down");
    }
}
