//! Call registry
//!
//! Owns every [`CallSession`] of an application keyed by chat id, and fans
//! the sessions' notifications out through registry level callbacks and a
//! `tokio::sync::broadcast` channel. A call whose connection ends (failed,
//! closed or timed out) is removed and torn down.
//!
//! Sessions are stored behind an `Arc` and cloned out of the map before
//! being called, so no map guard is ever held across a session call.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use callcore_infra_common::DispatchQueue;
use callcore_media_core::{Device, FrameData, MediaDescription, MediaState, MediaStatus, Mode, NetworkInterface, Status, StreamType};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::config::RegistryConfig;
use crate::errors::{Result, SessionError};
use crate::session::CallSession;
use crate::state::{CallNetworkState, ConnectionKind};

/// Notification of one call, as published to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CallEvent {
    ConnectionChange { chat_id: i64, state: CallNetworkState },
    StreamEnd { chat_id: i64, stream_type: StreamType, device: Device },
    Upgrade { chat_id: i64, state: MediaState },
}

impl CallEvent {
    pub fn chat_id(&self) -> i64 {
        match self {
            CallEvent::ConnectionChange { chat_id, .. }
            | CallEvent::StreamEnd { chat_id, .. }
            | CallEvent::Upgrade { chat_id, .. } => *chat_id,
        }
    }
}

pub type CallStreamEndHandler = Arc<dyn Fn(i64, StreamType, Device) + Send + Sync>;
pub type CallUpgradeHandler = Arc<dyn Fn(i64, MediaState) + Send + Sync>;
pub type CallConnectionHandler = Arc<dyn Fn(i64, CallNetworkState) + Send + Sync>;
/// Receives (chat id, source id, mode, device, payload, frame data)
pub type CallFrameHandler = Arc<dyn Fn(i64, i64, Mode, Device, Bytes, FrameData) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    stream_end: RwLock<Option<CallStreamEndHandler>>,
    upgrade: RwLock<Option<CallUpgradeHandler>>,
    connection_change: RwLock<Option<CallConnectionHandler>>,
    frame: RwLock<Option<CallFrameHandler>>,
}

struct RegistryInner {
    config: RegistryConfig,
    calls: DashMap<i64, Arc<CallSession>>,
    update_queue: Arc<DispatchQueue>,
    handlers: Handlers,
    events: broadcast::Sender<CallEvent>,
}

/// All calls of an application, keyed by chat id
pub struct CallRegistry {
    inner: Arc<RegistryInner>,
}

impl CallRegistry {
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let update_queue = Arc::new(DispatchQueue::new("call-updates")?);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Ok(Self {
            inner: Arc::new(RegistryInner {
                config,
                calls: DashMap::new(),
                update_queue,
                handlers: Handlers::default(),
                events,
            }),
        })
    }

    /// Create a call on `connection` with its playback configuration
    pub fn create_call(
        &self,
        chat_id: i64,
        connection: Arc<dyn NetworkInterface>,
        playback: &MediaDescription,
    ) -> Result<()> {
        if self.exists(chat_id) {
            return Err(already_exists(chat_id));
        }
        let session = CallSession::new(Arc::clone(&self.inner.update_queue), self.inner.config.session.clone())?;
        self.inner.observe(chat_id, &session);
        session.init(connection, playback)?;

        let rejected = match self.inner.calls.entry(chat_id) {
            Entry::Occupied(_) => Some(session),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(session));
                None
            }
        };
        if let Some(session) = rejected {
            drop(session);
            return Err(already_exists(chat_id));
        }
        info!("Call {} created", chat_id);
        Ok(())
    }

    pub fn init_presentation(&self, chat_id: i64, connection: Arc<dyn NetworkInterface>) -> Result<()> {
        self.session(chat_id)?.init_presentation(connection)
    }

    pub fn connect(&self, chat_id: i64, kind: ConnectionKind) -> Result<()> {
        self.session(chat_id)?.connect(kind)
    }

    pub fn stop_presentation(&self, chat_id: i64, force: bool) -> Result<()> {
        self.session(chat_id)?.stop_presentation(force)
    }

    pub fn set_stream_sources(&self, chat_id: i64, mode: Mode, desc: &MediaDescription) -> Result<()> {
        self.session(chat_id)?.set_stream_sources(mode, desc)
    }

    pub fn pause(&self, chat_id: i64) -> Result<bool> {
        Ok(self.session(chat_id)?.pause())
    }

    pub fn resume(&self, chat_id: i64) -> Result<bool> {
        Ok(self.session(chat_id)?.resume())
    }

    pub fn mute(&self, chat_id: i64) -> Result<bool> {
        Ok(self.session(chat_id)?.mute())
    }

    pub fn unmute(&self, chat_id: i64) -> Result<bool> {
        Ok(self.session(chat_id)?.unmute())
    }

    /// Remove the call and tear it down
    pub fn stop(&self, chat_id: i64) -> Result<()> {
        let (_, session) = self
            .inner
            .calls
            .remove(&chat_id)
            .ok_or_else(|| SessionError::not_found(chat_id))?;
        drop(session);
        info!("Call {} stopped", chat_id);
        Ok(())
    }

    pub fn time(&self, chat_id: i64, mode: Mode) -> Result<Duration> {
        Ok(self.session(chat_id)?.time(mode))
    }

    pub fn get_state(&self, chat_id: i64) -> Result<MediaState> {
        Ok(self.session(chat_id)?.get_state())
    }

    pub fn status(&self, chat_id: i64, mode: Mode) -> Result<Status> {
        Ok(self.session(chat_id)?.status(mode))
    }

    /// Media status of every call
    pub fn calls(&self) -> HashMap<i64, MediaStatus> {
        let sessions: Vec<(i64, Arc<CallSession>)> = self
            .inner
            .calls
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        sessions
            .into_iter()
            .map(|(chat_id, session)| (chat_id, session.media_status()))
            .collect()
    }

    pub fn send_external_frame(&self, chat_id: i64, device: Device, data: Bytes, frame_data: FrameData) -> Result<()> {
        self.session(chat_id)?.send_external_frame(device, data, frame_data)
    }

    pub fn exists(&self, chat_id: i64) -> bool {
        self.inner.calls.contains_key(&chat_id)
    }

    /// Receive every call event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.inner.events.subscribe()
    }

    pub fn on_stream_end(&self, handler: CallStreamEndHandler) {
        *self.inner.handlers.stream_end.write() = Some(handler);
    }

    pub fn on_upgrade(&self, handler: CallUpgradeHandler) {
        *self.inner.handlers.upgrade.write() = Some(handler);
    }

    pub fn on_connection_change(&self, handler: CallConnectionHandler) {
        *self.inner.handlers.connection_change.write() = Some(handler);
    }

    pub fn on_frame(&self, handler: CallFrameHandler) {
        *self.inner.handlers.frame.write() = Some(handler);
    }

    /// Stop every call. Also run on drop.
    pub fn close(&self) {
        let chat_ids: Vec<i64> = self.inner.calls.iter().map(|entry| *entry.key()).collect();
        for chat_id in chat_ids {
            if let Some((_, session)) = self.inner.calls.remove(&chat_id) {
                drop(session);
                debug!("Call {} closed with the registry", chat_id);
            }
        }
    }

    fn session(&self, chat_id: i64) -> Result<Arc<CallSession>> {
        self.inner
            .calls
            .get(&chat_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SessionError::not_found(chat_id))
    }
}

impl Drop for CallRegistry {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for CallRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRegistry")
            .field("calls", &self.inner.calls.len())
            .field("subscribers", &self.inner.events.receiver_count())
            .finish()
    }
}

fn already_exists(chat_id: i64) -> SessionError {
    SessionError::connection(format!("Connection with chat id {} already exists", chat_id))
}

impl RegistryInner {
    /// Route the session's notifications to the registry observers
    fn observe(self: &Arc<Self>, chat_id: i64, session: &CallSession) {
        let weak = Arc::downgrade(self);
        session.on_stream_end(Arc::new(move |stream_type: StreamType, device: Device| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_stream_end(chat_id, stream_type, device);
            }
        }));

        let weak = Arc::downgrade(self);
        session.on_upgrade(Arc::new(move |state: MediaState| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_upgrade(chat_id, state);
            }
        }));

        let weak = Arc::downgrade(self);
        session.on_connection_change(Arc::new(move |state: CallNetworkState| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_connection_change(chat_id, state);
            }
        }));

        let weak: Weak<RegistryInner> = Arc::downgrade(self);
        session.on_frame(Arc::new(
            move |source_id: i64, mode: Mode, device: Device, data: Bytes, frame_data: FrameData| {
                let Some(inner) = weak.upgrade() else { return };
                let handler = inner.handlers.frame.read().clone();
                if let Some(handler) = handler {
                    handler(chat_id, source_id, mode, device, data, frame_data);
                }
            },
        ));
    }

    fn handle_stream_end(&self, chat_id: i64, stream_type: StreamType, device: Device) {
        debug!("Call {}: {} stream ended", chat_id, device);
        let handler = self.handlers.stream_end.read().clone();
        if let Some(handler) = handler {
            handler(chat_id, stream_type, device);
        }
        self.publish(CallEvent::StreamEnd {
            chat_id,
            stream_type,
            device,
        });
    }

    fn handle_upgrade(&self, chat_id: i64, state: MediaState) {
        let handler = self.handlers.upgrade.read().clone();
        if let Some(handler) = handler {
            handler(chat_id, state);
        }
        self.publish(CallEvent::Upgrade { chat_id, state });
    }

    fn handle_connection_change(&self, chat_id: i64, state: CallNetworkState) {
        info!("Call {} connection {}", chat_id, state);
        if state.state.is_terminal() && state.kind == ConnectionKind::Normal {
            if let Some((_, session)) = self.calls.remove(&chat_id) {
                drop(session);
                debug!("Call {} removed", chat_id);
            }
        }
        let handler = self.handlers.connection_change.read().clone();
        if let Some(handler) = handler {
            handler(chat_id, state);
        }
        self.publish(CallEvent::ConnectionChange { chat_id, state });
    }

    fn publish(&self, event: CallEvent) {
        if self.events.send(event).is_err() {
            trace!("No subscribers listening for call events");
        }
    }
}
