//! Transport seam
//!
//! The negotiation and RTP layer is an external collaborator. The stream
//! manager and the session only need the narrow [`NetworkInterface`]: bind
//! tracks and sinks, toggle incoming media, and report connection state.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::endpoint::{LocalTrack, RemoteAudioSink, RemoteVideoSink};

/// Low-level connection state reported by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Disconnected => "disconnected",
            TransportState::Failed => "failed",
            TransportState::Closed => "closed",
        };
        f.write_str(name)
    }
}

pub type ConnectionChangeCallback = Arc<dyn Fn(TransportState) + Send + Sync>;

/// Everything the session core needs from a transport
pub trait NetworkInterface: Send + Sync {
    /// Bind an outgoing track. Implementations attach their consumer with
    /// [`LocalTrack::set_output`].
    fn add_outgoing_track(&self, track: Arc<LocalTrack>);

    /// Bind the sink receiving remote audio
    fn add_incoming_audio(&self, sink: Arc<RemoteAudioSink>);

    /// Bind the sink receiving remote camera or screen video
    fn add_incoming_video(&self, sink: Arc<RemoteVideoSink>, is_screencast: bool);

    fn enable_audio_incoming(&self, enable: bool);

    fn enable_video_incoming(&self, enable: bool, is_screencast: bool);

    /// Register, or clear with `None`, the connection state callback
    fn on_connection_change(&self, callback: Option<ConnectionChangeCallback>);

    fn close(&self);
}
