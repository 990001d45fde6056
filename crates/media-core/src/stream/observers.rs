use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::types::{Device, FrameData, MediaState, Mode, StreamType};

/// A capture reader reached end of stream
pub type StreamEndCallback = Arc<dyn Fn(StreamType, Device) + Send + Sync>;

/// The derived media state changed
pub type UpgradeCallback = Arc<dyn Fn(MediaState) + Send + Sync>;

/// A frame for the application: `(source_id, mode, device, payload, frame_data)`.
/// Local frames carry source id 0, remote frames their transport source id.
pub type FrameCallback = Arc<dyn Fn(i64, Mode, Device, Bytes, FrameData) + Send + Sync>;

/// Single-slot callbacks, last registration wins
#[derive(Default)]
pub(crate) struct Observers {
    stream_end: RwLock<Option<StreamEndCallback>>,
    upgrade: RwLock<Option<UpgradeCallback>>,
    frame: RwLock<Option<FrameCallback>>,
}

impl Observers {
    pub fn set_stream_end(&self, callback: StreamEndCallback) {
        *self.stream_end.write() = Some(callback);
    }

    pub fn set_upgrade(&self, callback: UpgradeCallback) {
        *self.upgrade.write() = Some(callback);
    }

    pub fn set_frame(&self, callback: FrameCallback) {
        *self.frame.write() = Some(callback);
    }

    pub fn emit_stream_end(&self, stream_type: StreamType, device: Device) {
        let callback = self.stream_end.read().clone();
        if let Some(callback) = callback {
            callback(stream_type, device);
        }
    }

    pub fn emit_upgrade(&self, state: MediaState) {
        let callback = self.upgrade.read().clone();
        if let Some(callback) = callback {
            callback(state);
        }
    }

    pub fn emit_frame(&self, source_id: i64, mode: Mode, device: Device, data: Bytes, frame_data: FrameData) {
        let callback = self.frame.read().clone();
        if let Some(callback) = callback {
            callback(source_id, mode, device, data, frame_data);
        }
    }

    pub fn clear(&self) {
        self.stream_end.write().take();
        self.upgrade.write().take();
        self.frame.write().take();
    }
}
