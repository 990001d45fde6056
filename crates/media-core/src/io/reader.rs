//! Paced capture reader
//!
//! A [`MediaReader`] drains a [`FrameSource`] through a [`FrameScheduler`]
//! and hands every frame to its data handler. Handlers may be replaced at
//! any time; the lanes only ever clone the current handler out of its slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::FrameSource;
use crate::description::FrameGeometry;
use crate::error::Result;
use crate::scheduler::{DeliveryGate, FrameScheduler, SchedulerConfig};
use crate::types::{Device, FrameData};

/// Receives one captured frame
pub type DataHandler = Arc<dyn Fn(Bytes, FrameData) + Send + Sync>;

/// Fired once when the source is exhausted or failed
pub type EofHandler = Box<dyn FnOnce() + Send + 'static>;

pub struct MediaReader {
    id: u64,
    device: Device,
    source: Arc<dyn FrameSource>,
    scheduler: FrameScheduler,
    frame_template: FrameData,
    on_data: Arc<Mutex<Option<DataHandler>>>,
    on_eof: Arc<Mutex<Option<EofHandler>>>,
    opened: AtomicBool,
}

impl MediaReader {
    /// Wrap `source`. `frame_template` carries the static metadata (video
    /// dimensions) attached to every frame.
    pub fn new(
        id: u64,
        device: Device,
        source: Arc<dyn FrameSource>,
        geometry: FrameGeometry,
        lanes: usize,
        frame_template: FrameData,
    ) -> Result<Self> {
        let config = SchedulerConfig::new(geometry.frame_size, geometry.frame_time).with_lanes(lanes);
        let scheduler = FrameScheduler::new(format!("{}-reader-{}", device, id), config)?;
        Ok(Self {
            id,
            device,
            source,
            scheduler,
            frame_template,
            on_data: Arc::new(Mutex::new(None)),
            on_eof: Arc::new(Mutex::new(None)),
            opened: AtomicBool::new(false),
        })
    }

    /// Unique id, used to tell a replaced reader from its successor
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn on_data(&self, handler: DataHandler) {
        *self.on_data.lock() = Some(handler);
    }

    pub fn on_eof(&self, handler: EofHandler) {
        *self.on_eof.lock() = Some(handler);
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    /// Start the scheduler. Opening an already open reader is a no-op.
    pub fn open(&self) -> Result<()> {
        if self.opened.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let source = Arc::clone(&self.source);
        let on_data = Arc::clone(&self.on_data);
        let on_eof = Arc::clone(&self.on_eof);
        let template = self.frame_template;

        self.scheduler.run(
            move |size| source.read(size),
            move |frame| {
                let handler = on_data.lock().clone();
                if let Some(handler) = handler {
                    handler(frame.data, template);
                } else {
                    trace!("Dropping frame {}, no handler", frame.sequence);
                }
            },
            move || {
                let handler = on_eof.lock().take();
                if let Some(handler) = handler {
                    handler();
                }
            },
        )?;
        debug!("Reader {} for {} opened", self.id, self.device);
        Ok(())
    }

    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.scheduler.set_enabled(enabled)
    }

    /// Flip delivery without waiting; see [`FrameScheduler::request_enabled`]
    pub fn request_enabled(&self, enabled: bool) -> bool {
        self.scheduler.request_enabled(enabled)
    }

    pub fn delivery_gate(&self) -> DeliveryGate {
        self.scheduler.delivery_gate()
    }

    pub fn is_enabled(&self) -> bool {
        self.scheduler.is_enabled()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Stop delivering, release the source and join the lanes. Idempotent.
    pub fn close(&self) {
        self.scheduler.stop();
        self.source.close();
        self.scheduler.close();
        self.on_data.lock().take();
        self.on_eof.lock().take();
    }
}

impl Drop for MediaReader {
    fn drop(&mut self) {
        self.close();
        trace!("Reader {} for {} dropped", self.id, self.device);
    }
}

impl std::fmt::Debug for MediaReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaReader")
            .field("id", &self.id)
            .field("device", &self.device)
            .field("open", &self.is_open())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
