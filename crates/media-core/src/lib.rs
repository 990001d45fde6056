//! # callcore-media-core
//!
//! Media plumbing of one call session:
//!
//! - [`scheduler`]: the multi-lane frame pacing engine
//! - [`io`]: frame sources and sinks, the paced [`MediaReader`] and the
//!   [`AudioWriter`]
//! - [`endpoint`]: capture and playback endpoints with their transport
//!   facing tracks and sinks
//! - [`stream`]: the [`StreamManager`] owning the endpoint table
//! - [`transport`]: the [`NetworkInterface`] seam to the negotiation layer
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use callcore_infra_common::DispatchQueue;
//! use callcore_media_core::prelude::*;
//!
//! # fn main() -> callcore_media_core::Result<()> {
//! let updates = Arc::new(DispatchQueue::new("updates")?);
//! let manager = StreamManager::new(updates, StreamManagerConfig::default());
//!
//! let capture = MediaDescription::new()
//!     .with_microphone(AudioDescription::new(MediaSource::Shell, "cat /dev/zero", 48000, 2));
//! manager.set_stream_sources(Mode::Capture, &capture)?;
//! manager.start()?;
//! assert_eq!(manager.status(Mode::Capture), Status::Active);
//! # Ok(())
//! # }
//! ```

pub mod description;
pub mod endpoint;
pub mod error;
pub mod io;
pub mod scheduler;
pub mod stream;
pub mod transport;
pub mod types;

pub use description::{AudioDescription, FrameGeometry, MediaDescription, MediaSource, StreamDescription, VideoDescription};
pub use endpoint::{Endpoint, LocalTrack, RemoteAudioSink, RemoteVideoSink};
pub use error::{MediaError, Result};
pub use io::{AudioWriter, FrameSink, FrameSource, MediaReader, MediaSourceFactory};
pub use scheduler::{DeliveryGate, FrameScheduler, ScheduledFrame, SchedulerConfig};
pub use stream::{FrameCallback, StreamEndCallback, StreamManager, StreamManagerConfig, UpgradeCallback};
pub use transport::{ConnectionChangeCallback, NetworkInterface, TransportState};
pub use types::{AudioFrames, Device, FrameData, MediaState, MediaStatus, Mode, Status, StreamKey, StreamType};

pub mod prelude {
    pub use crate::description::{AudioDescription, MediaDescription, MediaSource, VideoDescription};
    pub use crate::error::{MediaError, Result};
    pub use crate::stream::{StreamManager, StreamManagerConfig};
    pub use crate::transport::{NetworkInterface, TransportState};
    pub use crate::types::{Device, FrameData, MediaState, MediaStatus, Mode, Status, StreamType};
}
