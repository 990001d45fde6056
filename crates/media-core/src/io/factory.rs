//! Source and sink construction
//!
//! The stream manager never builds sources itself; it asks a
//! [`MediaSourceFactory`]. [`DefaultSourceFactory`] covers file and shell
//! backed streams. Device capture needs an application supplied factory.

use std::sync::Arc;

use super::{FileSink, FileSource, FrameSink, FrameSource, ShellSink, ShellSource};
use crate::description::{MediaSource, StreamDescription};
use crate::error::{MediaError, Result};
use crate::types::Device;

pub trait MediaSourceFactory: Send + Sync {
    /// Build the capture source of `device`
    fn create_source(&self, device: Device, desc: &StreamDescription) -> Result<Arc<dyn FrameSource>>;

    /// Build the playback sink of `device`
    fn create_sink(&self, device: Device, desc: &StreamDescription) -> Result<Arc<dyn FrameSink>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSourceFactory;

impl MediaSourceFactory for DefaultSourceFactory {
    fn create_source(&self, device: Device, desc: &StreamDescription) -> Result<Arc<dyn FrameSource>> {
        match desc.media_source() {
            MediaSource::File => Ok(Arc::new(FileSource::open(desc.input())?)),
            MediaSource::Shell => Ok(Arc::new(ShellSource::spawn(desc.input())?)),
            other => Err(MediaError::invalid_params(format!(
                "No {:?} source backend for {}",
                other, device
            ))),
        }
    }

    fn create_sink(&self, device: Device, desc: &StreamDescription) -> Result<Arc<dyn FrameSink>> {
        match desc.media_source() {
            MediaSource::File => Ok(Arc::new(FileSink::create(desc.input())?)),
            MediaSource::Shell => Ok(Arc::new(ShellSink::spawn(desc.input())?)),
            other => Err(MediaError::invalid_params(format!(
                "No {:?} sink backend for {}",
                other, device
            ))),
        }
    }
}
