//! Frame sources, sinks and the reader/writer wrappers around them
//!
//! A [`FrameSource`] yields raw frames of a requested size, a [`FrameSink`]
//! consumes them. [`MediaReader`] paces a source through a
//! [`FrameScheduler`](crate::scheduler::FrameScheduler), [`AudioWriter`]
//! feeds a sink from its own thread. Which source backs a device is decided
//! by a [`MediaSourceFactory`].

use bytes::Bytes;

use crate::error::Result;

pub mod factory;
pub mod file;
pub mod reader;
pub mod shell;
pub mod writer;

pub use factory::{DefaultSourceFactory, MediaSourceFactory};
pub use file::{FileSink, FileSource};
pub use reader::MediaReader;
pub use shell::{ShellSink, ShellSource};
pub use writer::AudioWriter;

/// Blocking source of raw frames
pub trait FrameSource: Send + Sync {
    /// Read exactly one frame of `size` bytes. Returns `Ok(None)` at end of
    /// stream.
    fn read(&self, size: usize) -> Result<Option<Bytes>>;

    /// Release the underlying resource and unblock a pending read
    fn close(&self) {}
}

/// Blocking consumer of raw frames
pub trait FrameSink: Send + Sync {
    fn write(&self, data: &[u8]) -> Result<()>;

    fn close(&self) {}
}

/// Read one frame, zero-padding a short final frame
pub(crate) fn read_frame<R: std::io::Read>(reader: &mut R, size: usize) -> Result<Option<Bytes>> {
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    if filled == 0 {
        return Ok(None);
    }
    Ok(Some(Bytes::from(buf)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_frame_pads_short_tail() {
        let mut cursor = Cursor::new(vec![1u8, 2, 3, 4, 5]);
        let first = read_frame(&mut cursor, 4).unwrap().unwrap();
        assert_eq!(&first[..], &[1, 2, 3, 4]);
        let tail = read_frame(&mut cursor, 4).unwrap().unwrap();
        assert_eq!(&tail[..], &[5, 0, 0, 0]);
        assert!(read_frame(&mut cursor, 4).unwrap().is_none());
    }
}
