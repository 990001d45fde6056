use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use super::{read_frame, FrameSink, FrameSource};
use crate::error::{MediaError, Result};

/// Raw frames read sequentially from a file
pub struct FileSource {
    path: PathBuf,
    file: Mutex<Option<BufReader<File>>>,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        debug!("Opened file source {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(Some(BufReader::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for FileSource {
    fn read(&self, size: usize) -> Result<Option<Bytes>> {
        let mut file = self.file.lock();
        match file.as_mut() {
            Some(reader) => read_frame(reader, size),
            None => Ok(None),
        }
    }

    fn close(&self) {
        if self.file.lock().take().is_some() {
            debug!("Closed file source {}", self.path.display());
        }
    }
}

/// Raw frames appended to a file
pub struct FileSink {
    path: PathBuf,
    file: Mutex<Option<BufWriter<File>>>,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        debug!("Opened file sink {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(Some(BufWriter::new(file))),
        })
    }
}

impl FrameSink for FileSink {
    fn write(&self, data: &[u8]) -> Result<()> {
        let mut file = self.file.lock();
        let writer = file
            .as_mut()
            .ok_or_else(|| MediaError::end_of_stream(format!("{} is closed", self.path.display())))?;
        writer.write_all(data)?;
        Ok(())
    }

    fn close(&self) {
        if let Some(mut writer) = self.file.lock().take() {
            let _ = writer.flush();
            debug!("Closed file sink {}", self.path.display());
        }
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        self.close();
    }
}
