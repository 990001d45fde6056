//! Playback audio writer
//!
//! An [`AudioWriter`] mixes the remote audio frames of one playback tick
//! into a single PCM frame and writes it to a [`FrameSink`] from its own
//! thread, so a slow sink never blocks the transport delivering the frames.
//! Mixed frames travel over a bounded channel; when the sink falls behind
//! new frames are dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, warn};

use super::reader::EofHandler;
use super::FrameSink;
use crate::error::Result;
use crate::types::AudioFrames;

/// Frames kept while the sink is slower than the transport
const MAX_QUEUED_FRAMES: usize = 50;

pub struct AudioWriter {
    id: u64,
    frame_size: usize,
    sink: Arc<dyn FrameSink>,
    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
    stopped: Arc<AtomicBool>,
    on_eof: Arc<Mutex<Option<EofHandler>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    opened: AtomicBool,
}

impl AudioWriter {
    pub fn new(id: u64, sink: Arc<dyn FrameSink>, frame_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(MAX_QUEUED_FRAMES);
        Self {
            id,
            frame_size,
            sink,
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            stopped: Arc::new(AtomicBool::new(false)),
            on_eof: Arc::new(Mutex::new(None)),
            handle: Mutex::new(None),
            opened: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn on_eof(&self, handler: EofHandler) {
        *self.on_eof.lock() = Some(handler);
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    /// Spawn the writer thread. Opening twice, or after close, is a no-op.
    pub fn open(&self) -> Result<()> {
        let Some(rx) = self.rx.lock().take() else {
            return Ok(());
        };
        let stopped = Arc::clone(&self.stopped);
        let sink = Arc::clone(&self.sink);
        let on_eof = Arc::clone(&self.on_eof);
        let id = self.id;
        let handle = thread::Builder::new()
            .name(format!("audio-writer-{}", id))
            .spawn(move || run_writer(id, rx, &stopped, &*sink, &on_eof))?;
        *self.handle.lock() = Some(handle);
        self.opened.store(true, Ordering::SeqCst);
        debug!("Audio writer {} opened", id);
        Ok(())
    }

    /// Mix one tick of remote frames and queue the result. Dropped while the
    /// writer is not open.
    pub fn send_frames(&self, frames: &AudioFrames) {
        if frames.is_empty() || !self.is_open() || self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let mixed = mix_pcm16(frames.values(), self.frame_size);
        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else { return };
        match tx.try_send(mixed) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("Audio writer {} overrun, dropping frame", self.id),
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Stop the thread and release the sink. Idempotent.
    pub fn close(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.tx.lock().take();
        self.rx.lock().take();
        self.sink.close();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("Audio writer {} thread panicked", self.id);
            }
        }
        self.on_eof.lock().take();
    }
}

impl Drop for AudioWriter {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_writer(
    id: u64,
    mut rx: mpsc::Receiver<Bytes>,
    stopped: &AtomicBool,
    sink: &dyn FrameSink,
    on_eof: &Mutex<Option<EofHandler>>,
) {
    while let Some(frame) = rx.blocking_recv() {
        if stopped.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = sink.write(&frame) {
            if !stopped.swap(true, Ordering::SeqCst) {
                debug!("Audio writer {} sink ended: {}", id, e);
                let handler = on_eof.lock().take();
                if let Some(handler) = handler {
                    handler();
                }
            }
            return;
        }
    }
}

/// Sum 16-bit little-endian PCM frames with saturation into one frame of
/// `frame_size` bytes. Shorter inputs are treated as silence-padded.
pub fn mix_pcm16<'a, I>(frames: I, frame_size: usize) -> Bytes
where
    I: IntoIterator<Item = &'a Bytes>,
{
    let samples = frame_size / 2;
    let mut acc = vec![0i32; samples];
    for frame in frames {
        for (slot, chunk) in acc.iter_mut().zip(frame.chunks_exact(2)) {
            *slot += i32::from(i16::from_le_bytes([chunk[0], chunk[1]]));
        }
    }
    let mut out = Vec::with_capacity(frame_size);
    for sample in acc {
        let clamped = sample.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
        out.extend_from_slice(&clamped.to_le_bytes());
    }
    out.resize(frame_size, 0);
    Bytes::from(out)
}
