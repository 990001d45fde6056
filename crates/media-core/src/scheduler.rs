//! Threaded frame scheduler
//!
//! A [`FrameScheduler`] produces frames of a fixed size at a fixed cadence
//! from a blocking read function. It runs `N` lanes, each a dedicated
//! thread. Lanes take turns issuing reads in lane order, so a sequential
//! source yields frames in delivery order, and take turns delivering in a
//! strict rotation. While one lane sleeps towards its delivery deadline the
//! next lane is already reading, which hides slow reads behind the pacing
//! interval.
//!
//! Per lane:
//!
//! 1. wait for the read turn and read one frame
//! 2. wait until it is this lane's delivery turn and the scheduler is enabled
//! 3. sleep until `last_delivery + frame_time`
//! 4. deliver, record the delivery time, pass the turn on and wake all lanes
//!
//! A failed read or end of stream stops the scheduler: every lane exits and
//! frames still held are dropped. The last lane to exit fires the
//! end-of-stream callback, unless the stop came from
//! [`FrameScheduler::close`].
//!
//! Disabling the scheduler waits for a delivery already in flight, so no
//! frame reaches the callback once [`FrameScheduler::set_enabled`] returns.

use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use crate::error::{MediaError, Result};

/// Default number of lanes per scheduler
pub const DEFAULT_LANES: usize = 2;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of lane threads
    pub lanes: usize,
    /// Bytes per frame, passed through to the read function
    pub frame_size: usize,
    /// Target interval between two deliveries
    pub frame_time: Duration,
}

impl SchedulerConfig {
    pub fn new(frame_size: usize, frame_time: Duration) -> Self {
        Self {
            lanes: DEFAULT_LANES,
            frame_size,
            frame_time,
        }
    }

    pub fn with_lanes(mut self, lanes: usize) -> Self {
        self.lanes = lanes;
        self
    }
}

/// One frame handed to the delivery callback
#[derive(Debug, Clone)]
pub struct ScheduledFrame {
    /// Lane that read and delivered the frame
    pub lane: usize,
    /// Delivery sequence number, starting at zero
    pub sequence: u64,
    pub data: Bytes,
}

type EofCallback = Box<dyn FnOnce() + Send + 'static>;

struct LaneState {
    running: bool,
    /// Set by `close`; suppresses the end-of-stream callback
    exiting: bool,
    enabled: bool,
    /// A read failed or hit end of stream
    eos: bool,
    /// Lane thread currently inside the delivery callback
    delivering: Option<ThreadId>,
    /// Lane allowed to deliver next
    active: usize,
    /// Lane allowed to read next
    read_turn: usize,
    live_lanes: usize,
    last_delivery: Option<Instant>,
    sequence: u64,
}

struct Shared {
    name: String,
    lanes: usize,
    frame_time: Duration,
    state: Mutex<LaneState>,
    cond: Condvar,
    on_eof: Mutex<Option<EofCallback>>,
}

/// Multi-lane frame pacing engine
pub struct FrameScheduler {
    config: SchedulerConfig,
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: Mutex<bool>,
}

impl FrameScheduler {
    pub fn new(name: impl Into<String>, config: SchedulerConfig) -> Result<Self> {
        if config.frame_size == 0 || config.frame_time.is_zero() {
            return Err(MediaError::invalid_params(format!(
                "Invalid frame geometry: {} bytes every {:?}",
                config.frame_size, config.frame_time
            )));
        }
        let lanes = config.lanes.max(1);

        Ok(Self {
            shared: Arc::new(Shared {
                name: name.into(),
                lanes,
                frame_time: config.frame_time,
                state: Mutex::new(LaneState {
                    running: false,
                    exiting: false,
                    enabled: true,
                    eos: false,
                    delivering: None,
                    active: 0,
                    read_turn: 0,
                    live_lanes: 0,
                    last_delivery: None,
                    sequence: 0,
                }),
                cond: Condvar::new(),
                on_eof: Mutex::new(None),
            }),
            config,
            handles: Mutex::new(Vec::new()),
            started: Mutex::new(false),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn frame_size(&self) -> usize {
        self.config.frame_size
    }

    /// Spawn the lanes.
    ///
    /// `read` is called with the frame size and returns `Ok(None)` at end of
    /// stream. `deliver` runs on the lane threads without any scheduler lock
    /// held. `on_eof` fires at most once, after every lane exited because of
    /// a failed or exhausted read.
    pub fn run<R, D, E>(&self, read: R, deliver: D, on_eof: E) -> Result<()>
    where
        R: Fn(usize) -> Result<Option<Bytes>> + Send + Sync + 'static,
        D: Fn(ScheduledFrame) + Send + Sync + 'static,
        E: FnOnce() + Send + 'static,
    {
        {
            let mut started = self.started.lock();
            if *started {
                return Err(MediaError::invalid_params(format!(
                    "Scheduler {} already started",
                    self.shared.name
                )));
            }
            *started = true;
        }

        {
            let mut state = self.shared.state.lock();
            if state.exiting {
                return Err(MediaError::end_of_stream(format!(
                    "Scheduler {} is closed",
                    self.shared.name
                )));
            }
            state.running = true;
            state.live_lanes = self.shared.lanes;
        }
        *self.shared.on_eof.lock() = Some(Box::new(on_eof));

        let read = Arc::new(read);
        let deliver = Arc::new(deliver);
        let frame_size = self.config.frame_size;
        let mut handles = Vec::with_capacity(self.shared.lanes);

        for lane in 0..self.shared.lanes {
            let shared = Arc::clone(&self.shared);
            let read = Arc::clone(&read);
            let deliver = Arc::clone(&deliver);
            let spawned = thread::Builder::new()
                .name(format!("frame-lane-{}", lane))
                .spawn(move || {
                    run_lane(&shared, lane, frame_size, &*read, &*deliver);
                    exit_lane(&shared, lane);
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!("Failed to spawn lane {} of {}: {}", lane, self.shared.name, e);
                    {
                        let mut state = self.shared.state.lock();
                        state.exiting = true;
                        state.running = false;
                        state.live_lanes -= self.shared.lanes - lane;
                        self.shared.cond.notify_all();
                    }
                    for handle in handles.drain(..) {
                        let _ = handle.join();
                    }
                    self.shared.on_eof.lock().take();
                    return Err(e.into());
                }
            }
        }

        self.handles.lock().extend(handles);
        debug!(
            "Scheduler {} running {} lanes, {} bytes every {:?}",
            self.shared.name, self.shared.lanes, frame_size, self.config.frame_time
        );
        Ok(())
    }

    /// Enable or disable delivery. A disabled scheduler keeps its lanes
    /// alive and holds the frames already read. Disabling returns only once
    /// no delivery is in flight, unless called from the delivery callback
    /// itself. Returns whether the value changed.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        let changed = self.request_enabled(enabled);
        if changed && !enabled {
            self.delivery_gate().wait_idle();
        }
        changed
    }

    /// Flip the enabled flag without waiting for an in-flight delivery.
    /// Pair with [`DeliveryGate::wait_idle`] when the wait has to happen
    /// outside the caller's locks.
    pub fn request_enabled(&self, enabled: bool) -> bool {
        let mut state = self.shared.state.lock();
        if state.enabled == enabled {
            return false;
        }
        state.enabled = enabled;
        self.shared.cond.notify_all();
        trace!("Scheduler {} enabled={}", self.shared.name, enabled);
        true
    }

    pub fn delivery_gate(&self) -> DeliveryGate {
        DeliveryGate {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.state.lock().enabled
    }

    /// Whether at least one lane is still alive
    pub fn is_running(&self) -> bool {
        let state = self.shared.state.lock();
        state.running && state.live_lanes > 0
    }

    /// Number of frames delivered so far
    pub fn delivered(&self) -> u64 {
        self.shared.state.lock().sequence
    }

    /// Signal every lane to stop without waiting for them. Suppresses the
    /// end-of-stream callback.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        state.exiting = true;
        state.running = false;
        self.shared.cond.notify_all();
    }

    /// Stop every lane and join them. Idempotent. A lane calling this from
    /// its own delivery callback is not joined.
    pub fn close(&self) {
        self.stop();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Lane of scheduler {} panicked", self.shared.name);
            }
        }
        self.shared.on_eof.lock().take();
        debug!("Scheduler {} closed", self.shared.name);
    }
}

/// Waits out the delivery in flight on a disabled scheduler
pub struct DeliveryGate {
    shared: Arc<Shared>,
}

impl DeliveryGate {
    /// Block while the scheduler is disabled and a lane other than the
    /// calling thread is delivering
    pub fn wait_idle(&self) {
        let current = thread::current().id();
        let mut state = self.shared.state.lock();
        while !state.enabled && state.delivering.map_or(false, |lane| lane != current) {
            self.shared.cond.wait(&mut state);
        }
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_lane(
    shared: &Shared,
    lane: usize,
    frame_size: usize,
    read: &(dyn Fn(usize) -> Result<Option<Bytes>> + Send + Sync),
    deliver: &(dyn Fn(ScheduledFrame) + Send + Sync),
) {
    let lanes = shared.lanes;
    loop {
        {
            let mut state = shared.state.lock();
            while state.running && !state.eos && state.read_turn != lane {
                shared.cond.wait(&mut state);
            }
            if !state.running || state.eos {
                return;
            }
        }

        let result = read(frame_size);

        let mut state = shared.state.lock();
        state.read_turn = (lane + 1) % lanes;
        shared.cond.notify_all();

        let data = match result {
            Ok(Some(data)) => data,
            Ok(None) => {
                debug!("Scheduler {} lane {} reached end of stream", shared.name, lane);
                stop_reading(shared, &mut state);
                return;
            }
            Err(e) => {
                warn!("Scheduler {} lane {} read failed: {}", shared.name, lane, e);
                stop_reading(shared, &mut state);
                return;
            }
        };

        if !wait_for_delivery(shared, &mut state, lane) {
            return;
        }

        let sequence = state.sequence;
        state.sequence += 1;
        state.delivering = Some(thread::current().id());
        MutexGuard::unlocked(&mut state, || {
            deliver(ScheduledFrame {
                lane,
                sequence,
                data,
            })
        });
        state.delivering = None;

        state.last_delivery = Some(Instant::now());
        state.active = (lane + 1) % lanes;
        shared.cond.notify_all();
    }
}

/// Blocks until this lane may deliver. Returns `false` when stopped.
fn wait_for_delivery(shared: &Shared, state: &mut MutexGuard<'_, LaneState>, lane: usize) -> bool {
    loop {
        if !state.running {
            return false;
        }
        if state.active != lane || !state.enabled {
            shared.cond.wait(state);
            continue;
        }
        if let Some(last) = state.last_delivery {
            let deadline = last + shared.frame_time;
            if Instant::now() < deadline {
                shared.cond.wait_until(state, deadline);
                continue;
            }
        }
        return true;
    }
}

fn stop_reading(shared: &Shared, state: &mut LaneState) {
    state.eos = true;
    state.running = false;
    shared.cond.notify_all();
}

fn exit_lane(shared: &Shared, lane: usize) {
    let fire = {
        let mut state = shared.state.lock();
        state.live_lanes = state.live_lanes.saturating_sub(1);
        trace!("Scheduler {} lane {} exited", shared.name, lane);
        state.live_lanes == 0 && !state.exiting
    };
    if fire {
        let callback = shared.on_eof.lock().take();
        if let Some(callback) = callback {
            callback();
        }
    }
}
