//! Dispatch queues
//!
//! A [`DispatchQueue`] owns one named worker thread that runs posted tasks in
//! FIFO order. It is used wherever the stack needs a serialized delivery
//! context that is decoupled from the locks held while state is mutated:
//! the shared update queue that forwards call-level events to the
//! application, and the per-session network queue that receives transport
//! state changes.
//!
//! The worker drives a current-thread tokio runtime fed by an unbounded
//! channel. Delayed tasks sleep on that runtime and are then sent back
//! through the channel, so they are serialized with regular tasks.
//! Stopping the queue runs every task that was already posted, drops pending
//! delayed tasks together with the runtime and joins the worker.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace};

use crate::errors::{Error, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Task),
    Delayed(Duration, Task),
    Stop,
}

/// Single-threaded FIFO task queue with delayed tasks and blocking calls
pub struct DispatchQueue {
    name: String,
    sender: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl DispatchQueue {
    /// Spawn a new queue with a named worker thread
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| Error::Config(format!("Failed to build runtime for queue {}: {}", name, e)))?;
        let (tx, rx) = mpsc::unbounded_channel();

        let worker_name = name.clone();
        let resend = tx.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                runtime.block_on(run_worker(&worker_name, rx, resend));
                trace!("Dispatch queue {} worker exiting", worker_name);
            })
            .map_err(|e| Error::Config(format!("Failed to spawn queue {}: {}", name, e)))?;

        debug!("Dispatch queue {} started", name);

        Ok(Self {
            worker_id: handle.thread().id(),
            name,
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Queue name, also used as the worker thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the calling thread is this queue's worker
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    /// Whether [`stop`](Self::stop) has been called
    pub fn is_stopped(&self) -> bool {
        self.sender.lock().is_none()
    }

    fn send(&self, message: Message) -> bool {
        match self.sender.lock().as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => {
                trace!("Queue {} stopped, dropping task", self.name);
                false
            }
        }
    }

    /// Post a task. Returns `false` when the queue is stopped and the task
    /// was dropped.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(Message::Run(Box::new(task)))
    }

    /// Post a task that runs once `delay` has elapsed
    pub fn post_delayed<F>(&self, delay: Duration, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(Message::Delayed(delay, Box::new(task)))
    }

    /// Run `f` on the queue and wait for its result.
    ///
    /// Runs inline when called from the queue's own worker thread.
    pub fn blocking_call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Ok(f());
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        if !self.post(move || {
            let _ = reply_tx.send(f());
        }) {
            return Err(Error::QueueStopped(self.name.clone()));
        }

        // Callers may sit on another queue's runtime, where tokio refuses
        // `blocking_recv`
        futures::executor::block_on(reply_rx).map_err(|_| Error::TaskAbandoned(self.name.clone()))
    }

    /// Stop the queue: already-posted tasks still run, delayed tasks are
    /// dropped, and the worker is joined. Idempotent. When called from the
    /// worker itself the join is skipped and the worker exits once the
    /// current task returns.
    pub fn stop(&self) {
        let sender = self.sender.lock().take();
        if let Some(tx) = sender {
            debug!("Stopping dispatch queue {}", self.name);
            let _ = tx.send(Message::Stop);
        }

        if self.is_current() {
            return;
        }
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Dispatch queue {} worker panicked", self.name);
            }
            debug!("Dispatch queue {} stopped", self.name);
        }
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("name", &self.name)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

async fn run_worker(name: &str, mut rx: mpsc::UnboundedReceiver<Message>, resend: mpsc::UnboundedSender<Message>) {
    while let Some(message) = rx.recv().await {
        match message {
            Message::Run(task) => {
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    error!("Task panicked on dispatch queue {}", name);
                }
            }
            Message::Delayed(delay, task) => {
                let resend = resend.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = resend.send(Message::Run(task));
                });
            }
            Message::Stop => break,
        }
    }
}
