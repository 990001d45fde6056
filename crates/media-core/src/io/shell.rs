//! Process backed sources and sinks
//!
//! The input string is run through `sh -c`. A source reads frames from the
//! process' stdout, a sink writes them to its stdin. Closing kills the
//! process, which also unblocks a read pending on the pipe.

use std::io::{ErrorKind, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{read_frame, FrameSink, FrameSource};
use crate::error::{MediaError, Result};

fn spawn(command: &str, stdin: Stdio, stdout: Stdio) -> Result<Child> {
    Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(stdin)
        .stdout(stdout)
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| MediaError::shell(format!("Failed to spawn `{}`: {}", command, e)))
}

fn terminate(command: &str, child: &Mutex<Option<Child>>) {
    let Some(mut child) = child.lock().take() else {
        return;
    };
    match child.try_wait() {
        Ok(Some(status)) => debug!("Process `{}` already exited: {}", command, status),
        _ => {
            if let Err(e) = child.kill() {
                warn!("Failed to kill `{}`: {}", command, e);
            }
            let _ = child.wait();
            debug!("Killed process `{}`", command);
        }
    }
}

/// Frames read from the stdout of a shell command
pub struct ShellSource {
    command: String,
    child: Mutex<Option<Child>>,
    stdout: Mutex<Option<ChildStdout>>,
}

impl ShellSource {
    pub fn spawn(command: impl Into<String>) -> Result<Self> {
        let command = command.into();
        let mut child = spawn(&command, Stdio::null(), Stdio::piped())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::shell("missing stdout pipe"))?;
        debug!("Spawned shell source `{}`", command);
        Ok(Self {
            command,
            child: Mutex::new(Some(child)),
            stdout: Mutex::new(Some(stdout)),
        })
    }
}

impl FrameSource for ShellSource {
    fn read(&self, size: usize) -> Result<Option<Bytes>> {
        let mut stdout = self.stdout.lock();
        match stdout.as_mut() {
            Some(pipe) => read_frame(pipe, size),
            None => Ok(None),
        }
    }

    fn close(&self) {
        // killing first closes the pipe under a blocked reader
        terminate(&self.command, &self.child);
        self.stdout.lock().take();
    }
}

impl Drop for ShellSource {
    fn drop(&mut self) {
        terminate(&self.command, &self.child);
    }
}

/// Frames written to the stdin of a shell command
pub struct ShellSink {
    command: String,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
}

impl ShellSink {
    pub fn spawn(command: impl Into<String>) -> Result<Self> {
        let command = command.into();
        let mut child = spawn(&command, Stdio::piped(), Stdio::null())?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::shell("missing stdin pipe"))?;
        debug!("Spawned shell sink `{}`", command);
        Ok(Self {
            command,
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(Some(stdin)),
        })
    }
}

impl FrameSink for ShellSink {
    fn write(&self, data: &[u8]) -> Result<()> {
        let mut stdin = self.stdin.lock();
        let pipe = stdin
            .as_mut()
            .ok_or_else(|| MediaError::end_of_stream(format!("`{}` is closed", self.command)))?;
        match pipe.write_all(data) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                stdin.take();
                Err(MediaError::end_of_stream(format!("`{}` exited", self.command)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn close(&self) {
        // the writer thread may hold the stdin lock while blocked on a full pipe
        terminate(&self.command, &self.child);
        self.stdin.lock().take();
    }
}

impl Drop for ShellSink {
    fn drop(&mut self) {
        self.close();
    }
}
