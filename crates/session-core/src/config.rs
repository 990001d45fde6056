//! Session and registry configuration

use std::time::Duration;

use callcore_media_core::StreamManagerConfig;
use serde::{Deserialize, Serialize};

/// Time a connection attempt may take before a timeout is reported
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(20);

/// Default capacity of the registry event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configuration of one call session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub connection_timeout: Duration,
    pub stream: StreamManagerConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            stream: StreamManagerConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_video_simulcast(mut self, enable: bool) -> Self {
        self.stream.video_simulcast = enable;
        self
    }

    pub fn with_reader_lanes(mut self, lanes: usize) -> Self {
        self.stream.reader_lanes = lanes;
        self
    }
}

/// Configuration of a [`CallRegistry`](crate::CallRegistry)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Applied to every call the registry creates
    pub session: SessionConfig,
    /// Buffered events per subscriber before the slowest one lags
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl RegistryConfig {
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}
