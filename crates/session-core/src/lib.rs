//! # callcore-session-core
//!
//! Call level layer on top of `callcore-media-core`:
//!
//! - [`CallSession`]: one call's stream manager plus its transport
//!   connections, driving the connection lifecycle
//! - [`CallRegistry`]: every call of an application keyed by chat id, with
//!   callback and broadcast event fan-out
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use callcore_session_core::prelude::*;
//!
//! # fn run(transport: Arc<dyn NetworkInterface>) -> callcore_session_core::Result<()> {
//! let registry = CallRegistry::new(RegistryConfig::default())?;
//! let mut events = registry.subscribe();
//!
//! registry.create_call(-100123, transport, &MediaDescription::new())?;
//! registry.set_stream_sources(
//!     -100123,
//!     Mode::Capture,
//!     &MediaDescription::new().with_microphone(AudioDescription::external()),
//! )?;
//! registry.connect(-100123, ConnectionKind::Normal)?;
//!
//! while let Ok(event) = events.try_recv() {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod errors;
pub mod registry;
pub mod session;
pub mod state;

pub use config::{RegistryConfig, SessionConfig};
pub use errors::{Result, SessionError};
pub use registry::{CallConnectionHandler, CallEvent, CallFrameHandler, CallRegistry, CallStreamEndHandler, CallUpgradeHandler};
pub use session::{CallSession, ConnectionChangeHandler};
pub use state::{CallNetworkState, ConnectionKind, ConnectionState};

// The transport seam lives with the stream manager that registers tracks on it
pub use callcore_media_core::{ConnectionChangeCallback, NetworkInterface, TransportState};

pub mod prelude {
    pub use crate::config::{RegistryConfig, SessionConfig};
    pub use crate::errors::{Result, SessionError};
    pub use crate::registry::{CallEvent, CallRegistry};
    pub use crate::session::CallSession;
    pub use crate::state::{CallNetworkState, ConnectionKind, ConnectionState};
    pub use callcore_media_core::prelude::*;
}
