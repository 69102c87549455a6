//! # isy-stream
//!
//! A client for the push event stream of ISY home-automation controllers.
//!
//! The controller keeps a TLS socket open and pushes one XML document per line
//! for every status change, program run, variable update and heartbeat. This
//! crate owns that socket: it subscribes (resuming the controller-assigned
//! session id when it has one), watches heartbeats to notice a dead link,
//! reassembles frames from partial reads and routes each event to an
//! [`EventHandler`].
//!
//! Reconnect policy is left to the caller: when the link is lost the stream
//! invokes the connection-lost hook and stops; call [`EventStream::start`]
//! again to resume.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use isy_stream::{EventHandler, EventMessage, EventStream, StreamConfig};
//!
//! struct Printer;
//!
//! impl EventHandler for Printer {
//!     fn on_node_update(&self, message: &EventMessage) {
//!         println!("{:?} -> {:?}", message.node(), message.action());
//!     }
//! }
//!
//! let config = StreamConfig::new("192.168.1.20", "admin", "admin");
//! let stream = EventStream::new(config, Arc::new(Printer))?;
//! stream.start()?;
//! ```

mod client;
pub mod codec;
mod config;
mod error;
pub mod framer;
mod heartbeat;
mod message;
mod router;
mod session;
mod transport;

pub use client::{ConnectionLostCallback, EventStream};
pub use config::{Credentials, StreamConfig, TlsVersion, DEFAULT_POLL_INTERVAL, DEFAULT_PORT};
pub use error::{Result, StreamError};
pub use heartbeat::HeartbeatState;
pub use message::{ControlCode, EventMessage, ProgramEventKind};
pub use router::{EventHandler, NoopHandler, Route, Router};
pub use session::{Endpoint, Session};
pub use transport::{BoxedTransport, Connected, ConnectionInfo, Connector, TlsConnector, Transport};

/// Re-exported so handlers can walk event documents without a direct dependency
pub use xmltree;
