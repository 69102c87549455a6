//! # isy-state
//!
//! Controller state kept current by the [`isy_stream`] event stream.
//!
//! - [`Property`]: an observable value with subscriptions and a reporter hook
//! - [`Nodes`]: node statuses, updated from `ST` events
//! - [`Group`]: scene status derived from its members, commandable through
//!   [`SceneControl`]
//! - [`logging`]: `tracing` subscriber setup
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use isy_state::{Group, Nodes};
//! use isy_stream::StreamConfig;
//!
//! let nodes = Arc::new(Nodes::new());
//! let scene = Group::new("12345", vec!["1A 2B 3C 1".into()], &nodes, Arc::new(MyApi));
//!
//! let stream = nodes.event_stream(StreamConfig::new("192.168.1.20", "admin", "admin"))?;
//! stream.start()?;
//! ```

mod error;
mod group;
pub mod logging;
mod nodes;
mod property;

pub use error::{Result, StateError};
pub use group::{Group, SceneControl, SCENE_OFF, SCENE_ON};
pub use nodes::Nodes;
pub use property::{Property, Subscription, WeakProperty};

// Re-exported for convenience
pub use isy_stream;
