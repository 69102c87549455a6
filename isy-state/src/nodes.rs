//! Node status registry fed by the event stream.

use std::collections::HashMap;
use std::sync::Arc;

use isy_stream::{EventHandler, EventMessage, EventStream, StreamConfig};
use parking_lot::RwLock;

use crate::error::{Result, StateError};
use crate::property::Property;

/// Status of every known node, keyed by address (e.g. `1A 2B 3C 1`).
///
/// Register it as (or forward to it from) the stream's [`EventHandler`]:
/// each `ST` event updates the addressed node's status silently.
#[derive(Debug, Default)]
pub struct Nodes {
    statuses: RwLock<HashMap<String, Property<i32>>>,
}

impl Nodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an event stream that keeps these nodes current.
    ///
    /// The stream is not started.
    pub fn event_stream(self: &Arc<Self>, config: StreamConfig) -> Result<EventStream> {
        let handler: Arc<dyn EventHandler> = Arc::<Nodes>::clone(self);
        Ok(EventStream::new(config, handler)?)
    }

    /// Register a node, or return the existing status if already known.
    pub fn register(&self, address: impl Into<String>, status: i32) -> Property<i32> {
        self.statuses
            .write()
            .entry(address.into())
            .or_insert_with(|| Property::new(status))
            .clone()
    }

    pub fn status(&self, address: &str) -> Option<Property<i32>> {
        self.statuses.read().get(address).cloned()
    }

    pub fn value(&self, address: &str) -> Option<i32> {
        self.status(address).map(|status| status.get())
    }

    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.statuses.read().keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn len(&self) -> usize {
        self.statuses.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.read().is_empty()
    }

    /// Apply a status reported by the controller.
    ///
    /// Unknown nodes are registered on first sight. The update is silent so
    /// that nothing is echoed back to the controller.
    pub fn apply_status(&self, address: &str, value: i32) {
        let status = match self.status(address) {
            Some(status) => status,
            None => {
                tracing::debug!("Registering node {} seen in event stream", address);
                self.register(address, value)
            }
        };

        if status.update(value, false, true) {
            tracing::trace!("Node {} status is now {}", address, value);
        }
    }

    /// Extract the node address and integer status from an `ST` event.
    pub fn parse_status(message: &EventMessage) -> Result<(String, i32)> {
        let node = message.node().ok_or(StateError::MissingNode)?;
        let action = message.action().unwrap_or_default();
        let value = action.parse::<i32>().map_err(|_| StateError::InvalidStatus {
            node: node.clone(),
            value: action.clone(),
        })?;
        Ok((node, value))
    }
}

impl EventHandler for Nodes {
    fn on_node_update(&self, message: &EventMessage) {
        match Self::parse_status(message) {
            Ok((node, value)) => self.apply_status(&node, value),
            Err(e) => tracing::warn!("Ignoring node status event: {}", e),
        }
    }
}
