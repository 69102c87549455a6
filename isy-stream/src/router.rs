//! Routing of decoded event documents.
//!
//! The router updates session state for stream-control events (heartbeats,
//! session id announcements) and forwards everything else to an
//! [`EventHandler`] supplied by the caller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::codec;
use crate::error::{Result, StreamError};
use crate::message::{ControlCode, EventMessage, ProgramEventKind};
use crate::session::Session;

/// Downstream consumer of routed events.
///
/// Every method defaults to a no-op so implementors only override the
/// categories they care about. Methods are called from the stream's worker
/// thread and must not block for long.
pub trait EventHandler: Send + Sync {
    /// A node status (`ST`) event
    fn on_node_update(&self, _message: &EventMessage) {}

    /// A weather module (`_11`) event; only delivered when weather is enabled
    fn on_climate_update(&self, _message: &EventMessage) {}

    /// A variable changed
    fn on_variable_update(&self, _message: &EventMessage) {}

    /// A specific program changed
    fn on_program_update(&self, _message: &EventMessage) {}

    /// Something in a program folder changed without details; reload everything
    fn on_programs_refresh_all(&self) {}
}

/// Handler that drops every event. Useful when only liveness matters.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl EventHandler for NoopHandler {}

/// Where a message ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Heartbeat recorded with the announced wait
    Heartbeat(Duration),
    Node,
    Climate,
    /// Weather event dropped because the weather module is disabled
    ClimateDisabled,
    Variable,
    Program,
    ProgramsRefresh,
    /// Unrouted control code, or no control code at all
    Ignored,
}

/// Classifies event messages and dispatches them.
#[derive(Clone)]
pub struct Router {
    handler: Arc<dyn EventHandler>,
    weather_enabled: bool,
}

impl Router {
    pub fn new(handler: Arc<dyn EventHandler>, weather_enabled: bool) -> Self {
        Self {
            handler,
            weather_enabled,
        }
    }

    /// Parse and route one cleaned frame.
    ///
    /// Malformed frames are logged and dropped; the returned route is
    /// `None` in that case.
    pub fn route_frame(&self, frame: &str, session: &Mutex<Session>) -> Option<Route> {
        let document = match codec::parse(frame) {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!("Received malformed event ({}): {}", e, frame);
                return None;
            }
        };
        tracing::debug!("Event received: {}", frame);

        match self.route(&EventMessage::new(document), session, Instant::now()) {
            Ok(route) => Some(route),
            Err(e) => {
                tracing::warn!("Dropping event: {}", e);
                None
            }
        }
    }

    /// Route a parsed message.
    ///
    /// The session lock is only held while session state is updated, never
    /// while the handler runs.
    pub fn route(
        &self,
        message: &EventMessage,
        session: &Mutex<Session>,
        now: Instant,
    ) -> Result<Route> {
        if let Some(sid) = message.stream_session_id() {
            if session.lock().record_session_id(sid) {
                tracing::debug!("Updated event stream session id: {}", sid);
            }
        }

        let Some(control) = message.control() else {
            return Ok(Route::Ignored);
        };

        let route = match control {
            ControlCode::Heartbeat => {
                let wait = heartbeat_wait(message)?;
                session.lock().record_heartbeat(now, wait);
                tracing::debug!("Heartbeat received, next expected within {:?}", wait);
                Route::Heartbeat(wait)
            }
            ControlCode::Status => {
                self.handler.on_node_update(message);
                Route::Node
            }
            ControlCode::Weather => {
                if self.weather_enabled {
                    self.handler.on_climate_update(message);
                    Route::Climate
                } else {
                    Route::ClimateDisabled
                }
            }
            ControlCode::ProgramOrVariable => match message.program_event_kind() {
                ProgramEventKind::Variable => {
                    self.handler.on_variable_update(message);
                    Route::Variable
                }
                ProgramEventKind::Program => {
                    self.handler.on_program_update(message);
                    Route::Program
                }
                ProgramEventKind::Folder => {
                    self.handler.on_programs_refresh_all();
                    Route::ProgramsRefresh
                }
            },
            ControlCode::Other(code) => {
                tracing::trace!("Ignoring event with control code {}", code);
                Route::Ignored
            }
        };

        Ok(route)
    }
}

fn heartbeat_wait(message: &EventMessage) -> Result<Duration> {
    let action = message
        .action()
        .ok_or_else(|| StreamError::MalformedMessage("Heartbeat without action".to_string()))?;
    let seconds = action.parse::<u64>().map_err(|_| {
        StreamError::MalformedMessage(format!("Heartbeat action is not a number: {}", action))
    })?;
    Ok(Duration::from_secs(seconds))
}
