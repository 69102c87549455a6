//! Subscription session state shared between the watch loop and callers.

use std::time::{Duration, Instant};

use crate::codec::RequestParams;
use crate::config::StreamConfig;
use crate::heartbeat::HeartbeatState;

/// Where and as whom requests are sent. Auth is encoded once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
    auth: String,
}

impl Endpoint {
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            address: config.address.clone(),
            port: config.port,
            auth: config.credentials.auth_token(),
        }
    }

    /// Request parameters for the given session.
    pub fn params(&self, session: &Session) -> RequestParams {
        RequestParams {
            address: self.address.clone(),
            port: self.port,
            auth: self.auth.clone(),
            session_id: session.session_id().map(str::to_string),
        }
    }
}

/// The logical subscription.
///
/// Invariant: `subscribed` implies `connected`.
#[derive(Debug, Clone)]
pub struct Session {
    connected: bool,
    subscribed: bool,
    session_id: Option<String>,
    heartbeat: HeartbeatState,
    first_heartbeat_deadline: Option<Duration>,
}

impl Session {
    pub fn new(first_heartbeat_deadline: Option<Duration>) -> Self {
        Self {
            connected: false,
            subscribed: false,
            session_id: None,
            heartbeat: HeartbeatState::new(first_heartbeat_deadline),
            first_heartbeat_deadline,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn heartbeat(&self) -> &HeartbeatState {
        &self.heartbeat
    }

    /// A new channel is open. Heartbeat tracking starts over; the stream
    /// session id is kept so the next subscribe resumes it.
    pub fn mark_connected(&mut self) {
        self.connected = true;
        self.subscribed = false;
        self.heartbeat = HeartbeatState::new(self.first_heartbeat_deadline);
    }

    /// Mark the subscription active. Ignored while disconnected.
    pub fn mark_subscribed(&mut self, now: Instant) -> bool {
        if !self.connected {
            return false;
        }
        self.subscribed = true;
        self.heartbeat.arm(now);
        true
    }

    /// Explicit unsubscribe: the session id is no longer valid.
    pub fn mark_unsubscribed(&mut self) {
        self.subscribed = false;
        self.session_id = None;
    }

    pub fn mark_disconnected(&mut self) {
        self.connected = false;
        self.subscribed = false;
    }

    /// Store the controller-assigned session id if none is recorded yet.
    ///
    /// Returns `true` when the id was stored.
    pub fn record_session_id(&mut self, sid: &str) -> bool {
        if self.session_id.is_some() {
            return false;
        }
        self.session_id = Some(sid.to_string());
        true
    }

    pub fn record_heartbeat(&mut self, now: Instant, wait: Duration) {
        self.heartbeat.record(now, wait);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribed_implies_connected() {
        let mut session = Session::new(None);
        assert!(!session.mark_subscribed(Instant::now()));
        assert!(!session.is_subscribed());

        session.mark_connected();
        assert!(session.mark_subscribed(Instant::now()));
        assert!(session.is_subscribed());

        session.mark_disconnected();
        assert!(!session.is_connected());
        assert!(!session.is_subscribed());
    }

    #[test]
    fn test_session_id_recorded_once() {
        let mut session = Session::new(None);
        assert!(session.record_session_id("uuid:1"));
        assert!(!session.record_session_id("uuid:2"));
        assert_eq!(session.session_id(), Some("uuid:1"));
    }

    #[test]
    fn test_session_id_survives_disconnect_but_not_unsubscribe() {
        let mut session = Session::new(None);
        session.mark_connected();
        session.record_session_id("uuid:1");

        session.mark_disconnected();
        session.mark_connected();
        assert_eq!(session.session_id(), Some("uuid:1"));

        session.mark_unsubscribed();
        assert!(session.session_id().is_none());
    }

    #[test]
    fn test_reconnect_resets_heartbeat() {
        let mut session = Session::new(None);
        session.mark_connected();
        session.record_heartbeat(Instant::now(), Duration::from_secs(120));
        assert!(session.heartbeat().last().is_some());

        session.mark_connected();
        assert!(session.heartbeat().last().is_none());
    }

    #[test]
    fn test_endpoint_params_follow_session() {
        let config = StreamConfig::new("10.0.0.2", "admin", "admin").with_port(8443);
        let endpoint = Endpoint::from_config(&config);
        let mut session = Session::new(None);

        let params = endpoint.params(&session);
        assert_eq!(params.address, "10.0.0.2");
        assert_eq!(params.port, 8443);
        assert_eq!(params.auth, "YWRtaW46YWRtaW4=");
        assert!(params.session_id.is_none());

        session.record_session_id("uuid:5");
        assert_eq!(endpoint.params(&session).session_id.as_deref(), Some("uuid:5"));
    }
}
