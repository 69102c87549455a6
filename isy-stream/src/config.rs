//! Configuration types for the isy-stream crate
//!
//! This module defines the configuration that controls how the event stream
//! reaches the controller (address, credentials, TLS profile) and how the
//! watch loop paces itself (poll interval, heartbeat deadlines).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use base64::prelude::*;
use serde::Deserialize;

use crate::error::StreamError;

/// Default port of the controller's secure REST/event endpoint
pub const DEFAULT_PORT: u16 = 443;

/// Default bounded wait on the socket before the liveness check re-runs
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// TLS protocol profile used to negotiate the secure channel.
///
/// Controllers ship with differing firmware, so the profile is pinned to one
/// protocol version rather than negotiated across a range.
///
/// TLS 1.1 is not available: rustls implements nothing older than 1.2, so
/// `"1.1"` is rejected as a configuration error. Controllers whose firmware
/// only speaks TLS 1.1 need a firmware update to be reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum TlsVersion {
    /// Pin the handshake to TLS 1.2
    #[default]
    Tls12,
    /// Pin the handshake to TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// The rustls protocol version this profile negotiates.
    pub fn protocol_version(&self) -> &'static rustls::SupportedProtocolVersion {
        match self {
            TlsVersion::Tls12 => &rustls::version::TLS12,
            TlsVersion::Tls13 => &rustls::version::TLS13,
        }
    }
}

impl FromStr for TlsVersion {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1.2" | "tls1.2" | "TLSv1.2" => Ok(TlsVersion::Tls12),
            "1.3" | "tls1.3" | "TLSv1.3" => Ok(TlsVersion::Tls13),
            other => Err(StreamError::Configuration(format!(
                "Unsupported TLS version '{}': expected 1.2 or 1.3",
                other
            ))),
        }
    }
}

impl TryFrom<String> for TlsVersion {
    type Error = StreamError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsVersion::Tls12 => write!(f, "TLSv1.2"),
            TlsVersion::Tls13 => write!(f, "TLSv1.3"),
        }
    }
}

/// Username and password for the controller's basic auth.
#[derive(Clone, Default, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Base64 of `username:password`, ready for an `Authorization: Basic` header.
    pub fn auth_token(&self) -> String {
        BASE64_STANDARD.encode(format!("{}:{}", self.username, self.password))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Configuration for the EventStream
///
/// Controls where the stream connects and how the watch loop decides the
/// connection has been lost.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Controller host name or IP address
    pub address: String,

    /// Controller port
    /// Default: 443
    pub port: u16,

    /// Basic auth credentials
    pub credentials: Credentials,

    /// TLS protocol profile
    /// Default: TLS 1.2
    pub tls_version: TlsVersion,

    /// Bounded wait on the socket per watch-loop iteration
    /// Default: 5 seconds
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,

    /// Timeout for opening the TCP connection and completing the handshake
    /// Default: 10 seconds
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Whether the controller has the weather module, gating climate events
    /// Default: false
    pub weather_enabled: bool,

    /// Deadline for the first heartbeat after subscribing.
    ///
    /// When `None`, a stream that never receives a heartbeat is never declared
    /// lost by the heartbeat check (elapsed time counts as zero until the first
    /// heartbeat arrives). Compared in whole seconds, like the heartbeat wait.
    /// Default: None
    #[serde(with = "option_duration_secs")]
    pub first_heartbeat_timeout: Option<Duration>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: DEFAULT_PORT,
            credentials: Credentials::default(),
            tls_version: TlsVersion::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            connect_timeout: Duration::from_secs(10),
            weather_enabled: false,
            first_heartbeat_timeout: None,
        }
    }
}

impl StreamConfig {
    /// Create a StreamConfig for a controller with default settings
    pub fn new(
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            credentials: Credentials::new(username, password),
            ..Default::default()
        }
    }

    /// Create a StreamConfig that notices a dead link quickly
    ///
    /// Checks liveness every second and gives up if no heartbeat arrives
    /// within five minutes of subscribing.
    pub fn fast_detection(
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            first_heartbeat_timeout: Some(Duration::from_secs(300)),
            ..Self::new(address, username, password)
        }
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.address.trim().is_empty() {
            return Err(StreamError::Configuration(
                "Controller address must not be empty".to_string(),
            ));
        }

        if self.port == 0 {
            return Err(StreamError::Configuration(
                "Controller port must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval == Duration::ZERO {
            return Err(StreamError::Configuration(
                "Poll interval must be greater than 0".to_string(),
            ));
        }

        if self.connect_timeout == Duration::ZERO {
            return Err(StreamError::Configuration(
                "Connect timeout must be greater than 0".to_string(),
            ));
        }

        if self.first_heartbeat_timeout == Some(Duration::ZERO) {
            return Err(StreamError::Configuration(
                "First heartbeat timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_tls_version(mut self, version: TlsVersion) -> Self {
        self.tls_version = version;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_weather(mut self, enabled: bool) -> Self {
        self.weather_enabled = enabled;
        self
    }

    pub fn with_first_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.first_heartbeat_timeout = Some(timeout);
        self
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

mod option_duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}
