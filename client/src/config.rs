//! Client configuration with defaults matching the public game server

use crate::buffer::MAX_BUFFER_SIZE;
use crate::error::ClientError;
use std::time::Duration;
use url::Url;

pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8080/ws";
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MESSAGE_CHANNEL_CAPACITY: usize = 256;

/// Settings shared by the connection manager and the action broker
///
/// `server_url` is used for every automatic and manual reconnect.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: Url,
    /// Bearer token handed to the server once the handshake is acknowledged
    pub auth_token: Option<String>,
    pub buffer_capacity: usize,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub connect_timeout: Duration,
    pub action_timeout: Duration,
    /// Messages a slow subscriber may fall behind by before it skips ahead
    ///
    /// The action broker is such a subscriber. A reply skipped this way is lost
    /// and its request resolves to `None` when its timeout expires.
    pub message_channel_capacity: usize,
}

impl ClientConfig {
    pub fn new(server_url: &str) -> Result<Self, ClientError> {
        Ok(Self {
            server_url: parse_server_url(server_url)?,
            auth_token: None,
            buffer_capacity: MAX_BUFFER_SIZE,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            message_channel_capacity: DEFAULT_MESSAGE_CHANNEL_CAPACITY,
        })
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity.max(1);
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_reconnect_delays(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base_delay = base;
        self.reconnect_max_delay = max.max(base);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub fn with_message_channel_capacity(mut self, capacity: usize) -> Self {
        self.message_channel_capacity = capacity.max(1);
        self
    }
}

/// Parses a server url, accepting only `ws` and `wss`
pub fn parse_server_url(raw: &str) -> Result<Url, ClientError> {
    let url = Url::parse(raw).map_err(|source| ClientError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;

    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ClientError::UnsupportedScheme(other.to_string())),
    }
}
