//! Connection state machine, independent of any socket
//!
//! The network driver feeds socket events into a [`Session`]: the socket
//! opening, every text payload it receives, and its teardown. The session
//! routes each payload into credential state, the message history or the
//! frame history, and decides whether automatic reconnection is still
//! allowed. Consumers only ever see the [`ConnectionView`] snapshots it
//! produces.

use crate::buffer::RecentBuffer;
use crate::config::ClientConfig;
use log::{debug, info, warn};
use rand::Rng;
use shared::{ActionMessage, Frame, FrameData, Payload, PayloadType, ServerUser};
use std::fmt;
use std::time::Duration;

/// Lifecycle of the connection as presented to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Authenticated,
    /// Authenticated, but the server profile has no nickname yet
    WaitingForRegistration,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::WaitingForRegistration => "waiting-for-registration",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of routing one inbound payload
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// The transport is now ready for sends
    HandshakeAcknowledged { connection_id: String },
    Authenticated,
    AuthenticationRejected { status: i64 },
    ServerUserUpdated,
    /// Automatic reconnection has been disabled for good
    DuplicateSession,
    /// Buffered in the message history
    Message(ActionMessage),
    /// Buffered in the frame history
    Frame,
    StreamStarted,
    StreamEnded,
    Ping,
    Ignored,
    /// Malformed payload, dropped without affecting the connection
    Dropped { reason: String },
}

impl Inbound {
    /// Whether this outcome changed anything a consumer can observe
    pub fn changes_view(&self) -> bool {
        !matches!(
            self,
            Inbound::StreamStarted | Inbound::Ping | Inbound::Ignored | Inbound::Dropped { .. }
        )
    }
}

/// Budget and backoff for connect attempts
///
/// Every connect counts against the budget, including the first one. Once
/// `max_attempts` consecutive connects have failed, or the server reported a
/// duplicate session, the policy stays disabled until a successful open or a
/// manual reconnect resets it.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    enabled: bool,
    attempts: u32,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            enabled: max_attempts > 0,
            attempts: 0,
            max_attempts,
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Connects started since the last successful open
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.enabled = self.max_attempts > 0;
        self.attempts = 0;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Records that a connect is starting
    pub fn begin_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    /// After a lost or failed connection, how long to wait before the next
    /// automatic connect; `None` once the budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        if self.attempts >= self.max_attempts {
            self.enabled = false;
            return None;
        }

        let delay = self.delay_for(self.attempts.max(1));
        let jitter_ms = (delay.as_millis() / 4) as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        Some(delay + jitter)
    }

    /// Exponential delay before `attempt`, without jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1 << exponent)
            .min(self.max_delay)
    }
}

/// Everything a consumer may observe about the connection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionView {
    state: ConnectionState,
    /// Set once the server acknowledged the handshake
    pub connection_id: Option<String>,
    pub server_user: Option<ServerUser>,
    pub frames: RecentBuffer<Frame>,
    pub messages: RecentBuffer<ActionMessage>,
    pub is_stream_end: bool,
    pub reconnect_enabled: bool,
    pub reconnect_attempts: u32,
}

impl ConnectionView {
    pub fn state(&self) -> ConnectionState {
        match (self.state, &self.server_user) {
            (ConnectionState::Authenticated, Some(user)) if user.needs_registration() => {
                ConnectionState::WaitingForRegistration
            }
            (state, _) => state,
        }
    }

    /// True while a socket is open, whether or not it is authenticated
    pub fn is_connected(&self) -> bool {
        self.state != ConnectionState::Disconnected
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == ConnectionState::Authenticated
    }

    /// True once sends are accepted
    pub fn is_ready(&self) -> bool {
        self.connection_id.is_some()
    }

    pub fn current_frame(&self) -> Option<&Frame> {
        self.frames.latest()
    }

    pub fn latest_message(&self) -> Option<&ActionMessage> {
        self.messages.latest()
    }
}

/// Mutable connection state owned by the network driver
#[derive(Debug)]
pub struct Session {
    state: ConnectionState,
    connection_id: Option<String>,
    server_user: Option<ServerUser>,
    frames: RecentBuffer<Frame>,
    messages: RecentBuffer<ActionMessage>,
    stream_end: bool,
    policy: ReconnectPolicy,
}

impl Session {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            connection_id: None,
            server_user: None,
            frames: RecentBuffer::new(config.buffer_capacity),
            messages: RecentBuffer::new(config.buffer_capacity),
            stream_end: false,
            policy: ReconnectPolicy::new(
                config.max_reconnect_attempts,
                config.reconnect_base_delay,
                config.reconnect_max_delay,
            ),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.connection_id.is_some()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == ConnectionState::Authenticated
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut ReconnectPolicy {
        &mut self.policy
    }

    /// The socket opened; a fresh connect cycle restores the reconnect budget
    pub fn on_open(&mut self) {
        self.policy.reset();
        self.state = ConnectionState::Connected;
        info!("Connected to server");
    }

    /// Drops everything tied to the socket that just went away
    pub fn on_teardown(&mut self) {
        if self.state != ConnectionState::Disconnected {
            info!("Connection terminated");
        }
        self.state = ConnectionState::Disconnected;
        self.connection_id = None;
        self.server_user = None;
        self.frames.clear();
        self.messages.clear();
        self.stream_end = false;
    }

    /// Decodes and routes one text payload
    pub fn on_text(&mut self, raw: &str) -> Inbound {
        match Payload::decode(raw) {
            Ok(payload) => self.on_payload(payload),
            Err(e) => {
                warn!("Dropping malformed payload: {}", e);
                Inbound::Dropped {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn on_payload(&mut self, payload: Payload) -> Inbound {
        match payload.kind() {
            PayloadType::Upgrade => self.handle_upgrade(&payload),
            PayloadType::Handshake => match payload.handshake_id() {
                Some(id) => {
                    info!("Handshake acknowledged, connection id {}", id);
                    self.connection_id = Some(id.to_string());
                    Inbound::HandshakeAcknowledged {
                        connection_id: id.to_string(),
                    }
                }
                None => {
                    debug!("Ignoring handshake without connection id");
                    Inbound::Ignored
                }
            },
            PayloadType::Message => match payload.as_message() {
                Ok(message) => self.handle_message(message),
                Err(e) => dropped(e),
            },
            PayloadType::Frame => match payload.as_frame() {
                Ok(frame) => self.handle_frame(frame),
                Err(e) => dropped(e),
            },
            PayloadType::Ping => Inbound::Ping,
        }
    }

    fn handle_upgrade(&mut self, payload: &Payload) -> Inbound {
        let result = match payload.as_upgrade() {
            Ok(result) => result,
            Err(e) => return dropped(e),
        };

        if result.is_rejected() {
            warn!("Authentication rejected with status {}", result.status);
            return Inbound::AuthenticationRejected {
                status: result.status,
            };
        }

        if let Some(user) = result.user_data {
            self.server_user = Some(user);
        }
        self.state = ConnectionState::Authenticated;
        info!(
            "Authenticated as {}",
            self.server_user
                .as_ref()
                .map_or("<unknown>", |user| user.uid.as_str())
        );
        Inbound::Authenticated
    }

    fn handle_message(&mut self, message: ActionMessage) -> Inbound {
        if message.is_credential() {
            if !message.is_server_user_push() {
                debug!("Ignoring credential message {}", message.name);
                return Inbound::Ignored;
            }
            let Some(data) = message.data else {
                debug!("Ignoring server-user push without data");
                return Inbound::Ignored;
            };
            return match serde_json::from_value::<ServerUser>(data) {
                Ok(user) => {
                    debug!("Server user updated: {}", user.uid);
                    self.server_user = Some(user);
                    Inbound::ServerUserUpdated
                }
                Err(e) => Inbound::Dropped {
                    reason: format!("invalid server-user push: {e}"),
                },
            };
        }

        if message.is_duplicate_session_close() {
            warn!("Session replaced by another connection, automatic reconnect disabled");
            self.policy.disable();
            return Inbound::DuplicateSession;
        }

        self.messages.push(message.clone());
        Inbound::Message(message)
    }

    fn handle_frame(&mut self, frame: FrameData) -> Inbound {
        match frame {
            FrameData::EndOfStream => {
                info!("Frame stream ended");
                self.stream_end = true;
                Inbound::StreamEnded
            }
            FrameData::StartOfStream => {
                debug!("Frame stream started");
                Inbound::StreamStarted
            }
            FrameData::Snapshot(frame) => {
                if let Frame::Unrecognized { reason, .. } = &frame {
                    warn!("Keeping undecodable frame as raw snapshot: {}", reason);
                }
                self.frames.push(frame);
                Inbound::Frame
            }
        }
    }

    pub fn view(&self) -> ConnectionView {
        ConnectionView {
            state: self.state,
            connection_id: self.connection_id.clone(),
            server_user: self.server_user.clone(),
            frames: self.frames.clone(),
            messages: self.messages.clone(),
            is_stream_end: self.stream_end,
            reconnect_enabled: self.policy.is_enabled(),
            reconnect_attempts: self.policy.attempts(),
        }
    }
}

fn dropped(e: shared::DecodeError) -> Inbound {
    warn!("Dropping payload: {}", e);
    Inbound::Dropped {
        reason: e.to_string(),
    }
}
