//! Socket lifecycle for the game server connection
//!
//! [`ConnectionManager`] is a cheap, cloneable handle. The socket itself lives
//! in a driver task that owns the [`Session`] and reacts to three event
//! sources in one `select!` loop: commands from handles, frames from the
//! socket, and the scheduled reconnect timer. Every state change is published
//! as a fresh [`ConnectionView`] on a watch channel; every buffered action
//! message is additionally fanned out on a broadcast channel.

use crate::config::{parse_server_url, ClientConfig};
use crate::error::ClientError;
use crate::session::{ConnectionView, Inbound, Session};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{ActionMessage, Payload};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug)]
enum Command {
    Connect(Url),
    Disconnect,
    Reconnect,
    Send(Payload),
    Shutdown,
}

/// Handle to the single persistent connection
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<ConnectionView>,
    messages: broadcast::Sender<ActionMessage>,
}

impl ConnectionManager {
    /// Spawns the driver task and starts connecting to `config.server_url`
    ///
    /// Must be called from within a tokio runtime.
    pub fn init(config: ClientConfig) -> Self {
        let session = Session::new(&config);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(session.view());
        let (message_tx, _) = broadcast::channel(config.message_channel_capacity);

        let url = config.server_url.clone();
        let driver = Driver {
            url: url.clone(),
            config,
            session,
            socket: None,
            retry_at: None,
            commands: command_rx,
            view_tx,
            message_tx: message_tx.clone(),
        };
        tokio::spawn(driver.run());

        let manager = Self {
            commands: command_tx,
            view: view_rx,
            messages: message_tx,
        };
        // The driver was spawned just above, the receiver is alive
        let _ = manager.command(Command::Connect(url));
        manager
    }

    /// Connects to `url`; a no-op while a socket is already held
    pub fn connect(&self, url: &str) -> Result<(), ClientError> {
        let url = parse_server_url(url)?;
        self.command(Command::Connect(url))
    }

    /// Closes the socket, clears the session and connects again right away
    ///
    /// The new connect counts against the reconnect budget.
    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.command(Command::Disconnect)
    }

    /// Closes the socket and connects again right away with a fresh budget
    ///
    /// Works even after automatic reconnection gave up.
    pub fn reconnect(&self) -> Result<(), ClientError> {
        self.command(Command::Reconnect)
    }

    /// Queues a payload for the socket
    ///
    /// Payloads are dropped if the handshake has not been acknowledged when
    /// the driver gets to them. Nothing is queued across reconnects.
    pub fn send(&self, payload: Payload) -> Result<(), ClientError> {
        self.command(Command::Send(payload))
    }

    /// Sends the bearer token as an `upgrade` payload
    pub fn authenticate(&self, token: impl Into<String>) -> Result<(), ClientError> {
        let payload = Payload::upgrade(token)?;
        self.command(Command::Send(payload))
    }

    /// Closes the socket and stops the driver
    pub fn dispose(&self) {
        if self.command(Command::Shutdown).is_err() {
            debug!("Connection driver already stopped");
        }
    }

    pub fn view(&self) -> ConnectionView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionView> {
        self.view.clone()
    }

    pub fn subscribe_messages(&self) -> broadcast::Receiver<ActionMessage> {
        self.messages.subscribe()
    }

    /// Waits until a published view satisfies `predicate`
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<ConnectionView, ClientError>
    where
        F: FnMut(&ConnectionView) -> bool,
    {
        let mut view = self.view.clone();
        loop {
            {
                let current = view.borrow_and_update();
                if predicate(&current) {
                    return Ok(current.clone());
                }
            }
            view.changed().await.map_err(|_| ClientError::Closed)?;
        }
    }

    fn command(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).map_err(|_| ClientError::Closed)
    }
}

struct Driver {
    config: ClientConfig,
    url: Url,
    session: Session,
    socket: Option<WsStream>,
    retry_at: Option<Instant>,
    commands: mpsc::UnboundedReceiver<Command>,
    view_tx: watch::Sender<ConnectionView>,
    message_tx: broadcast::Sender<ActionMessage>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let retry_at = self.retry_at;

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },

                incoming = next_message(&mut self.socket) => {
                    self.handle_incoming(incoming).await;
                },

                _ = retry_timer(retry_at) => {
                    self.retry_at = None;
                    info!(
                        "Reconnect attempt {} of {}",
                        self.session.policy().attempts() + 1,
                        self.config.max_reconnect_attempts
                    );
                    self.open().await;
                },
            }
        }

        self.close_socket().await;
        self.session.policy_mut().disable();
        self.session.on_teardown();
        self.retry_at = None;
        self.publish();
        info!("Connection driver stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(url) => {
                if self.socket.is_some() {
                    debug!("Connect ignored, socket already open");
                    return;
                }
                self.url = url;
                self.retry_at = None;
                self.open().await;
            }
            Command::Disconnect => {
                if self.socket.is_none() {
                    debug!("Disconnect ignored, no socket");
                    return;
                }
                info!("Disconnecting from {}", self.url);
                self.close_socket().await;
                self.session.on_teardown();
                self.retry_at = None;
                self.publish();
                self.open().await;
            }
            Command::Reconnect => {
                info!("Manual reconnect to {}", self.config.server_url);
                self.close_socket().await;
                self.session.on_teardown();
                self.session.policy_mut().reset();
                self.retry_at = None;
                self.url = self.config.server_url.clone();
                self.publish();
                self.open().await;
            }
            Command::Send(payload) => self.send(payload).await,
            Command::Shutdown => {}
        }
    }

    async fn handle_incoming(&mut self, incoming: Option<Result<Message, tungstenite::Error>>) {
        match incoming {
            Some(Ok(Message::Text(text))) => {
                let inbound = self.session.on_text(text.as_str());
                self.handle_inbound(inbound).await;
            }
            Some(Ok(Message::Binary(data))) => {
                warn!("Dropping binary message of {} bytes", data.len());
            }
            Some(Ok(Message::Close(frame))) => {
                match frame {
                    Some(frame) => info!(
                        "Server closed connection: {} {}",
                        u16::from(frame.code),
                        frame.reason.as_str()
                    ),
                    None => info!("Server closed connection"),
                }
                self.socket = None;
                self.teardown();
            }
            // Control frames are answered by tungstenite itself
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!("Transport error: {}", e);
                self.socket = None;
                self.teardown();
            }
            None => {
                info!("Connection stream ended");
                self.socket = None;
                self.teardown();
            }
        }
    }

    async fn handle_inbound(&mut self, inbound: Inbound) {
        let changed = inbound.changes_view();

        match inbound {
            Inbound::HandshakeAcknowledged { .. } => {
                self.publish();
                if let Some(token) = self.config.auth_token.clone() {
                    self.send_upgrade(token).await;
                }
                return;
            }
            Inbound::Message(message) => {
                self.publish();
                // No receivers is fine
                let _ = self.message_tx.send(message);
                return;
            }
            _ => {}
        }

        if changed {
            self.publish();
        }
    }

    async fn open(&mut self) {
        if self.socket.is_some() {
            return;
        }

        self.session.policy_mut().begin_attempt();
        info!("Connecting to {}...", self.url);
        match timeout(self.config.connect_timeout, connect_async(self.url.as_str())).await {
            Ok(Ok((socket, _response))) => {
                self.socket = Some(socket);
                self.session.on_open();
                self.publish();
            }
            Ok(Err(e)) => {
                warn!("Failed to connect to {}: {}", self.url, e);
                self.teardown();
            }
            Err(_) => {
                warn!(
                    "Connecting to {} timed out after {:?}",
                    self.url, self.config.connect_timeout
                );
                self.teardown();
            }
        }
    }

    async fn send(&mut self, payload: Payload) {
        if !self.session.is_ready() {
            debug!("Dropping {} payload, connection not ready", payload.kind());
            return;
        }
        let Some(socket) = self.socket.as_mut() else {
            debug!("Dropping {} payload, no socket", payload.kind());
            return;
        };

        if let Err(e) = socket.send(Message::Text(payload.encode().into())).await {
            error!("Failed to send {} payload: {}", payload.kind(), e);
            self.socket = None;
            self.teardown();
        }
    }

    async fn send_upgrade(&mut self, token: String) {
        match Payload::upgrade(token) {
            Ok(payload) => self.send(payload).await,
            Err(e) => warn!("Failed to encode upgrade payload: {}", e),
        }
    }

    async fn close_socket(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.close(None).await {
                debug!("Error while closing socket: {}", e);
            }
        }
    }

    /// Common path for errors, closes and failed connects
    fn teardown(&mut self) {
        self.session.on_teardown();
        self.schedule_retry();
        self.publish();
    }

    fn schedule_retry(&mut self) {
        if self.retry_at.is_some() {
            return;
        }

        match self.session.policy_mut().next_delay() {
            Some(delay) => {
                info!("Reconnecting in {:?}", delay);
                self.retry_at = Some(Instant::now() + delay);
            }
            None => warn!("Automatic reconnect disabled, staying disconnected"),
        }
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.session.view());
    }
}

async fn next_message(socket: &mut Option<WsStream>) -> Option<Result<Message, tungstenite::Error>> {
    match socket {
        Some(socket) => socket.next().await,
        None => std::future::pending().await,
    }
}

async fn retry_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
