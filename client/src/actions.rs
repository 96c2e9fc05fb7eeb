//! Request/response over the one-way message channel
//!
//! Every action goes out with a fresh correlation id. A reply matches only
//! when both its `name` and its echoed `id` equal the request's, so
//! concurrent requests with the same name never resolve each other. A
//! request that sees no reply before its deadline resolves to `None`; that
//! is a normal outcome, not an error.

use crate::error::ClientError;
use crate::network::ConnectionManager;
use log::{debug, warn};
use serde_json::Value;
use shared::{ActionMessage, Payload};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Transport the broker sends actions through and reads replies from
pub trait MessageChannel {
    fn send(&self, payload: Payload) -> Result<(), ClientError>;
    fn subscribe_messages(&self) -> broadcast::Receiver<ActionMessage>;
}

impl MessageChannel for ConnectionManager {
    fn send(&self, payload: Payload) -> Result<(), ClientError> {
        ConnectionManager::send(self, payload)
    }

    fn subscribe_messages(&self) -> broadcast::Receiver<ActionMessage> {
        ConnectionManager::subscribe_messages(self)
    }
}

struct PendingRequest {
    name: String,
    correlation_id: String,
    deadline: Instant,
    resolve: oneshot::Sender<ActionMessage>,
}

/// Outstanding requests in registration order
#[derive(Default)]
pub struct PendingRequests {
    entries: Vec<PendingRequest>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        correlation_id: impl Into<String>,
        deadline: Instant,
    ) -> oneshot::Receiver<ActionMessage> {
        let (resolve, reply) = oneshot::channel();
        self.entries.push(PendingRequest {
            name: name.into(),
            correlation_id: correlation_id.into(),
            deadline,
            resolve,
        });
        reply
    }

    /// Resolves the first request `message` answers; returns whether one matched
    pub fn dispatch(&mut self, message: &ActionMessage) -> bool {
        let Some(index) = self
            .entries
            .iter()
            .position(|entry| message.answers(&entry.name, &entry.correlation_id))
        else {
            return false;
        };

        let entry = self.entries.remove(index);
        if entry.resolve.send(message.clone()).is_err() {
            debug!("Reply for {} arrived after its caller went away", entry.name);
        }
        true
    }

    pub fn cancel(&mut self, correlation_id: &str) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|entry| entry.correlation_id != correlation_id);
        self.entries.len() != before
    }

    /// Drops expired requests and those whose caller stopped waiting
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|entry| entry.deadline > now && !entry.resolve.is_closed());
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Issues named actions and awaits their correlated replies
pub struct ActionBroker<C: MessageChannel> {
    channel: C,
    default_timeout: Duration,
    pending: Arc<Mutex<PendingRequests>>,
    dispatcher: JoinHandle<()>,
}

impl<C: MessageChannel> ActionBroker<C> {
    /// Must be called from within a tokio runtime
    pub fn new(channel: C, default_timeout: Duration) -> Self {
        let pending = Arc::new(Mutex::new(PendingRequests::new()));
        let dispatcher = tokio::spawn(dispatch_replies(
            channel.subscribe_messages(),
            pending.clone(),
        ));

        Self {
            channel,
            default_timeout,
            pending,
            dispatcher,
        }
    }

    pub async fn send_action(&self, name: &str, data: Option<Value>) -> Option<ActionMessage> {
        self.send_action_with_timeout(name, data, self.default_timeout)
            .await
    }

    /// Sends `name` and waits up to `wait` for the reply
    pub async fn send_action_with_timeout(
        &self,
        name: &str,
        data: Option<Value>,
        wait: Duration,
    ) -> Option<ActionMessage> {
        let action = ActionMessage::client_action(name, data);
        let correlation_id = action.id.clone().unwrap_or_default();
        let payload = match Payload::message(&action) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode action {}: {}", name, e);
                return None;
            }
        };

        let mut reply =
            self.pending
                .lock()
                .await
                .register(name, correlation_id.as_str(), Instant::now() + wait);

        if let Err(e) = self.channel.send(payload) {
            warn!("Failed to send action {}: {}", name, e);
            self.pending.lock().await.cancel(&correlation_id);
            return None;
        }
        debug!("Sent action {} ({})", name, correlation_id);

        match timeout(wait, &mut reply).await {
            Ok(Ok(message)) => Some(message),
            // Swept at its deadline or the broker was disposed
            Ok(Err(_)) => None,
            Err(_) => {
                if self.pending.lock().await.cancel(&correlation_id) {
                    debug!("Action {} ({}) got no reply within {:?}", name, correlation_id, wait);
                    None
                } else {
                    // Matched while the deadline fired
                    reply.try_recv().ok()
                }
            }
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Stops dispatching; waiting callers resolve to `None`
    pub async fn dispose(&self) {
        self.dispatcher.abort();
        self.pending.lock().await.clear();
    }
}

impl<C: MessageChannel> Drop for ActionBroker<C> {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

async fn dispatch_replies(
    mut messages: broadcast::Receiver<ActionMessage>,
    pending: Arc<Mutex<PendingRequests>>,
) {
    let mut sweep = interval(SWEEP_INTERVAL);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = messages.recv() => match received {
                Ok(message) => {
                    let mut pending = pending.lock().await;
                    pending.sweep(Instant::now());
                    if pending.dispatch(&message) {
                        debug!("Resolved action {}", message.name);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Action dispatcher fell behind, skipped {} messages", skipped);
                }
                Err(RecvError::Closed) => break,
            },

            _ = sweep.tick() => {
                let removed = pending.lock().await.sweep(Instant::now());
                if removed > 0 {
                    debug!("Swept {} stale action requests", removed);
                }
            },
        }
    }
}
