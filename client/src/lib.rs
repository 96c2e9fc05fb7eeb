//! # Game Client Library
//!
//! Client-side connection layer for the real-time multiplayer game. It owns a
//! single persistent WebSocket to the game server, sorts everything the
//! server pushes into independent channels, and offers request/response on
//! top of the fire-and-forget message channel.
//!
//! ## Architecture Overview
//!
//! ### Connection Manager (`network`)
//! A driver task owns the socket and the connection [`session::Session`]:
//! - Connect, token upgrade and handshake tracking
//! - Routing of every inbound payload into credentials, messages or frames
//! - Automatic reconnection with exponential backoff and a give-up ceiling
//! - Publication of a [`session::ConnectionView`] after every change
//!
//! ### Frame Reconciler (`game`)
//! A read-only projection of the frame history. The current frame is always
//! the newest snapshot; snapshots replace each other and are never merged.
//!
//! ### Action Broker (`actions`)
//! Sends named actions with a fresh correlation id and resolves each one with
//! its matching reply, or with `None` once its deadline passes.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::actions::ActionBroker;
//! use client::config::ClientConfig;
//! use client::game::FrameReconciler;
//! use client::network::ConnectionManager;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::new("ws://localhost:8080/ws")?.with_auth_token("bearer-token");
//! let connection = ConnectionManager::init(config.clone());
//! let broker = ActionBroker::new(connection.clone(), config.action_timeout);
//! let mut frames = FrameReconciler::new(&connection);
//!
//! connection.wait_for(|view| view.is_authenticated()).await?;
//!
//! if let Some(reply) = broker
//!     .send_action("join-og-game", Some(serde_json::json!("ROOM1")))
//!     .await
//! {
//!     println!("joined: {:?}", reply.data);
//! }
//!
//! while !frames.is_stream_end() {
//!     let stream = frames.changed().await?;
//!     println!("current frame: {:?}", stream.current());
//! }
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod buffer;
pub mod config;
pub mod error;
pub mod game;
pub mod network;
pub mod session;

pub use actions::{ActionBroker, MessageChannel};
pub use config::ClientConfig;
pub use error::ClientError;
pub use game::FrameReconciler;
pub use network::ConnectionManager;
pub use session::{ConnectionState, ConnectionView};
