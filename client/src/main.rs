use clap::Parser;
use client::config::DEFAULT_SERVER_URL;
use client::{ActionBroker, ClientConfig, ConnectionManager, ConnectionState, FrameReconciler};
use log::{info, warn};
use serde_json::Value;
use shared::ServerUser;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Game server WebSocket url
    #[arg(short = 's', long, default_value = DEFAULT_SERVER_URL)]
    server: String,

    /// Bearer token handed to the server after the handshake
    #[arg(short = 't', long)]
    token: Option<String>,

    /// Action to send once connected, as `name` or `name=<json>`; repeatable
    #[arg(short = 'a', long = "action", value_parser = parse_action)]
    actions: Vec<ActionArg>,

    /// How long to wait for each action's reply
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,

    /// Automatic reconnect attempts before giving up
    #[arg(long, default_value = "5")]
    max_reconnects: u32,
}

#[derive(Debug, Clone)]
struct ActionArg {
    name: String,
    data: Option<Value>,
}

fn parse_action(raw: &str) -> Result<ActionArg, String> {
    let (name, data) = match raw.split_once('=') {
        Some((name, json)) => {
            let data = serde_json::from_str(json)
                .map_err(|e| format!("invalid json for action {name}: {e}"))?;
            (name, Some(data))
        }
        None => (raw, None),
    };

    if name.is_empty() {
        return Err("action name must not be empty".to_string());
    }
    Ok(ActionArg {
        name: name.to_string(),
        data,
    })
}

fn describe_user(user: &ServerUser) -> String {
    format!(
        "{} ({}) level {} score {}",
        user.uid,
        user.nickname.as_deref().unwrap_or("unregistered"),
        user.level,
        user.score
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = ClientConfig::new(&args.server)?
        .with_max_reconnect_attempts(args.max_reconnects)
        .with_action_timeout(Duration::from_millis(args.timeout_ms));
    if let Some(token) = args.token {
        config = config.with_auth_token(token);
    }

    info!("Starting client...");
    info!("Connecting to: {}", config.server_url);

    let connection = ConnectionManager::init(config.clone());
    let broker = Arc::new(ActionBroker::new(connection.clone(), config.action_timeout));
    let mut frames = FrameReconciler::new(&connection);
    let mut views = connection.subscribe();

    let mut actions = Some(args.actions).filter(|actions| !actions.is_empty());
    let mut last_state = ConnectionState::Disconnected;
    let mut last_user: Option<ServerUser> = None;
    let mut last_phase: Option<String> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            },

            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();

                if view.state() != last_state {
                    info!("Connection state: {} -> {}", last_state, view.state());
                    last_state = view.state();
                }

                if view.server_user != last_user {
                    if let Some(user) = &view.server_user {
                        info!("Server user: {}", describe_user(user));
                    }
                    last_user = view.server_user.clone();
                }

                if view.is_ready() {
                    if let Some(actions) = actions.take() {
                        let broker = broker.clone();
                        tokio::spawn(async move {
                            for action in actions {
                                match broker.send_action(&action.name, action.data).await {
                                    Some(reply) if reply.is_error() => warn!(
                                        "{} failed with status {:?}: {:?}",
                                        action.name, reply.status, reply.data
                                    ),
                                    Some(reply) => info!("{} -> {:?}", action.name, reply.data),
                                    None => warn!("{} got no reply", action.name),
                                }
                            }
                        });
                    }
                }

                if !view.is_connected() && !view.reconnect_enabled {
                    warn!("Disconnected and automatic reconnect is disabled");
                    break;
                }
            },

            stream = frames.changed() => {
                let Ok(stream) = stream else { break };

                if let Some(frame) = stream.current() {
                    let phase = frame.state_name().map(str::to_string);
                    if phase != last_phase {
                        info!("Room state: {}", phase.as_deref().unwrap_or("unknown"));
                        last_phase = phase;
                    }
                    if let Some(room) = frame.room() {
                        log::debug!(
                            "Frame tick {}: {} players, {:?}s left",
                            room.tick,
                            room.players().len(),
                            room.remaining_seconds()
                        );
                    }
                }
                if stream.is_stream_end {
                    info!("Frame stream ended");
                }
            },
        }
    }

    broker.dispose().await;
    connection.dispose();

    Ok(())
}
