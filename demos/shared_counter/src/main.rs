//! Shared counter demo
//!
//! One server and a few clients, each with its own root producer, kept in sync
//! through an in-memory byte transport. Run with `RUST_LOG=debug` to see every
//! dispatch, flush and broadcast. An optional RON config path may be passed as
//! the first argument (see `config/demo.ron`).

mod slices;

use futures::executor::block_on;
use futures::future::{self, FutureExt};
use reflex_broadcast::{
    create_broadcast_receiver, create_broadcaster, ActionFilter, BroadcastReceiver,
    Broadcaster, BroadcasterOptions, Packet, PlayerId, ReceiverOptions, StateRequest,
};
use reflex_core::{combine_producers, scheduler, LoggerConfig, LoggerMiddleware, Producer, Value};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error>;

/// Demo settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct DemoConfig {
    /// Number of connected clients
    players: u64,
    /// Number of server ticks to simulate
    ticks: u32,
    /// Logger middleware settings for the server
    logger: LoggerConfig,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            players: 2,
            ticks: 3,
            logger: LoggerConfig::default(),
        }
    }
}

impl DemoConfig {
    fn load() -> Result<Self, BoxError> {
        match std::env::args().nth(1) {
            Some(path) => {
                let source = std::fs::read_to_string(&path)?;
                Ok(ron::from_str(&source)?)
            }
            None => Ok(Self::default()),
        }
    }
}

/// Per-player queues of encoded packets
#[derive(Default)]
struct Network {
    inboxes: RefCell<HashMap<PlayerId, VecDeque<Vec<u8>>>>,
}

impl Network {
    fn send(&self, player: PlayerId, bytes: Vec<u8>) {
        self.inboxes
            .borrow_mut()
            .entry(player)
            .or_default()
            .push_back(bytes);
    }

    fn drain(&self, player: PlayerId) -> Vec<Vec<u8>> {
        self.inboxes
            .borrow_mut()
            .get_mut(&player)
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default()
    }
}

struct Server {
    root: Producer,
    broadcaster: Broadcaster,
}

impl Server {
    fn new(network: Rc<Network>, logger: LoggerConfig) -> Self {
        let shared = slices::shared_producers();

        let broadcaster = create_broadcaster(BroadcasterOptions {
            producers: &shared,
            broadcast: Box::new(move |players, actions| {
                match Packet::Actions(actions.to_vec()).encode() {
                    Ok(bytes) => {
                        for player in players {
                            network.send(*player, bytes.clone());
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "failed to encode broadcast"),
                }
            }),
        });

        let mut producers = shared;
        producers.insert("server_counter".to_string(), slices::server_counter());
        let root = combine_producers(producers);
        root.apply_middleware(&[&broadcaster.middleware(), &LoggerMiddleware::new(logger)]);

        Self { root, broadcaster }
    }

    /// Handle an encoded request and return the encoded response
    fn handle(&self, bytes: &[u8]) -> reflex_broadcast::Result<Vec<u8>> {
        match Packet::decode(bytes)? {
            Packet::StateRequest { player } => {
                let state = self.broadcaster.player_requested_state(player)?;
                Packet::State(state).encode()
            }
            other => Err(reflex_broadcast::Error::StateRequest(format!(
                "unexpected packet: {:?}",
                other
            ))),
        }
    }
}

struct Client {
    player: PlayerId,
    root: Producer,
    receiver: BroadcastReceiver,
}

impl Client {
    fn connect(player: PlayerId, server: Rc<Server>) -> Result<Self, BoxError> {
        let shared = slices::shared_producers();
        let filter = ActionFilter::from_producers(&shared);

        let receiver = create_broadcast_receiver(ReceiverOptions {
            request_state: Box::new(move || -> StateRequest {
                let response = Packet::StateRequest { player }
                    .encode()
                    .and_then(|request| server.handle(&request))
                    .and_then(|bytes| Packet::decode(&bytes));
                let state = match response {
                    Ok(Packet::State(state)) => Ok(state),
                    Ok(other) => Err(reflex_broadcast::Error::StateRequest(format!(
                        "unexpected packet: {:?}",
                        other
                    ))),
                    Err(e) => Err(e),
                };
                future::ready(state).boxed_local()
            }),
            filter,
        });

        let mut producers = shared;
        producers.insert("settings".to_string(), slices::client_settings());
        let root = combine_producers(producers).enhance(receiver.enhancer());
        block_on(receiver.hydrate())?;

        tracing::info!(player = %player, state = %root.get_state(), "client connected");
        Ok(Self {
            player,
            root,
            receiver,
        })
    }

    fn receive(&self, network: &Network) -> reflex_broadcast::Result<()> {
        for bytes in network.drain(self.player) {
            if let Packet::Actions(actions) = Packet::decode(&bytes)? {
                self.receiver.dispatch(&actions)?;
            }
        }
        Ok(())
    }

    fn shared_count(&self) -> Value {
        self.root.select(|state| state.get("shared_counter").get("count").clone())
    }
}

fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = DemoConfig::load()?;
    tracing::info!(?config, "starting shared counter demo");

    let network = Rc::new(Network::default());
    let server = Rc::new(Server::new(network.clone(), config.logger.clone()));

    let mut clients = Vec::new();
    for id in 0..config.players {
        // Later players join mid-session
        server.root.dispatch("increment_shared", &[])?;
        clients.push(Client::connect(PlayerId(id), server.clone())?);
        scheduler::run_deferred();
    }

    for tick in 0..config.ticks {
        server.root.dispatch("increment_shared", &[])?;
        server.root.dispatch("multiply_shared", &[Value::Int(2)])?;
        server.root.dispatch("increment_server", &[])?;
        if tick % 2 == 1 {
            server.root.dispatch("decrement_shared", &[])?;
        }
        scheduler::run_deferred();

        for client in &clients {
            client.receive(&network)?;
        }
        scheduler::run_deferred();
    }

    if let Some(first) = clients.first() {
        first.root.dispatch("toggle_counter", &[])?;
        scheduler::run_deferred();
    }

    let expected = server
        .root
        .select(|state| state.get("shared_counter").get("count").clone());
    for client in &clients {
        let count = client.shared_count();
        tracing::info!(player = %client.player, count = %count, "client state");
        if count != expected {
            return Err(format!("{} diverged: {} != {}", client.player, count, expected).into());
        }
    }

    let server_state = server.root.get_state();
    tracing::info!(
        shared = %server_state.get("shared_counter"),
        server_only = %server_state.get("server_counter"),
        "server state"
    );
    Ok(())
}
