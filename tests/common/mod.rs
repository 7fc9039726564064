//! In-process harness wiring one `Session` to several `Peer`s.

#![allow(dead_code)]

use client::peer::{ClientError, ClientEvent, Peer, PeerConfig};
use server::config::ServerConfig;
use server::session::Session;
use server::transport::LoopbackTransport;
use shared::{ClientId, Command, LedgerWorld, ServerPacket, Tick};
use std::collections::{BTreeMap, BTreeSet};

pub struct Harness {
    pub session: Session<LedgerWorld>,
    pub transport: LoopbackTransport,
    pub peers: BTreeMap<ClientId, Peer<LedgerWorld>>,
    /// Every packet each peer received, in order.
    pub received: BTreeMap<ClientId, Vec<ServerPacket>>,
    /// Errors each peer raised while handling packets.
    pub errors: BTreeMap<ClientId, Vec<ClientError>>,
    /// Peers that neither read nor write until thawed.
    pub frozen: BTreeSet<ClientId>,
}

impl Harness {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_world(config, LedgerWorld::new())
    }

    pub fn with_world(config: ServerConfig, world: LedgerWorld) -> Self {
        Self {
            session: Session::new(config, world, LedgerWorld::command_table()),
            transport: LoopbackTransport::new(),
            peers: BTreeMap::new(),
            received: BTreeMap::new(),
            errors: BTreeMap::new(),
            frozen: BTreeSet::new(),
        }
    }

    /// Small chunks and short intervals so tests finish in few ticks.
    pub fn quick_config() -> ServerConfig {
        ServerConfig {
            snapshot_chunk_size: 32,
            sync_interval_ticks: 8,
            ..Default::default()
        }
    }

    /// One small chunk per tick, so transfers span many ticks.
    pub fn slow_config() -> ServerConfig {
        ServerConfig {
            snapshot_chunk_size: 16,
            max_chunks_per_pump: 1,
            ..Self::quick_config()
        }
    }

    /// A world with `signs` placed signs, large enough to stream for a while.
    pub fn signed_world(signs: u32) -> LedgerWorld {
        let mut world = LedgerWorld::new();
        for tile in 0..signs {
            world.signs.insert(tile, format!("sign {}", tile));
        }
        world
    }

    /// Accepts a socket for a new peer and queues its `Join`.
    pub fn connect(&mut self, config: PeerConfig) -> ClientId {
        let id = self.session.accept().expect("server full");
        let mut peer = Peer::new(config);
        peer.start();
        self.peers.insert(id, peer);
        id
    }

    pub fn peer(&self, id: ClientId) -> &Peer<LedgerWorld> {
        &self.peers[&id]
    }

    pub fn peer_mut(&mut self, id: ClientId) -> &mut Peer<LedgerWorld> {
        self.peers.get_mut(&id).expect("unknown peer")
    }

    /// Hands each peer's outbox to the session, in id order.
    pub fn upload(&mut self) {
        for (id, peer) in self.peers.iter_mut() {
            if self.frozen.contains(id) {
                continue;
            }
            for packet in peer.take_outbox() {
                self.session.handle_packet(*id, packet);
            }
        }
    }

    /// Hands whatever the transport holds to each peer.
    pub fn download(&mut self) {
        for (id, peer) in self.peers.iter_mut() {
            if self.frozen.contains(id) {
                continue;
            }
            for packet in self.transport.take(*id) {
                self.received.entry(*id).or_default().push(packet.clone());
                if let Err(e) = peer.handle(packet) {
                    self.errors.entry(*id).or_default().push(e);
                }
            }
        }
    }

    /// One loop iteration: inbound, tick, outbound.
    pub fn step(&mut self) -> Tick {
        self.upload();
        let tick = self.session.run_tick(&mut self.transport);
        self.session.flush(&mut self.transport);
        self.download();
        tick
    }

    pub fn run(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.step();
        }
    }

    /// Steps until `done` holds, at most `limit` times.
    pub fn run_until(&mut self, limit: usize, mut done: impl FnMut(&Harness) -> bool) -> bool {
        for _ in 0..limit {
            if done(self) {
                return true;
            }
            self.step();
        }
        done(self)
    }

    /// Connects a peer and runs until it is active.
    pub fn join(&mut self, config: PeerConfig) -> ClientId {
        let id = self.connect(config);
        let active = self.run_until(500, |h| h.peer(id).is_active());
        assert!(active, "peer {} never became active", id);
        id
    }

    /// Commands peer `id` received, in arrival order.
    pub fn commands_for(&self, id: ClientId) -> Vec<Command> {
        self.received
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(|packet| match packet {
                ServerPacket::Command(command) => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn events_of(&mut self, id: ClientId) -> Vec<ClientEvent> {
        self.peer_mut(id).drain_events()
    }

    pub fn received_by(&self, id: ClientId) -> &[ServerPacket] {
        self.received.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// `commands` grouped by tick with the ordering within each tick kept.
pub fn by_tick(commands: &[Command]) -> BTreeMap<Tick, Vec<(ClientId, u32)>> {
    let mut grouped: BTreeMap<Tick, Vec<(ClientId, u32)>> = BTreeMap::new();
    for command in commands {
        grouped
            .entry(command.tick)
            .or_default()
            .push((command.origin, command.tile));
    }
    grouped
}
