//! The peer side of the lockstep protocol, without any I/O.
//!
//! A [`Peer`] consumes server packets through [`Peer::handle`] and leaves the
//! packets it wants to send in an outbox for the driver to write. It never
//! runs a command before the server has assigned it a tick and announced a
//! ceiling at or beyond that tick.

use log::{debug, error, info, warn};
use shared::{
    ChatDestination, ClientId, ClientInfo, ClientPacket, CodecError, Command, CommandCode,
    CommandRequest, ErrorCode, PasswordKind, PeerStatus, Role, ServerPacket, SnapshotPhase, Tick,
    World, WorldError, ACK_INTERVAL, GAME_REVISION,
};
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;

/// How many locally computed checksums are remembered for late `Sync`s.
const CHECKSUM_HISTORY: usize = 256;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("server rejected us: {0}")]
    Rejected(ErrorCode),
    #[error("server asked for a {0:?} password but none was configured")]
    MissingPassword(PasswordKind),
    #[error("unexpected {packet} while {phase:?}")]
    Unexpected { packet: &'static str, phase: Phase },
    #[error("snapshot carried {received} bytes, announced {expected}")]
    SnapshotSize { expected: u64, received: u64 },
    #[error("command for tick {tick} arrived after tick {executed} already ran")]
    LateCommand { tick: Tick, executed: Tick },
    #[error("commands can only be issued once active")]
    NotActive,
    #[error("world error: {0}")]
    World(#[from] WorldError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where the peer is in its own join sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Authorizing,
    Authorized,
    Waiting,
    Downloading,
    CatchingUp,
    Active,
    Closed,
}

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub name: String,
    pub role: Role,
    pub language: u8,
    pub unique_id: String,
    pub game_password: Option<String>,
    pub company_password: Option<String>,
}

impl PeerConfig {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        let name = name.into();
        Self {
            unique_id: format!("peer-{}", name),
            name,
            role,
            language: 0,
            game_password: None,
            company_password: None,
        }
    }
}

/// Things the application driving a peer may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Welcomed { client_id: ClientId },
    Waiting { queue_position: u32 },
    SnapshotLoaded { tick: Tick },
    Activated,
    PeerJoined { client_id: ClientId },
    PeerLeft { client_id: ClientId, code: Option<ErrorCode> },
    /// One of our own commands ran.
    CommandCompleted { code: CommandCode, callback_id: u8, tick: Tick },
    Desync { tick: Tick },
    Chat { from: ClientId, destination: ChatDestination, text: String },
    Rejected(ErrorCode),
    ServerShutdown,
}

/// Reassembles a chunked snapshot stream.
#[derive(Debug)]
pub struct SnapshotReceiver {
    expected: u64,
    data: Vec<u8>,
}

impl SnapshotReceiver {
    pub fn new(expected: u64) -> Self {
        Self {
            expected,
            data: Vec::new(),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<(), ClientError> {
        let received = (self.data.len() + chunk.len()) as u64;
        if received > self.expected {
            return Err(ClientError::SnapshotSize {
                expected: self.expected,
                received,
            });
        }
        self.data.extend_from_slice(chunk);
        Ok(())
    }

    pub fn received(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn finish(self) -> Result<Vec<u8>, ClientError> {
        if self.received() != self.expected {
            return Err(ClientError::SnapshotSize {
                expected: self.expected,
                received: self.received(),
            });
        }
        Ok(self.data)
    }
}

/// Buffers commands until their tick and releases ticks up to the ceiling.
#[derive(Debug, Default)]
pub struct FrameGate {
    executed: Tick,
    ceiling: Tick,
    buffered: BTreeMap<Tick, Vec<Command>>,
}

impl FrameGate {
    /// Starts over from a world that already contains tick `baseline`.
    pub fn reset(&mut self, baseline: Tick) {
        self.executed = baseline;
        self.ceiling = baseline;
        self.buffered.clear();
    }

    pub fn push(&mut self, command: Command) -> Result<(), ClientError> {
        if command.tick <= self.executed {
            return Err(ClientError::LateCommand {
                tick: command.tick,
                executed: self.executed,
            });
        }
        self.buffered.entry(command.tick).or_default().push(command);
        Ok(())
    }

    /// Raises the ceiling. A lower value than the current one is ignored.
    pub fn allow_until(&mut self, ceiling: Tick) {
        self.ceiling = self.ceiling.max(ceiling);
    }

    /// The next tick to simulate and its commands, in arrival order.
    pub fn next(&mut self) -> Option<(Tick, Vec<Command>)> {
        if self.executed >= self.ceiling {
            return None;
        }
        self.executed += 1;
        let commands = self.buffered.remove(&self.executed).unwrap_or_default();
        Some((self.executed, commands))
    }

    pub fn executed(&self) -> Tick {
        self.executed
    }

    pub fn ceiling(&self) -> Tick {
        self.ceiling
    }

    pub fn buffered(&self) -> usize {
        self.buffered.values().map(Vec::len).sum()
    }
}

/// Matches server checksums against ours, whichever arrives first.
#[derive(Debug, Default)]
pub struct SyncVerifier {
    local: VecDeque<(Tick, u64)>,
    remote: BTreeMap<Tick, u64>,
}

impl SyncVerifier {
    /// Records our checksum after `tick`. Returns the tick if it diverges.
    pub fn record_local(&mut self, tick: Tick, checksum: u64) -> Option<Tick> {
        if self.local.len() == CHECKSUM_HISTORY {
            self.local.pop_front();
        }
        self.local.push_back((tick, checksum));
        let remote = self.remote.remove(&tick)?;
        (remote != checksum).then_some(tick)
    }

    /// Records the server's checksum for `tick`. Returns the tick if it diverges.
    pub fn record_remote(&mut self, tick: Tick, checksum: u64) -> Option<Tick> {
        if let Some((_, local)) = self.local.iter().find(|(t, _)| *t == tick) {
            return (*local != checksum).then_some(tick);
        }
        // Too old to compare once we have simulated past it.
        let simulated = self.local.back().map_or(false, |(last, _)| *last >= tick);
        if !simulated {
            self.remote.insert(tick, checksum);
        }
        None
    }

    /// Drops server checksums for ticks this peer will never simulate.
    pub fn forget_before(&mut self, tick: Tick) {
        self.remote = self.remote.split_off(&tick);
        self.local.retain(|(t, _)| *t >= tick);
    }

    pub fn pending(&self) -> usize {
        self.remote.len()
    }
}

pub struct Peer<W: World> {
    config: PeerConfig,
    phase: Phase,
    client_id: Option<ClientId>,
    receiver: Option<SnapshotReceiver>,
    world: Option<W>,
    gate: FrameGate,
    /// Tick the loaded snapshot was taken at.
    gate_baseline: Tick,
    verifier: SyncVerifier,
    last_acked: Tick,
    server_tick: Tick,
    roster: BTreeMap<ClientId, ClientInfo>,
    outbox: Vec<ClientPacket>,
    events: Vec<ClientEvent>,
}

impl<W: World> Peer<W> {
    pub fn new(config: PeerConfig) -> Self {
        Self {
            config,
            phase: Phase::Connecting,
            client_id: None,
            receiver: None,
            world: None,
            gate: FrameGate::default(),
            gate_baseline: 0,
            verifier: SyncVerifier::default(),
            last_acked: 0,
            server_tick: 0,
            roster: BTreeMap::new(),
            outbox: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Queues the opening `Join`.
    pub fn start(&mut self) {
        self.outbox.push(ClientPacket::Join {
            revision: GAME_REVISION.to_string(),
            name: self.config.name.clone(),
            role: self.config.role,
            language: self.config.language,
            unique_id: self.config.unique_id.clone(),
        });
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == Phase::Active
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn world(&self) -> Option<&W> {
        self.world.as_ref()
    }

    pub fn executed_tick(&self) -> Tick {
        self.gate.executed()
    }

    pub fn server_tick(&self) -> Tick {
        self.server_tick
    }

    pub fn roster(&self) -> impl Iterator<Item = &ClientInfo> {
        self.roster.values()
    }

    pub fn take_outbox(&mut self) -> Vec<ClientPacket> {
        std::mem::take(&mut self.outbox)
    }

    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        std::mem::take(&mut self.events)
    }

    /// Asks the server to schedule a command. It runs here only once the
    /// server relays it back.
    pub fn issue(&mut self, request: CommandRequest) -> Result<(), ClientError> {
        if !self.is_active() {
            return Err(ClientError::NotActive);
        }
        self.outbox.push(ClientPacket::Command(request));
        Ok(())
    }

    pub fn chat(&mut self, destination: ChatDestination, text: impl Into<String>) -> Result<(), ClientError> {
        if !self.is_active() {
            return Err(ClientError::NotActive);
        }
        self.outbox.push(ClientPacket::Chat {
            destination,
            text: text.into(),
        });
        Ok(())
    }

    pub fn quit(&mut self, reason: impl Into<String>) {
        if self.phase != Phase::Closed {
            self.outbox.push(ClientPacket::Quit {
                reason: reason.into(),
            });
            self.phase = Phase::Closed;
        }
    }

    /// Processes one packet from the server.
    pub fn handle(&mut self, packet: ServerPacket) -> Result<(), ClientError> {
        match packet {
            ServerPacket::NeedPassword { kind } => self.on_need_password(kind),
            ServerPacket::Welcome { client_id } => {
                self.expect(&[Phase::Connecting, Phase::Authorizing], "Welcome")?;
                info!("Welcomed as {}", client_id);
                self.client_id = Some(client_id);
                self.phase = Phase::Authorized;
                self.outbox.push(ClientPacket::RequestSnapshot);
                self.events.push(ClientEvent::Welcomed { client_id });
                Ok(())
            }
            ServerPacket::Wait { queue_position } => {
                self.expect(&[Phase::Authorized, Phase::Waiting], "Wait")?;
                debug!("Waiting for snapshot at position {}", queue_position);
                self.phase = Phase::Waiting;
                self.events.push(ClientEvent::Waiting { queue_position });
                Ok(())
            }
            ServerPacket::Snapshot(phase) => self.on_snapshot(phase),
            ServerPacket::ClientInfo(info) => {
                if Some(info.client_id) == self.client_id
                    && info.status == PeerStatus::Active
                    && self.phase == Phase::CatchingUp
                {
                    info!("Active at tick {}", self.gate.executed());
                    self.phase = Phase::Active;
                    self.events.push(ClientEvent::Activated);
                }
                self.roster.insert(info.client_id, info);
                Ok(())
            }
            ServerPacket::Joined { client_id } => {
                if Some(client_id) != self.client_id {
                    self.events.push(ClientEvent::PeerJoined { client_id });
                }
                Ok(())
            }
            ServerPacket::Frame {
                current_tick,
                ceiling_tick,
            } => {
                self.expect(&[Phase::CatchingUp, Phase::Active], "Frame")?;
                self.server_tick = self.server_tick.max(current_tick);
                self.gate.allow_until(ceiling_tick);
                self.advance()
            }
            ServerPacket::Sync { tick, checksum } => {
                if self.world.is_none() || tick <= self.gate_baseline {
                    return Ok(());
                }
                if let Some(tick) = self.verifier.record_remote(tick, checksum) {
                    self.report_desync(tick);
                }
                Ok(())
            }
            ServerPacket::Command(command) => {
                if self.world.is_none() {
                    return Err(ClientError::Unexpected {
                        packet: "Command",
                        phase: self.phase,
                    });
                }
                self.gate.push(command)
            }
            ServerPacket::Chat {
                from,
                destination,
                text,
            } => {
                self.events.push(ClientEvent::Chat {
                    from,
                    destination,
                    text,
                });
                Ok(())
            }
            ServerPacket::Error { code } => {
                error!("Server closed our connection: {}", code);
                self.phase = Phase::Closed;
                self.events.push(ClientEvent::Rejected(code));
                Err(ClientError::Rejected(code))
            }
            ServerPacket::ErrorQuit { client_id, code } => {
                self.roster.remove(&client_id);
                self.events.push(ClientEvent::PeerLeft {
                    client_id,
                    code: Some(code),
                });
                Ok(())
            }
            ServerPacket::Quit { client_id, reason } => {
                debug!("{} quit: {}", client_id, reason);
                self.roster.remove(&client_id);
                self.events.push(ClientEvent::PeerLeft {
                    client_id,
                    code: None,
                });
                Ok(())
            }
            ServerPacket::Shutdown => {
                info!("Server is shutting down");
                self.phase = Phase::Closed;
                self.events.push(ClientEvent::ServerShutdown);
                Ok(())
            }
        }
    }

    fn expect(&self, phases: &[Phase], packet: &'static str) -> Result<(), ClientError> {
        if phases.contains(&self.phase) {
            Ok(())
        } else {
            Err(ClientError::Unexpected {
                packet,
                phase: self.phase,
            })
        }
    }

    fn on_need_password(&mut self, kind: PasswordKind) -> Result<(), ClientError> {
        self.expect(&[Phase::Connecting, Phase::Authorizing], "NeedPassword")?;
        let value = match kind {
            PasswordKind::Game => self.config.game_password.clone(),
            PasswordKind::Company => self.config.company_password.clone(),
        }
        .ok_or(ClientError::MissingPassword(kind))?;

        self.phase = Phase::Authorizing;
        self.outbox.push(ClientPacket::Password { kind, value });
        Ok(())
    }

    fn on_snapshot(&mut self, phase: SnapshotPhase) -> Result<(), ClientError> {
        match phase {
            SnapshotPhase::Start { total_size } => {
                self.expect(&[Phase::Authorized, Phase::Waiting], "snapshot start")?;
                debug!("Receiving snapshot of {} bytes", total_size);
                self.phase = Phase::Downloading;
                self.receiver = Some(SnapshotReceiver::new(total_size));
                Ok(())
            }
            SnapshotPhase::Chunk(chunk) => match self.receiver.as_mut() {
                Some(receiver) => receiver.push(&chunk),
                None => Err(ClientError::Unexpected {
                    packet: "snapshot chunk",
                    phase: self.phase,
                }),
            },
            SnapshotPhase::End { tick } => {
                let receiver = self.receiver.take().ok_or(ClientError::Unexpected {
                    packet: "snapshot end",
                    phase: self.phase,
                })?;
                let world = W::restore(&receiver.finish()?)?;
                info!("Loaded snapshot of tick {}", tick);

                self.world = Some(world);
                self.gate.reset(tick);
                self.gate_baseline = tick;
                self.verifier.forget_before(tick + 1);
                self.last_acked = tick;
                self.phase = Phase::CatchingUp;
                self.outbox.push(ClientPacket::SnapshotAck);
                self.outbox.push(ClientPacket::Ack { tick });
                self.events.push(ClientEvent::SnapshotLoaded { tick });
                Ok(())
            }
        }
    }

    /// Simulates every tick the gate releases.
    fn advance(&mut self) -> Result<(), ClientError> {
        let Some(world) = self.world.as_mut() else {
            return Ok(());
        };

        while let Some((tick, commands)) = self.gate.next() {
            for command in &commands {
                world.execute(command);
                if command.is_echo {
                    self.events.push(ClientEvent::CommandCompleted {
                        code: command.code,
                        callback_id: command.callback_id,
                        tick,
                    });
                }
            }
            world.step(tick);

            if let Some(tick) = self.verifier.record_local(tick, world.checksum()) {
                self.outbox.push(ClientPacket::Desync { tick });
                warn!("Desync detected at tick {}", tick);
                self.events.push(ClientEvent::Desync { tick });
            }
        }

        let executed = self.gate.executed();
        if executed >= self.last_acked + ACK_INTERVAL {
            self.outbox.push(ClientPacket::Ack { tick: executed });
            self.last_acked = executed;
        }
        Ok(())
    }

    fn report_desync(&mut self, tick: Tick) {
        warn!("Desync detected at tick {}", tick);
        self.outbox.push(ClientPacket::Desync { tick });
        self.events.push(ClientEvent::Desync { tick });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::world::CMD_BUILD;
    use shared::LedgerWorld;

    fn command(tick: Tick, origin: u32, is_echo: bool) -> Command {
        Command {
            origin: ClientId(origin),
            role: Role::Company(0),
            code: CMD_BUILD,
            params: vec![10],
            tile: tick,
            text: String::new(),
            tick,
            callback_id: 4,
            is_echo,
        }
    }

    fn loaded_peer(tick: Tick) -> Peer<LedgerWorld> {
        let mut peer = Peer::new(PeerConfig::new("tester", Role::Company(0)));
        peer.start();
        peer.handle(ServerPacket::Welcome {
            client_id: ClientId(1),
        })
        .unwrap();

        let mut world = LedgerWorld::new();
        world.step(tick);
        let bytes = world.snapshot().unwrap();
        peer.handle(ServerPacket::Snapshot(SnapshotPhase::Start {
            total_size: bytes.len() as u64,
        }))
        .unwrap();
        for chunk in bytes.chunks(7) {
            peer.handle(ServerPacket::Snapshot(SnapshotPhase::Chunk(chunk.to_vec())))
                .unwrap();
        }
        peer.handle(ServerPacket::Snapshot(SnapshotPhase::End { tick }))
            .unwrap();
        peer
    }

    #[test]
    fn test_gate_never_passes_ceiling() {
        let mut gate = FrameGate::default();
        gate.reset(10);
        gate.push(command(12, 1, false)).unwrap();
        gate.allow_until(11);

        assert_eq!(gate.next().map(|(t, c)| (t, c.len())), Some((11, 0)));
        assert!(gate.next().is_none());

        gate.allow_until(12);
        let (tick, commands) = gate.next().unwrap();
        assert_eq!(tick, 12);
        assert_eq!(commands.len(), 1);
    }

    #[test]
    fn test_gate_rejects_late_command() {
        let mut gate = FrameGate::default();
        gate.reset(5);
        assert!(matches!(
            gate.push(command(5, 1, false)),
            Err(ClientError::LateCommand { tick: 5, executed: 5 })
        ));
    }

    #[test]
    fn test_gate_keeps_arrival_order() {
        let mut gate = FrameGate::default();
        gate.reset(0);
        for origin in [3, 1, 2] {
            gate.push(command(1, origin, false)).unwrap();
        }
        gate.allow_until(1);
        let (_, commands) = gate.next().unwrap();
        let origins: Vec<u32> = commands.iter().map(|c| c.origin.0).collect();
        assert_eq!(origins, vec![3, 1, 2]);
    }

    #[test]
    fn test_receiver_checks_size() {
        let mut receiver = SnapshotReceiver::new(4);
        receiver.push(&[1, 2]).unwrap();
        assert!(receiver.push(&[3, 4, 5]).is_err());

        let receiver = SnapshotReceiver::new(4);
        assert!(matches!(
            receiver.finish(),
            Err(ClientError::SnapshotSize { expected: 4, received: 0 })
        ));
    }

    #[test]
    fn test_verifier_either_order() {
        let mut verifier = SyncVerifier::default();
        assert_eq!(verifier.record_local(4, 99), None);
        assert_eq!(verifier.record_remote(4, 99), None);
        assert_eq!(verifier.record_remote(4, 98), Some(4));

        assert_eq!(verifier.record_remote(8, 7), None);
        assert_eq!(verifier.pending(), 1);
        assert_eq!(verifier.record_local(8, 6), Some(8));
        assert_eq!(verifier.pending(), 0);
    }

    #[test]
    fn test_handshake_with_passwords() {
        let mut config = PeerConfig::new("pw", Role::Company(1));
        config.game_password = Some("open".to_string());
        let mut peer: Peer<LedgerWorld> = Peer::new(config);
        peer.start();
        assert!(matches!(peer.take_outbox()[0], ClientPacket::Join { .. }));

        peer.handle(ServerPacket::NeedPassword {
            kind: PasswordKind::Game,
        })
        .unwrap();
        assert_eq!(
            peer.take_outbox(),
            vec![ClientPacket::Password {
                kind: PasswordKind::Game,
                value: "open".to_string()
            }]
        );

        let err = peer
            .handle(ServerPacket::NeedPassword {
                kind: PasswordKind::Company,
            })
            .unwrap_err();
        assert!(matches!(err, ClientError::MissingPassword(PasswordKind::Company)));
    }

    #[test]
    fn test_snapshot_load_acknowledges() {
        let mut peer = loaded_peer(20);
        assert_eq!(peer.phase(), Phase::CatchingUp);
        assert_eq!(peer.executed_tick(), 20);

        let outbox = peer.take_outbox();
        assert_eq!(
            &outbox[outbox.len() - 2..],
            &[ClientPacket::SnapshotAck, ClientPacket::Ack { tick: 20 }]
        );
    }

    #[test]
    fn test_frames_run_commands_and_ack() {
        let mut peer = loaded_peer(0);
        peer.take_outbox();

        peer.handle(ServerPacket::Command(command(2, 1, true))).unwrap();
        peer.handle(ServerPacket::Frame {
            current_tick: 1,
            ceiling_tick: 2,
        })
        .unwrap();

        assert_eq!(peer.executed_tick(), 2);
        assert_eq!(peer.world().unwrap().tiles.get(&2), Some(&0));
        assert!(peer.drain_events().contains(&ClientEvent::CommandCompleted {
            code: CMD_BUILD,
            callback_id: 4,
            tick: 2
        }));

        peer.handle(ServerPacket::Frame {
            current_tick: ACK_INTERVAL,
            ceiling_tick: ACK_INTERVAL + 1,
        })
        .unwrap();
        assert!(peer
            .take_outbox()
            .contains(&ClientPacket::Ack { tick: ACK_INTERVAL + 1 }));
    }

    #[test]
    fn test_sync_mismatch_reports_desync() {
        let mut peer = loaded_peer(0);
        peer.take_outbox();
        peer.handle(ServerPacket::Sync {
            tick: 2,
            checksum: 0xdead,
        })
        .unwrap();
        peer.handle(ServerPacket::Frame {
            current_tick: 2,
            ceiling_tick: 3,
        })
        .unwrap();

        assert!(peer.take_outbox().contains(&ClientPacket::Desync { tick: 2 }));
        assert!(peer.drain_events().contains(&ClientEvent::Desync { tick: 2 }));
    }

    #[test]
    fn test_activation_and_issue() {
        let mut peer = loaded_peer(0);
        let request = CommandRequest {
            role: Role::Company(0),
            code: CMD_BUILD,
            params: vec![],
            tile: 0,
            text: String::new(),
            callback_id: 0,
        };
        assert!(matches!(peer.issue(request.clone()), Err(ClientError::NotActive)));

        peer.handle(ServerPacket::ClientInfo(ClientInfo {
            client_id: ClientId(1),
            role: Role::Company(0),
            name: "tester".to_string(),
            status: PeerStatus::Active,
        }))
        .unwrap();
        assert!(peer.is_active());
        peer.take_outbox();
        peer.issue(request.clone()).unwrap();
        assert_eq!(peer.take_outbox(), vec![ClientPacket::Command(request)]);
    }

    #[test]
    fn test_error_closes_peer() {
        let mut peer: Peer<LedgerWorld> = Peer::new(PeerConfig::new("x", Role::Spectator));
        let err = peer
            .handle(ServerPacket::Error {
                code: ErrorCode::WrongRevision,
            })
            .unwrap_err();
        assert!(matches!(err, ClientError::Rejected(ErrorCode::WrongRevision)));
        assert_eq!(peer.phase(), Phase::Closed);
    }
}
