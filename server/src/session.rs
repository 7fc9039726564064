//! The authoritative lockstep session.
//!
//! `Session` owns every piece of shared state (registry, clock, sequencer,
//! snapshot transfer, lag and sync bookkeeping, the server's own world) and is
//! driven from a single loop. It performs no I/O itself: the host feeds it
//! parsed packets and hands it a `Transport` to flush into. One iteration is:
//!
//! 1. drain inbound packets into [`Session::handle_packet`]
//! 2. [`Session::tick`]: advance the clock, run due commands, pump the snapshot
//! 3. [`Session::flush`]: hand queued packets to the transport
//! 4. [`Session::supervise`]: lag eviction and sync checks
//!
//! [`Session::run_tick`] performs steps 2 to 4.

use crate::clock::FrameClock;
use crate::config::ServerConfig;
use crate::error::{ProtocolError, ProtocolResult};
use crate::join::JoinState;
use crate::lag::{LagSupervisor, LagThresholds, LagVerdict};
use crate::registry::ConnectionRegistry;
use crate::sequencer::CommandSequencer;
use crate::snapshot::{ChunkBounds, PumpStatus, SnapshotTransfer};
use crate::sync::SyncMonitor;
use crate::transport::{SendStatus, Transport};
use log::{debug, error, info, warn};
use shared::{
    ChatDestination, ClientId, ClientInfo, ClientPacket, Command, CommandRequest, CommandTable,
    ErrorCode, PasswordKind, PeerStatus, Role, ServerPacket, Tick, World, GAME_REVISION,
    MAX_CHAT_TEXT, MAX_CLIENT_NAME,
};

/// Things the host application may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ClientJoined {
        client_id: ClientId,
        name: String,
    },
    ClientActivated {
        client_id: ClientId,
    },
    ClientLeft {
        client_id: ClientId,
        code: Option<ErrorCode>,
    },
    /// A peer's state diverged; resynchronization is up to the host.
    Desync {
        client_id: ClientId,
        tick: Tick,
    },
    Chat {
        from: ClientId,
        destination: ChatDestination,
        text: String,
    },
}

/// Why a connection is going away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    Quit(String),
    Error(ErrorCode),
    ConnectionLost,
}

pub struct Session<W: World> {
    config: ServerConfig,
    registry: ConnectionRegistry,
    clock: FrameClock,
    sequencer: CommandSequencer,
    sync: SyncMonitor,
    lag: LagSupervisor,
    transfer: Option<SnapshotTransfer>,
    world: W,
    /// Last packets for connections already removed, sent before closing.
    farewells: Vec<(ClientId, Vec<ServerPacket>)>,
    overflowed: Vec<ClientId>,
    events: Vec<SessionEvent>,
}

impl<W: World> Session<W> {
    pub fn new(config: ServerConfig, world: W, table: CommandTable) -> Self {
        let thresholds = LagThresholds {
            warn: config.lag_warn_ticks,
            kill: config.lag_kill_ticks,
            catch_up_kill: config.catch_up_kill_ticks,
            password_timeout: config.password_timeout_ticks,
            join_timeout: config.join_timeout_ticks,
            snapshot_timeout: config.snapshot_timeout_ticks,
        };

        Self {
            registry: ConnectionRegistry::new(config.max_clients, config.outbound_capacity),
            clock: FrameClock::new(config.look_ahead_ticks),
            sequencer: CommandSequencer::new(table),
            sync: SyncMonitor::new(config.sync_interval_ticks),
            lag: LagSupervisor::new(thresholds),
            transfer: None,
            world,
            farewells: Vec::new(),
            overflowed: Vec::new(),
            events: Vec::new(),
            config,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    pub fn world(&self) -> &W {
        &self.world
    }

    pub fn lag(&self) -> &LagSupervisor {
        &self.lag
    }

    pub fn transfer(&self) -> Option<&SnapshotTransfer> {
        self.transfer.as_ref()
    }

    pub fn state_of(&self, client_id: ClientId) -> Option<JoinState> {
        self.registry.get(client_id).map(|c| c.state)
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Registers a newly accepted socket. `None` means the server is full.
    pub fn accept(&mut self) -> Option<ClientId> {
        self.registry.register(self.clock.current())
    }

    /// Feeds one parsed packet from `client_id` into the core.
    ///
    /// Any rejection disconnects the sender with a typed error.
    pub fn handle_packet(&mut self, client_id: ClientId, packet: ClientPacket) {
        let now = self.clock.current();
        let Some(connection) = self.registry.get_mut(client_id) else {
            debug!("Dropping {} from departed client {}", packet.kind(), client_id);
            return;
        };
        connection.last_seen_tick = now;

        if let Err(err) = self.dispatch(client_id, packet) {
            warn!("Client {} rejected: {}", client_id, err);
            self.disconnect(client_id, Disconnect::Error(err.code));
        }
        self.evict_overflowed();
    }

    fn dispatch(&mut self, client_id: ClientId, packet: ClientPacket) -> ProtocolResult<()> {
        let state = self.connection_state(client_id)?;
        if !state.accepts(&packet) {
            return Err(ProtocolError::unexpected(packet.kind(), state));
        }

        match packet {
            ClientPacket::Join {
                revision,
                name,
                role,
                language,
                unique_id,
            } => self.on_join(client_id, revision, name, role, language, unique_id),
            ClientPacket::Password { kind, value } => self.on_password(client_id, kind, value),
            ClientPacket::RequestSnapshot => self.on_request_snapshot(client_id),
            ClientPacket::SnapshotAck => self.on_snapshot_ack(client_id),
            ClientPacket::Command(request) => self.on_command(client_id, request),
            ClientPacket::Ack { tick } => self.on_ack(client_id, tick),
            ClientPacket::Chat { destination, text } => self.on_chat(client_id, destination, text),
            ClientPacket::Desync { tick } => {
                self.sync.report_desync(client_id, tick);
                self.events.push(SessionEvent::Desync { client_id, tick });
                Ok(())
            }
            ClientPacket::Quit { reason } => {
                self.disconnect(client_id, Disconnect::Quit(reason));
                Ok(())
            }
        }
    }

    fn connection_state(&self, client_id: ClientId) -> ProtocolResult<JoinState> {
        self.registry
            .get(client_id)
            .map(|c| c.state)
            .ok_or_else(|| ProtocolError::new(ErrorCode::General, "unknown connection"))
    }

    fn on_join(
        &mut self,
        client_id: ClientId,
        revision: String,
        name: String,
        role: Role,
        language: u8,
        unique_id: String,
    ) -> ProtocolResult<()> {
        if revision != GAME_REVISION {
            return Err(ProtocolError::new(
                ErrorCode::WrongRevision,
                format!("client runs {:?}, server runs {:?}", revision, GAME_REVISION),
            ));
        }
        if name.trim().is_empty() || name.len() > MAX_CLIENT_NAME {
            return Err(ProtocolError::new(ErrorCode::NotExpected, "invalid client name"));
        }
        if let Role::Company(company) = role {
            if company >= self.config.max_companies {
                return Err(ProtocolError::new(
                    ErrorCode::NotAuthorized,
                    format!("no such company {}", company),
                ));
            }
        }
        if name == self.config.server_name || self.registry.find_by_name(&name).is_some() {
            return Err(ProtocolError::new(ErrorCode::NameInUse, name));
        }

        let needs_company_password = self.company_password_for(role).is_some();
        let pending = if self.config.game_password.is_some() {
            Some(PasswordKind::Game)
        } else if needs_company_password {
            Some(PasswordKind::Company)
        } else {
            None
        };

        let now = self.clock.current();
        let connection = self.connection_mut(client_id)?;
        info!("Client {} joining as {:?} ({})", client_id, name, role);
        connection.name = name;
        connection.role = role;
        connection.language = language;
        connection.unique_id = unique_id;

        match pending {
            Some(kind) => {
                connection.pending_password = Some(kind);
                connection.advance(JoinState::Authorizing, now)?;
                self.send(client_id, ServerPacket::NeedPassword { kind });
                Ok(())
            }
            None => self.authorize(client_id),
        }
    }

    fn on_password(
        &mut self,
        client_id: ClientId,
        kind: PasswordKind,
        value: String,
    ) -> ProtocolResult<()> {
        let role = {
            let connection = self.connection_mut(client_id)?;
            if connection.pending_password != Some(kind) {
                return Err(ProtocolError::new(
                    ErrorCode::NotExpected,
                    format!("{:?} password not requested", kind),
                ));
            }
            connection.role
        };

        let expected = match kind {
            PasswordKind::Game => self.config.game_password.clone(),
            PasswordKind::Company => self.company_password_for(role).map(str::to_string),
        };
        if expected.as_deref() != Some(value.as_str()) {
            return Err(ProtocolError::new(
                ErrorCode::WrongPassword,
                format!("{:?} password rejected", kind),
            ));
        }

        if kind == PasswordKind::Game && self.company_password_for(role).is_some() {
            self.connection_mut(client_id)?.pending_password = Some(PasswordKind::Company);
            self.send(
                client_id,
                ServerPacket::NeedPassword {
                    kind: PasswordKind::Company,
                },
            );
            return Ok(());
        }

        self.connection_mut(client_id)?.pending_password = None;
        self.authorize(client_id)
    }

    fn company_password_for(&self, role: Role) -> Option<&str> {
        match role {
            Role::Company(company) => self.config.company_password(company),
            Role::Spectator => None,
        }
    }

    fn authorize(&mut self, client_id: ClientId) -> ProtocolResult<()> {
        let now = self.clock.current();
        let name = {
            let connection = self.connection_mut(client_id)?;
            connection.advance(JoinState::Authorized, now)?;
            connection.name.clone()
        };

        self.send(client_id, ServerPacket::Welcome { client_id });
        self.send(client_id, ServerPacket::ClientInfo(self.server_info()));
        let roster: Vec<ClientInfo> = self
            .registry
            .iter()
            .filter(|c| c.id != client_id)
            .filter_map(|c| c.info())
            .collect();
        for info in roster {
            self.send(client_id, ServerPacket::ClientInfo(info));
        }

        self.broadcast_info(client_id);
        self.events.push(SessionEvent::ClientJoined { client_id, name });
        Ok(())
    }

    fn server_info(&self) -> ClientInfo {
        ClientInfo {
            client_id: ClientId::SERVER,
            role: Role::Spectator,
            name: self.config.server_name.clone(),
            status: PeerStatus::Active,
        }
    }

    fn on_request_snapshot(&mut self, client_id: ClientId) -> ProtocolResult<()> {
        if self.registry.try_claim_transfer(client_id) {
            return self.begin_transfer(client_id);
        }

        let now = self.clock.current();
        self.connection_mut(client_id)?
            .advance(JoinState::AwaitingSnapshot, now)?;
        let queue_position = self.registry.enqueue_waiting(client_id);
        info!(
            "Client {} waits for snapshot at position {}",
            client_id, queue_position
        );
        self.send(client_id, ServerPacket::Wait { queue_position });
        self.broadcast_info(client_id);
        Ok(())
    }

    /// Captures the world and starts streaming it to `client_id`, which must
    /// already hold the transfer slot.
    fn begin_transfer(&mut self, client_id: ClientId) -> ProtocolResult<()> {
        let now = self.clock.current();
        let data = self.world.snapshot().map_err(|e| {
            error!("Could not capture snapshot for {}: {}", client_id, e);
            ProtocolError::new(ErrorCode::General, "snapshot unavailable")
        })?;

        let baseline = self.sequencer.pending_after(now);
        let connection = self.connection_mut(client_id)?;
        connection.advance(JoinState::ReceivingSnapshot, now)?;
        connection.snapshot_sent = false;
        for command in baseline {
            let packet = ServerPacket::Command(command.addressed_to(client_id));
            if connection.deliver(packet).is_err() {
                return Err(ProtocolError::new(ErrorCode::TooSlow, "baseline overflow"));
            }
        }

        info!(
            "Snapshot transfer to {} begins at tick {} ({} bytes)",
            client_id,
            now,
            data.len()
        );
        let bounds = ChunkBounds {
            chunk_size: self.config.snapshot_chunk_size,
            initial_chunks: self.config.initial_chunks_per_pump,
            max_chunks: self.config.max_chunks_per_pump,
        };
        self.transfer = Some(SnapshotTransfer::begin(client_id, now, data, bounds));
        self.broadcast_info(client_id);
        Ok(())
    }

    fn on_snapshot_ack(&mut self, client_id: ClientId) -> ProtocolResult<()> {
        let baseline = match &self.transfer {
            Some(transfer) if transfer.owner() == client_id && transfer.is_finished() => {
                transfer.tick()
            }
            _ => {
                return Err(ProtocolError::new(
                    ErrorCode::NotExpected,
                    "snapshot acknowledged before it was sent",
                ))
            }
        };

        let now = self.clock.current();
        {
            let connection = self.connection_mut(client_id)?;
            connection.advance(JoinState::SnapshotComplete, now)?;
            connection.last_ack_tick = baseline;
        }
        self.transfer = None;
        self.registry.release_transfer(client_id);
        self.lag.track(client_id, baseline, now);
        info!("Client {} loaded snapshot of tick {}", client_id, baseline);

        self.send(client_id, ServerPacket::Joined { client_id });
        self.send_to_active(ServerPacket::Joined { client_id }, Some(client_id));
        self.broadcast_info(client_id);
        self.start_next_transfer();
        Ok(())
    }

    /// Hands the free transfer slot to the first client still waiting.
    fn start_next_transfer(&mut self) {
        if self.registry.transfer_owner().is_some() {
            return;
        }
        while let Some(next) = self.registry.next_waiting() {
            let waiting = self.state_of(next) == Some(JoinState::AwaitingSnapshot);
            if waiting && self.registry.try_claim_transfer(next) {
                if let Err(err) = self.begin_transfer(next) {
                    self.disconnect(next, Disconnect::Error(err.code));
                    continue;
                }
                break;
            }
        }
        self.refresh_wait_positions();
    }

    fn refresh_wait_positions(&mut self) {
        for client_id in self.registry.waiting() {
            if let Some(queue_position) = self.registry.waiting_position(client_id) {
                self.send(client_id, ServerPacket::Wait { queue_position });
            }
        }
    }

    fn on_command(&mut self, client_id: ClientId, request: CommandRequest) -> ProtocolResult<()> {
        let limit = self.config.max_commands_per_tick;
        let role = {
            let connection = self.connection_mut(client_id)?;
            connection.commands_this_tick += 1;
            if connection.commands_this_tick > limit {
                return Err(ProtocolError::new(
                    ErrorCode::TooManyCommands,
                    format!("more than {} commands in one tick", limit),
                ));
            }
            connection.role
        };

        let command = self
            .sequencer
            .accept(client_id, role, request, &self.clock)?;
        self.distribute(&command);
        Ok(())
    }

    /// Schedules a command issued by the server itself.
    pub fn issue_local_command(&mut self, request: CommandRequest) -> ProtocolResult<Command> {
        let command =
            self.sequencer
                .accept(ClientId::SERVER, Role::Spectator, request, &self.clock)?;
        self.distribute(&command);
        self.evict_overflowed();
        Ok(command)
    }

    fn distribute(&mut self, command: &Command) {
        let overflowed = self.sequencer.fan_out(command, &mut self.registry);
        self.overflowed.extend(overflowed);
    }

    fn on_ack(&mut self, client_id: ClientId, tick: Tick) -> ProtocolResult<()> {
        if tick > self.clock.ceiling() {
            return Err(ProtocolError::new(
                ErrorCode::NotExpected,
                format!("ack for tick {} beyond ceiling {}", tick, self.clock.ceiling()),
            ));
        }

        let now = self.clock.current();
        let tolerance = self.config.active_tolerance_ticks;
        self.lag.record_ack(client_id, tick, now);

        let connection = self.connection_mut(client_id)?;
        connection.last_ack_tick = connection.last_ack_tick.max(tick);
        let caught_up = now.saturating_sub(connection.last_ack_tick) <= tolerance;
        if connection.state == JoinState::CatchingUp && caught_up {
            connection.advance(JoinState::Active, now)?;
            info!("Client {} is active at tick {}", client_id, now);
            self.broadcast_info(client_id);
            self.events.push(SessionEvent::ClientActivated { client_id });
        }
        Ok(())
    }

    fn on_chat(
        &mut self,
        from: ClientId,
        destination: ChatDestination,
        text: String,
    ) -> ProtocolResult<()> {
        if text.len() > MAX_CHAT_TEXT {
            return Err(ProtocolError::new(ErrorCode::NotExpected, "chat line too long"));
        }

        let recipients: Vec<ClientId> = self
            .registry
            .iter()
            .filter(|c| c.state == JoinState::Active)
            .filter(|c| {
                c.id == from
                    || match destination {
                        ChatDestination::Broadcast => true,
                        ChatDestination::Team(role) => c.role == role,
                        ChatDestination::Client(target) => c.id == target,
                    }
            })
            .map(|c| c.id)
            .collect();

        for client_id in recipients {
            self.send(
                client_id,
                ServerPacket::Chat {
                    from,
                    destination,
                    text: text.clone(),
                },
            );
        }
        self.events.push(SessionEvent::Chat {
            from,
            destination,
            text,
        });
        Ok(())
    }

    /// Removes a client everywhere it is referenced. Unknown ids are ignored.
    pub fn disconnect(&mut self, client_id: ClientId, reason: Disconnect) {
        let Some(announced) = self.registry.get(client_id).map(|c| c.state.is_announced())
        else {
            return;
        };
        let mut last_words = Vec::new();
        if let Some(mut connection) = self.registry.remove(client_id) {
            while let Some(packet) = connection.outbound.pop() {
                last_words.push(packet);
            }
        }
        self.lag.forget(client_id);
        let held_transfer = self
            .transfer
            .as_ref()
            .map_or(false, |t| t.owner() == client_id);
        if held_transfer {
            self.transfer = None;
        }

        let (farewell, relay, code) = match &reason {
            Disconnect::Error(code) => (
                Some(ServerPacket::Error { code: *code }),
                ServerPacket::ErrorQuit {
                    client_id,
                    code: code.for_relay(),
                },
                Some(*code),
            ),
            Disconnect::Quit(reason) => (
                None,
                ServerPacket::Quit {
                    client_id,
                    reason: reason.clone(),
                },
                None,
            ),
            Disconnect::ConnectionLost => (
                None,
                ServerPacket::Quit {
                    client_id,
                    reason: "connection lost".to_string(),
                },
                None,
            ),
        };
        info!("Client {} disconnected: {:?}", client_id, reason);

        last_words.extend(farewell);
        self.farewells.push((client_id, last_words));
        if announced {
            self.send_to_active(relay, None);
        }
        self.events.push(SessionEvent::ClientLeft { client_id, code });

        if held_transfer {
            self.start_next_transfer();
        } else {
            self.refresh_wait_positions();
        }
    }

    /// Advances the session by one tick: runs due commands on the server's
    /// world, announces the new frame and streams the next snapshot batch.
    pub fn tick(&mut self) -> Tick {
        let now = self.clock.tick();
        for command in self.sequencer.take_due(now) {
            self.world.execute(&command);
        }
        self.world.step(now);

        let frame = ServerPacket::Frame {
            current_tick: now,
            ceiling_tick: self.clock.ceiling(),
        };
        let mut promoted = Vec::new();
        for connection in self.registry.iter_mut() {
            connection.commands_this_tick = 0;
            if !connection.state.receives_frames() {
                continue;
            }
            if connection.outbound.push(frame.clone()).is_err() {
                self.overflowed.push(connection.id);
            }
            if connection.state == JoinState::SnapshotComplete {
                promoted.push(connection.id);
            }
        }
        for client_id in promoted {
            if let Some(connection) = self.registry.get_mut(client_id) {
                if connection.advance(JoinState::CatchingUp, now).is_ok() {
                    self.broadcast_info(client_id);
                }
            }
        }

        self.pump_transfer();
        self.evict_overflowed();
        if now % 300 == 0 {
            debug!(
                "Tick {}: {} clients, {} commands sequenced",
                now,
                self.registry.len(),
                self.sequencer.accepted_count()
            );
        }
        now
    }

    fn pump_transfer(&mut self) {
        let Some(transfer) = self.transfer.as_mut() else {
            return;
        };
        let owner = transfer.owner();
        let Some(connection) = self.registry.get_mut(owner) else {
            return;
        };
        if connection.snapshot_sent {
            return;
        }

        let drained = connection.outbound.is_empty();
        let room = connection.outbound.free_slots();
        let (packets, status) = transfer.pump(drained, room);
        for packet in packets {
            if connection.outbound.push(packet).is_err() {
                self.overflowed.push(owner);
                return;
            }
        }
        if status == PumpStatus::Complete {
            info!(
                "Snapshot stream to {} complete ({} bytes)",
                owner,
                transfer.total_size()
            );
            if connection.release_deferred().is_err() {
                self.overflowed.push(owner);
            }
        }
    }

    /// Hands queued packets to the transport and closes departed clients.
    pub fn flush(&mut self, transport: &mut impl Transport) {
        let mut lost = Vec::new();
        for connection in self.registry.iter_mut() {
            while let Some(packet) = connection.outbound.front() {
                match transport.send(connection.id, packet) {
                    SendStatus::Sent => {
                        connection.outbound.pop();
                    }
                    SendStatus::WouldBlock => break,
                    SendStatus::Closed => {
                        lost.push(connection.id);
                        break;
                    }
                }
            }
        }
        for client_id in lost {
            self.disconnect(client_id, Disconnect::ConnectionLost);
        }

        for (client_id, packets) in std::mem::take(&mut self.farewells) {
            for packet in &packets {
                if transport.send(client_id, packet) != SendStatus::Sent {
                    break;
                }
            }
            transport.close(client_id);
        }
    }

    /// Evicts lagging or stalled clients and broadcasts due checksums.
    pub fn supervise(&mut self) {
        let now = self.clock.current();

        let mut evictions = Vec::new();
        for connection in self.registry.iter() {
            match self.lag.inspect(connection, now) {
                LagVerdict::Evict(code) => evictions.push((connection.id, code)),
                LagVerdict::Warn { .. } | LagVerdict::Healthy => {}
            }
        }
        for (client_id, code) in evictions {
            warn!("Evicting client {}: {}", client_id, code);
            self.disconnect(client_id, Disconnect::Error(code));
        }

        if let Some(packet) = self.sync.check(now, &self.world) {
            for connection in self.registry.iter_mut() {
                if connection.state.receives_frames() && connection.outbound.push(packet.clone()).is_err() {
                    self.overflowed.push(connection.id);
                }
            }
        }
        self.evict_overflowed();
    }

    /// Steps 2 to 4 of a loop iteration.
    pub fn run_tick(&mut self, transport: &mut impl Transport) -> Tick {
        let now = self.tick();
        self.flush(transport);
        self.supervise();
        now
    }

    /// Tells everyone the server is going away, closes every connection and
    /// resets the session clock.
    pub fn shutdown(&mut self, transport: &mut impl Transport) {
        info!("Shutting down session at tick {}", self.clock.current());
        self.flush(transport);
        for client_id in self.registry.ids() {
            let mut last_words = Vec::new();
            if let Some(mut connection) = self.registry.remove(client_id) {
                while let Some(packet) = connection.outbound.pop() {
                    last_words.push(packet);
                }
            }
            last_words.push(ServerPacket::Shutdown);
            self.lag.forget(client_id);
            self.farewells.push((client_id, last_words));
        }
        self.transfer = None;
        self.flush(transport);
        self.sequencer.reset();
        self.sync.reset();
        self.clock.reset();
    }

    fn evict_overflowed(&mut self) {
        let mut overflowed = std::mem::take(&mut self.overflowed);
        overflowed.dedup();
        for client_id in overflowed {
            warn!("Client {} cannot keep up with its outbound queue", client_id);
            self.disconnect(client_id, Disconnect::Error(ErrorCode::TooSlow));
        }
    }

    fn connection_mut(
        &mut self,
        client_id: ClientId,
    ) -> ProtocolResult<&mut crate::registry::ClientConnection> {
        self.registry
            .get_mut(client_id)
            .ok_or_else(|| ProtocolError::new(ErrorCode::General, "unknown connection"))
    }

    fn send(&mut self, client_id: ClientId, packet: ServerPacket) {
        if let Some(connection) = self.registry.get_mut(client_id) {
            if connection.outbound.push(packet).is_err() {
                self.overflowed.push(client_id);
            }
        }
    }

    fn send_to_active(&mut self, packet: ServerPacket, exclude: Option<ClientId>) {
        for connection in self.registry.iter_mut() {
            if connection.state != JoinState::Active || Some(connection.id) == exclude {
                continue;
            }
            if connection.outbound.push(packet.clone()).is_err() {
                self.overflowed.push(connection.id);
            }
        }
    }

    /// Tells active peers about `client_id`'s current state. Once active,
    /// the client itself is told too.
    fn broadcast_info(&mut self, client_id: ClientId) {
        let info = self.registry.get(client_id).and_then(|c| c.info());
        if let Some(info) = info {
            self.send_to_active(ServerPacket::ClientInfo(info), None);
        }
    }
}
