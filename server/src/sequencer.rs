//! Command validation, tick assignment and fan-out.
//!
//! The sequencer is the single ordering authority: commands are scheduled at
//! `ceiling + 1` in the order they are accepted, and that order is what every
//! peer (the server included) executes.

use crate::clock::FrameClock;
use crate::error::{ProtocolError, ProtocolResult};
use crate::registry::ConnectionRegistry;
use log::debug;
use shared::{ClientId, Command, CommandRequest, CommandTable, ErrorCode, Role, ServerPacket, Tick};
use std::collections::BTreeMap;

pub struct CommandSequencer {
    table: CommandTable,
    /// Scheduled commands the server's own world has yet to run, FIFO per tick.
    pending: BTreeMap<Tick, Vec<Command>>,
    accepted: u64,
}

impl CommandSequencer {
    pub fn new(table: CommandTable) -> Self {
        Self {
            table,
            pending: BTreeMap::new(),
            accepted: 0,
        }
    }

    /// Checks that `origin`, acting as `origin_role`, may issue `request`.
    pub fn validate(
        &self,
        origin: ClientId,
        origin_role: Role,
        request: &CommandRequest,
    ) -> ProtocolResult<()> {
        let spec = self.table.get(request.code).ok_or_else(|| {
            ProtocolError::new(
                ErrorCode::NotExpected,
                format!("unknown command {}", request.code),
            )
        })?;

        if !request.is_well_formed() {
            return Err(ProtocolError::new(
                ErrorCode::NotExpected,
                format!("malformed {} command", spec.name),
            ));
        }

        if origin.is_server() {
            return Ok(());
        }

        if spec.server_only {
            return Err(ProtocolError::new(
                ErrorCode::Kicked,
                format!("{} is server-only", spec.name),
            ));
        }
        if request.role != origin_role {
            return Err(ProtocolError::new(
                ErrorCode::Kicked,
                format!("acting as {} while playing as {}", request.role, origin_role),
            ));
        }
        if origin_role.is_spectator() && !spec.spectator_allowed {
            return Err(ProtocolError::new(
                ErrorCode::Kicked,
                format!("spectators may not issue {}", spec.name),
            ));
        }
        Ok(())
    }

    /// Validates and schedules a command. The returned command is final.
    pub fn accept(
        &mut self,
        origin: ClientId,
        origin_role: Role,
        request: CommandRequest,
        clock: &FrameClock,
    ) -> ProtocolResult<Command> {
        self.validate(origin, origin_role, &request)?;

        let command = Command::scheduled(origin, request, clock.next_schedulable());
        self.accepted += 1;
        debug!(
            "Sequenced {} from {} for tick {} (#{})",
            command.code, origin, command.tick, self.accepted
        );
        self.pending
            .entry(command.tick)
            .or_default()
            .push(command.clone());
        Ok(command)
    }

    /// Queues `command` for every connection following the command stream.
    ///
    /// Returns the clients whose outbound queue overflowed.
    pub fn fan_out(&self, command: &Command, registry: &mut ConnectionRegistry) -> Vec<ClientId> {
        let mut overflowed = Vec::new();
        for connection in registry.iter_mut() {
            let packet = ServerPacket::Command(command.addressed_to(connection.id));
            if connection.deliver(packet).is_err() {
                overflowed.push(connection.id);
            }
        }
        overflowed
    }

    /// Removes and returns, in order, every command scheduled at or before `tick`.
    pub fn take_due(&mut self, tick: Tick) -> Vec<Command> {
        let later = self.pending.split_off(&(tick + 1));
        let due = std::mem::replace(&mut self.pending, later);
        due.into_values().flatten().collect()
    }

    /// Already-scheduled commands that will run after `tick`, in order.
    pub fn pending_after(&self, tick: Tick) -> Vec<Command> {
        self.pending
            .range(tick + 1..)
            .flat_map(|(_, commands)| commands.iter().cloned())
            .collect()
    }

    pub fn accepted_count(&self) -> u64 {
        self.accepted
    }

    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.accepted = 0;
    }
}
