//! Connection tracking for the lockstep server
//!
//! This module is the single source of truth for which clients exist and what
//! state they are in. It handles:
//! - Id assignment and capacity limits on accept
//! - Per-connection bounded outbound queues, preserving FIFO order
//! - Holding back sequenced commands while a snapshot is still streaming
//! - The single "current snapshot transfer owner" slot and the wait queue
//!
//! Other components refer to connections by `ClientId` only and look them up
//! here each time, so a removed connection can never be reached through a
//! stale reference.

use crate::error::{ProtocolError, ProtocolResult};
use crate::join::JoinState;
use log::info;
use shared::{ClientId, ClientInfo, ErrorCode, PasswordKind, Role, ServerPacket, Tick};
use std::collections::{BTreeMap, VecDeque};

/// Returned when a connection's outbound queue has no room left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

/// Bounded FIFO of packets waiting to be handed to the transport.
#[derive(Debug)]
pub struct OutboundQueue {
    packets: VecDeque<ServerPacket>,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            packets: VecDeque::new(),
            capacity,
        }
    }

    pub fn push(&mut self, packet: ServerPacket) -> Result<(), QueueFull> {
        if self.packets.len() >= self.capacity {
            return Err(QueueFull);
        }
        self.packets.push_back(packet);
        Ok(())
    }

    pub fn front(&self) -> Option<&ServerPacket> {
        self.packets.front()
    }

    pub fn pop(&mut self) -> Option<ServerPacket> {
        self.packets.pop_front()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_slots(&self) -> usize {
        self.capacity.saturating_sub(self.packets.len())
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

/// A connected client and everything the core tracks about it.
#[derive(Debug)]
pub struct ClientConnection {
    pub id: ClientId,
    pub state: JoinState,
    /// Tick at which `state` was entered.
    pub state_since: Tick,
    pub name: String,
    pub role: Role,
    pub language: u8,
    pub unique_id: String,
    /// Password the client still has to supply while authorizing.
    pub pending_password: Option<PasswordKind>,
    /// Highest tick the client reported as simulated.
    pub last_ack_tick: Tick,
    /// Server tick at which any packet last arrived from the client.
    pub last_seen_tick: Tick,
    pub commands_this_tick: usize,
    pub outbound: OutboundQueue,
    /// Commands sequenced while the snapshot was still streaming.
    deferred: Vec<ServerPacket>,
    /// Set once `Snapshot{End}` is queued; from then on commands go straight out.
    pub snapshot_sent: bool,
}

impl ClientConnection {
    pub fn new(id: ClientId, tick: Tick, outbound_capacity: usize) -> Self {
        Self {
            id,
            state: JoinState::Inactive,
            state_since: tick,
            name: String::new(),
            role: Role::Spectator,
            language: 0,
            unique_id: String::new(),
            pending_password: None,
            last_ack_tick: 0,
            last_seen_tick: tick,
            commands_this_tick: 0,
            outbound: OutboundQueue::new(outbound_capacity),
            deferred: Vec::new(),
            snapshot_sent: false,
        }
    }

    /// Moves to `next`, rejecting transitions the join lifecycle forbids.
    pub fn advance(&mut self, next: JoinState, tick: Tick) -> ProtocolResult<()> {
        if !self.state.can_advance_to(next) {
            return Err(ProtocolError::new(
                ErrorCode::NotExpected,
                format!("illegal transition {:?} -> {:?}", self.state, next),
            ));
        }
        info!("Client {} {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
        self.state_since = tick;
        Ok(())
    }

    /// Roster entry, once the client is visible to others.
    pub fn info(&self) -> Option<ClientInfo> {
        self.state.status().map(|status| ClientInfo {
            client_id: self.id,
            role: self.role,
            name: self.name.clone(),
            status,
        })
    }

    /// Routes a sequenced command packet according to the join state.
    pub fn deliver(&mut self, packet: ServerPacket) -> Result<(), QueueFull> {
        if !self.state.follows_commands() {
            return Ok(());
        }
        if self.state == JoinState::ReceivingSnapshot && !self.snapshot_sent {
            if self.deferred.len() >= self.outbound.capacity() {
                return Err(QueueFull);
            }
            self.deferred.push(packet);
            return Ok(());
        }
        self.outbound.push(packet)
    }

    /// Appends held-back commands behind the snapshot stream.
    pub fn release_deferred(&mut self) -> Result<(), QueueFull> {
        self.snapshot_sent = true;
        for packet in std::mem::take(&mut self.deferred) {
            self.outbound.push(packet)?;
        }
        Ok(())
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }
}

/// All live connections, keyed by id.
///
/// Iteration is in id order, which fixes the fan-out order of broadcasts.
pub struct ConnectionRegistry {
    clients: BTreeMap<ClientId, ClientConnection>,
    next_client_id: u32,
    max_clients: usize,
    outbound_capacity: usize,
    transfer_owner: Option<ClientId>,
    snapshot_queue: VecDeque<ClientId>,
}

impl ConnectionRegistry {
    /// Client ids start from 1; 0 belongs to the server.
    pub fn new(max_clients: usize, outbound_capacity: usize) -> Self {
        Self {
            clients: BTreeMap::new(),
            next_client_id: 1,
            max_clients,
            outbound_capacity,
            transfer_owner: None,
            snapshot_queue: VecDeque::new(),
        }
    }

    /// Registers a freshly accepted connection.
    ///
    /// Returns `None` when the server is at capacity.
    pub fn register(&mut self, tick: Tick) -> Option<ClientId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = ClientId(self.next_client_id);
        self.next_client_id += 1;

        let connection = ClientConnection::new(client_id, tick, self.outbound_capacity);
        info!("Client {} registered", client_id);
        self.clients.insert(client_id, connection);

        Some(client_id)
    }

    pub fn get(&self, client_id: ClientId) -> Option<&ClientConnection> {
        self.clients.get(&client_id)
    }

    pub fn get_mut(&mut self, client_id: ClientId) -> Option<&mut ClientConnection> {
        self.clients.get_mut(&client_id)
    }

    /// Removes a connection. Removing an unknown id is a no-op.
    ///
    /// Also drops the client from the snapshot wait queue and frees the
    /// transfer slot if it held it.
    pub fn remove(&mut self, client_id: ClientId) -> Option<ClientConnection> {
        let mut connection = self.clients.remove(&client_id)?;
        self.snapshot_queue.retain(|id| *id != client_id);
        self.release_transfer(client_id);
        connection.state = JoinState::Disconnected;
        info!("Client {} removed", client_id);
        Some(connection)
    }

    pub fn for_each(&self, mut f: impl FnMut(&ClientConnection)) {
        for connection in self.clients.values() {
            f(connection);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientConnection> {
        self.clients.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientConnection> {
        self.clients.values_mut()
    }

    pub fn ids(&self) -> Vec<ClientId> {
        self.clients.keys().copied().collect()
    }

    /// Finds a client that has claimed `name`, announced or still
    /// authorizing.
    pub fn find_by_name(&self, name: &str) -> Option<ClientId> {
        self.clients
            .values()
            .find(|c| c.state != JoinState::Inactive && c.name == name)
            .map(|c| c.id)
    }

    pub fn count_in(&self, state: JoinState) -> usize {
        self.clients.values().filter(|c| c.state == state).count()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn transfer_owner(&self) -> Option<ClientId> {
        self.transfer_owner
    }

    /// Takes the transfer slot for `client_id` if nobody holds it.
    pub fn try_claim_transfer(&mut self, client_id: ClientId) -> bool {
        match self.transfer_owner {
            Some(owner) => owner == client_id,
            None => {
                self.transfer_owner = Some(client_id);
                true
            }
        }
    }

    /// Frees the slot if `client_id` holds it. Returns whether it did.
    pub fn release_transfer(&mut self, client_id: ClientId) -> bool {
        if self.transfer_owner == Some(client_id) {
            self.transfer_owner = None;
            true
        } else {
            false
        }
    }

    /// Parks a client behind the running transfer. Returns its 1-based position.
    pub fn enqueue_waiting(&mut self, client_id: ClientId) -> u32 {
        if !self.snapshot_queue.contains(&client_id) {
            self.snapshot_queue.push_back(client_id);
        }
        self.waiting_position(client_id).unwrap_or(0)
    }

    pub fn next_waiting(&mut self) -> Option<ClientId> {
        self.snapshot_queue.pop_front()
    }

    pub fn waiting_position(&self, client_id: ClientId) -> Option<u32> {
        self.snapshot_queue
            .iter()
            .position(|id| *id == client_id)
            .map(|index| index as u32 + 1)
    }

    pub fn waiting(&self) -> Vec<ClientId> {
        self.snapshot_queue.iter().copied().collect()
    }
}
