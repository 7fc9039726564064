//! The seam between the session and whatever carries bytes to clients.

use shared::{ClientId, ServerPacket};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sent,
    /// The peer cannot take more right now; retry next flush.
    WouldBlock,
    /// The peer is gone.
    Closed,
}

/// A reliable, ordered, non-blocking packet sink per client.
pub trait Transport {
    fn send(&mut self, client_id: ClientId, packet: &ServerPacket) -> SendStatus;

    /// Closes the connection once everything already sent has gone out.
    fn close(&mut self, client_id: ClientId);
}

/// In-memory transport that records every packet per client.
///
/// Each client can be given a per-flush budget to simulate a slow reader.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    inboxes: HashMap<ClientId, Vec<ServerPacket>>,
    budgets: HashMap<ClientId, usize>,
    closed: HashSet<ClientId>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets `client_id` accept at most `budget` more packets until refilled.
    pub fn set_budget(&mut self, client_id: ClientId, budget: usize) {
        self.budgets.insert(client_id, budget);
    }

    pub fn clear_budget(&mut self, client_id: ClientId) {
        self.budgets.remove(&client_id);
    }

    /// Takes everything delivered to `client_id` so far.
    pub fn take(&mut self, client_id: ClientId) -> Vec<ServerPacket> {
        self.inboxes.remove(&client_id).unwrap_or_default()
    }

    pub fn is_closed(&self, client_id: ClientId) -> bool {
        self.closed.contains(&client_id)
    }
}

impl Transport for LoopbackTransport {
    fn send(&mut self, client_id: ClientId, packet: &ServerPacket) -> SendStatus {
        if self.closed.contains(&client_id) {
            return SendStatus::Closed;
        }
        if let Some(budget) = self.budgets.get_mut(&client_id) {
            if *budget == 0 {
                return SendStatus::WouldBlock;
            }
            *budget -= 1;
        }
        self.inboxes
            .entry(client_id)
            .or_default()
            .push(packet.clone());
        SendStatus::Sent
    }

    fn close(&mut self, client_id: ClientId) {
        self.closed.insert(client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_blocks_then_refills() {
        let mut transport = LoopbackTransport::new();
        let id = ClientId(1);
        transport.set_budget(id, 1);

        assert_eq!(transport.send(id, &ServerPacket::Shutdown), SendStatus::Sent);
        assert_eq!(transport.send(id, &ServerPacket::Shutdown), SendStatus::WouldBlock);

        transport.clear_budget(id);
        assert_eq!(transport.send(id, &ServerPacket::Shutdown), SendStatus::Sent);
        assert_eq!(transport.take(id).len(), 2);
        assert!(transport.take(id).is_empty());
    }

    #[test]
    fn test_closed_rejects_sends() {
        let mut transport = LoopbackTransport::new();
        transport.close(ClientId(2));
        assert!(transport.is_closed(ClientId(2)));
        assert_eq!(
            transport.send(ClientId(2), &ServerPacket::Shutdown),
            SendStatus::Closed
        );
    }
}
