//! Periodic checksum broadcast for desync detection.

use log::error;
use shared::{ClientId, ServerPacket, Tick, World};
use std::collections::VecDeque;

/// How many recent checksums are kept to annotate desync reports.
const CHECKSUM_HISTORY: usize = 32;

pub struct SyncMonitor {
    interval: Tick,
    history: VecDeque<(Tick, u64)>,
}

impl SyncMonitor {
    pub fn new(interval: Tick) -> Self {
        Self {
            interval: interval.max(1),
            history: VecDeque::with_capacity(CHECKSUM_HISTORY),
        }
    }

    pub fn is_due(&self, tick: Tick) -> bool {
        tick > 0 && tick % self.interval == 0
    }

    /// Computes the authoritative checksum at `tick` when one is due.
    pub fn check<W: World>(&mut self, tick: Tick, world: &W) -> Option<ServerPacket> {
        if !self.is_due(tick) {
            return None;
        }

        let checksum = world.checksum();
        if self.history.len() == CHECKSUM_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back((tick, checksum));
        Some(ServerPacket::Sync { tick, checksum })
    }

    pub fn checksum_at(&self, tick: Tick) -> Option<u64> {
        self.history
            .iter()
            .find(|(t, _)| *t == tick)
            .map(|(_, checksum)| *checksum)
    }

    /// Logs a peer-reported divergence with what the server knows about `tick`.
    pub fn report_desync(&self, client_id: ClientId, tick: Tick) {
        match self.checksum_at(tick) {
            Some(checksum) => error!(
                "Desync: client {} diverged at tick {} (server checksum {:016x})",
                client_id, tick, checksum
            ),
            None => error!("Desync: client {} diverged at tick {}", client_id, tick),
        }
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}
