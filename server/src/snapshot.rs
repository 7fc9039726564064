//! Chunked streaming of a serialized world snapshot to one joining client.
//!
//! The chunk window grows and shrinks with the client: it doubles whenever
//! the client's outbound queue drained completely since the previous pump and
//! halves (never below one) when it did not.

use log::debug;
use shared::{ClientId, ServerPacket, SnapshotPhase, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStatus {
    MoreData,
    Complete,
}

/// Chunk sizing for a transfer.
#[derive(Debug, Clone, Copy)]
pub struct ChunkBounds {
    pub chunk_size: usize,
    pub initial_chunks: usize,
    pub max_chunks: usize,
}

/// One in-flight snapshot transfer.
#[derive(Debug)]
pub struct SnapshotTransfer {
    owner: ClientId,
    tick: Tick,
    data: Vec<u8>,
    offset: usize,
    started: bool,
    finished: bool,
    chunks_per_pump: usize,
    bounds: ChunkBounds,
}

impl SnapshotTransfer {
    /// Starts streaming `data`, a snapshot captured at `tick`, to `owner`.
    pub fn begin(owner: ClientId, tick: Tick, data: Vec<u8>, bounds: ChunkBounds) -> Self {
        Self {
            owner,
            tick,
            data,
            offset: 0,
            started: false,
            finished: false,
            chunks_per_pump: bounds.initial_chunks.max(1),
            bounds,
        }
    }

    pub fn owner(&self) -> ClientId {
        self.owner
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn total_size(&self) -> usize {
        self.data.len()
    }

    pub fn bytes_sent(&self) -> usize {
        self.offset
    }

    pub fn chunks_per_pump(&self) -> usize {
        self.chunks_per_pump
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Produces the next batch of snapshot packets.
    ///
    /// `drained` reports whether the owner's outbound queue emptied since the
    /// last pump; `room` caps how many packets the caller can accept.
    pub fn pump(&mut self, drained: bool, room: usize) -> (Vec<ServerPacket>, PumpStatus) {
        if self.finished {
            return (Vec::new(), PumpStatus::Complete);
        }

        let mut packets = Vec::new();
        if !self.started {
            packets.push(ServerPacket::Snapshot(SnapshotPhase::Start {
                total_size: self.data.len() as u64,
            }));
            self.started = true;
        } else {
            self.adapt_window(drained);
        }

        let budget = self.chunks_per_pump.min(room.saturating_sub(packets.len()));
        for _ in 0..budget {
            if self.offset >= self.data.len() {
                break;
            }
            let end = (self.offset + self.bounds.chunk_size).min(self.data.len());
            packets.push(ServerPacket::Snapshot(SnapshotPhase::Chunk(
                self.data[self.offset..end].to_vec(),
            )));
            self.offset = end;
        }

        if self.offset >= self.data.len() && packets.len() < room {
            packets.push(ServerPacket::Snapshot(SnapshotPhase::End { tick: self.tick }));
            self.finished = true;
            return (packets, PumpStatus::Complete);
        }

        (packets, PumpStatus::MoreData)
    }

    fn adapt_window(&mut self, drained: bool) {
        let previous = self.chunks_per_pump;
        self.chunks_per_pump = if drained {
            (self.chunks_per_pump * 2).min(self.bounds.max_chunks.max(1))
        } else {
            (self.chunks_per_pump / 2).max(1)
        };
        if previous != self.chunks_per_pump {
            debug!(
                "Snapshot to {}: window {} -> {} chunks",
                self.owner, previous, self.chunks_per_pump
            );
        }
    }
}
