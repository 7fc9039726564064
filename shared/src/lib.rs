//! Types shared by the lockstep server and its peers.
//!
//! Everything that has to be byte-identical on both ends of a connection lives
//! here: the wire packets, the length-prefixed framing, the command model and
//! the `World` collaborator that executes commands.

pub mod codec;
pub mod command;
pub mod protocol;
pub mod world;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use codec::{decode_frame, encode_frame, read_frame, write_frame, CodecError};
pub use command::{Command, CommandCode, CommandRequest, CommandSpec, CommandTable};
pub use protocol::{
    ChatDestination, ClientInfo, ClientPacket, ErrorCode, PasswordKind, PeerStatus, ServerPacket,
    SnapshotPhase,
};
pub use world::{LedgerWorld, World, WorldError};

/// Simulation step counter.
pub type Tick = u32;

/// Revision string a joining client must present verbatim.
pub const GAME_REVISION: &str = concat!("lockstep-", env!("CARGO_PKG_VERSION"));

/// Ticks in one simulated day. Default period for sync checks and the
/// catch-up tolerance.
pub const DAY_TICKS: Tick = 74;

/// Upper bound on the parameter words a command may carry.
pub const MAX_COMMAND_PARAMS: usize = 8;

/// Upper bound on a command's free-form text, in bytes.
pub const MAX_COMMAND_TEXT: usize = 256;

/// Upper bound on a client name, in bytes.
pub const MAX_CLIENT_NAME: usize = 32;

/// Upper bound on a chat line, in bytes.
pub const MAX_CHAT_TEXT: usize = 900;

/// Peers acknowledge their simulated tick at least this often.
pub const ACK_INTERVAL: Tick = 8;

/// Identifies a connection for its whole lifetime.
///
/// Id 0 is reserved for the server itself; remote clients are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u32);

impl ClientId {
    /// The authoritative server acting as a peer.
    pub const SERVER: Self = Self(0);

    pub fn is_server(self) -> bool {
        self == Self::SERVER
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The identity a peer acts under inside the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    Spectator,
    Company(u8),
}

impl Role {
    pub fn is_spectator(self) -> bool {
        matches!(self, Role::Spectator)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Spectator => write!(f, "spectator"),
            Role::Company(index) => write!(f, "company {}", index),
        }
    }
}
