//! Packets exchanged between the server and its peers.
//!
//! Every packet travels as one bincode-encoded frame (see `codec`). The enum
//! discriminant is the type tag; struct fields form the payload.

use crate::command::{Command, CommandRequest};
use crate::{ClientId, Role, Tick};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Packets sent by a peer to the server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ClientPacket {
    Join {
        revision: String,
        name: String,
        role: Role,
        language: u8,
        unique_id: String,
    },
    Password {
        kind: PasswordKind,
        value: String,
    },
    RequestSnapshot,
    SnapshotAck,
    Command(CommandRequest),
    Ack {
        tick: Tick,
    },
    Chat {
        destination: ChatDestination,
        text: String,
    },
    /// The peer's checksum for `tick` disagreed with the server's.
    Desync {
        tick: Tick,
    },
    Quit {
        reason: String,
    },
}

impl ClientPacket {
    /// Short name used in logs and protocol-violation messages.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientPacket::Join { .. } => "Join",
            ClientPacket::Password { .. } => "Password",
            ClientPacket::RequestSnapshot => "RequestSnapshot",
            ClientPacket::SnapshotAck => "SnapshotAck",
            ClientPacket::Command(_) => "Command",
            ClientPacket::Ack { .. } => "Ack",
            ClientPacket::Chat { .. } => "Chat",
            ClientPacket::Desync { .. } => "Desync",
            ClientPacket::Quit { .. } => "Quit",
        }
    }
}

/// Packets sent by the server to a peer.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ServerPacket {
    NeedPassword {
        kind: PasswordKind,
    },
    Welcome {
        client_id: ClientId,
    },
    Wait {
        queue_position: u32,
    },
    Snapshot(SnapshotPhase),
    ClientInfo(ClientInfo),
    Joined {
        client_id: ClientId,
    },
    Frame {
        current_tick: Tick,
        ceiling_tick: Tick,
    },
    Sync {
        tick: Tick,
        checksum: u64,
    },
    Command(Command),
    Chat {
        from: ClientId,
        destination: ChatDestination,
        text: String,
    },
    Error {
        code: ErrorCode,
    },
    ErrorQuit {
        client_id: ClientId,
        code: ErrorCode,
    },
    Quit {
        client_id: ClientId,
        reason: String,
    },
    Shutdown,
}

/// One piece of a world snapshot stream.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum SnapshotPhase {
    Start { total_size: u64 },
    Chunk(Vec<u8>),
    /// Carries the tick the snapshot was captured at; the peer resumes from it.
    End { tick: Tick },
}

/// Which secret the server is asking for.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum PasswordKind {
    Game,
    Company,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ChatDestination {
    Broadcast,
    Team(Role),
    Client(ClientId),
}

/// Coarse connection status shown to other peers.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Authorized,
    Waiting,
    Downloading,
    Joining,
    Active,
}

/// Roster entry broadcast whenever a peer changes state.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub client_id: ClientId,
    pub role: Role,
    pub name: String,
    pub status: PeerStatus,
}

/// Typed reason attached to every rejection or forced disconnect.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Generic protocol error; what peers see instead of sensitive codes.
    General,
    Desync,
    NotAuthorized,
    NotExpected,
    WrongRevision,
    NameInUse,
    WrongPassword,
    Kicked,
    ServerFull,
    TooManyCommands,
    TimeoutPassword,
    TimeoutJoin,
    TimeoutSnapshot,
    TooSlow,
}

impl ErrorCode {
    /// The code relayed to *other* peers when a client is dropped with `self`.
    ///
    /// Authorization and protocol failures are collapsed to `General` so a
    /// peer's failure detail is not leaked.
    pub fn for_relay(self) -> ErrorCode {
        match self {
            ErrorCode::WrongPassword
            | ErrorCode::WrongRevision
            | ErrorCode::NotAuthorized
            | ErrorCode::NotExpected => ErrorCode::General,
            other => other,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            ErrorCode::General => "protocol error",
            ErrorCode::Desync => "desync detected",
            ErrorCode::NotAuthorized => "not authorized",
            ErrorCode::NotExpected => "unexpected packet",
            ErrorCode::WrongRevision => "wrong game revision",
            ErrorCode::NameInUse => "name already in use",
            ErrorCode::WrongPassword => "wrong password",
            ErrorCode::Kicked => "kicked by server",
            ErrorCode::ServerFull => "server full",
            ErrorCode::TooManyCommands => "too many commands",
            ErrorCode::TimeoutPassword => "password entry timed out",
            ErrorCode::TimeoutJoin => "join timed out",
            ErrorCode::TimeoutSnapshot => "snapshot download timed out",
            ErrorCode::TooSlow => "connection too slow",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}
